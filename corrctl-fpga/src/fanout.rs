//! Fan-out request dispatch
//!
//! `dispatch` sends one request to a list of boards without waiting on any
//! single round-trip, then collects the replies as they arrive:
//!
//! ```text
//!   submit_nonblocking ──► board 0 ─┐
//!   submit_nonblocking ──► board 1 ─┼─ on_reply ──► reply channel (MPSC)
//!   submit_nonblocking ──► board N ─┘                      │
//!                                                          ▼
//!                     correlation table (one per call) ◄── drain until all
//!                                                          replied or deadline
//! ```
//!
//! Each request id moves `Sent -> Replied -> Consumed`, or `Sent -> TimedOut`
//! when the overall deadline passes first. The deadline bounds the whole call
//! and is not reset per reply. Boards that stay silent are reported, not
//! raised: the caller gets a result for every board.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use corrctl_transport::{BoxedDevice, Device, DeviceId, Reply, ReplyCallback, RequestId};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{DispatchError, FanoutError};

/// Default wait budget for a fan-out
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one submitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Sent,
    Replied,
    Consumed,
    TimedOut,
}

/// Correlation record for one board's request
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub device: DeviceId,
    pub id: RequestId,
    pub submitted: Instant,
    pub replied: Option<Instant>,
    pub state: RequestState,
}

/// Pushed by transport callbacks
struct ReplyNotice {
    device: DeviceId,
    id: RequestId,
}

/// Requests of one `dispatch` call, keyed by board
#[derive(Default)]
struct CorrelationTable {
    pending: HashMap<DeviceId, PendingRequest>,
    awaiting: usize,
}

impl CorrelationTable {
    fn sent(&mut self, device: DeviceId, id: RequestId) {
        self.awaiting += 1;
        self.pending.insert(
            device.clone(),
            PendingRequest {
                device,
                id,
                submitted: Instant::now(),
                replied: None,
                state: RequestState::Sent,
            },
        );
    }

    /// Record a reply; false if it does not match an outstanding request
    fn replied(&mut self, notice: &ReplyNotice) -> bool {
        match self.pending.get_mut(&notice.device) {
            Some(req) if req.id == notice.id && req.state == RequestState::Sent => {
                req.state = RequestState::Replied;
                req.replied = Some(Instant::now());
                self.awaiting -= 1;
                true
            }
            _ => false,
        }
    }

    fn awaiting(&self) -> usize {
        self.awaiting
    }

    fn take(&mut self, device: &DeviceId) -> Option<PendingRequest> {
        self.pending.remove(device)
    }
}

/// Outcome of a fan-out for one board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    /// Request name as sent
    pub request: String,
    /// Id the board assigned, if submission succeeded
    pub request_id: Option<RequestId>,
    /// Reply and informs, or why there are none
    pub outcome: Result<Reply, DispatchError>,
    /// Time from submission to reply notification
    pub latency: Option<Duration>,
}

impl DispatchResult {
    fn failed(request: &str, request_id: Option<RequestId>, err: DispatchError) -> Self {
        Self {
            request: request.to_string(),
            request_id,
            outcome: Err(err),
            latency: None,
        }
    }

    /// The board replied within the budget
    pub fn replied(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The board replied with status `ok`
    pub fn is_ok(&self) -> bool {
        self.outcome.as_ref().is_ok_and(Reply::is_ok)
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.outcome.as_ref().ok()
    }

    /// Reply status word (`ok`, `fail`, ...)
    pub fn status(&self) -> Option<&str> {
        self.reply().map(Reply::status)
    }

    pub fn informs(&self) -> &[Vec<String>] {
        self.reply().map(|r| r.informs.as_slice()).unwrap_or(&[])
    }
}

/// Result set of one fan-out
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Every board replied within the budget
    pub all_completed: bool,
    /// One entry per board
    pub results: BTreeMap<DeviceId, DispatchResult>,
    /// Wall-clock time spent in the call
    pub elapsed: Duration,
}

impl Dispatch {
    /// Boards without a usable reply
    pub fn missing(&self) -> impl Iterator<Item = &DeviceId> {
        self.results
            .iter()
            .filter(|(_, r)| !r.replied())
            .map(|(id, _)| id)
    }

    pub fn get(&self, device: &DeviceId) -> Option<&DispatchResult> {
        self.results.get(device)
    }
}

/// Fan-out front end carrying a default wait budget
///
/// Holds no per-call state: every request gets its own correlation table.
#[derive(Debug, Clone, Copy)]
pub struct FanoutDispatcher {
    timeout: Duration,
}

impl Default for FanoutDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl FanoutDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dispatch with the default budget
    pub async fn request(
        &self,
        devices: &[BoxedDevice],
        request: &str,
        args: &[String],
    ) -> Result<Dispatch, FanoutError> {
        dispatch(devices, request, args, self.timeout).await
    }
}

/// Send `request` to every board and wait up to `timeout` for the replies
///
/// # Arguments
/// * `devices` - Boards to address; each may appear only once
/// * `request` - Request name
/// * `args` - Request arguments, identical for every board
/// * `timeout` - Overall budget, measured from the first submission
///
/// # Returns
/// A result for every board. `all_completed` is false if any board failed
/// to submit, stayed silent, or its reply could not be fetched.
pub async fn dispatch(
    devices: &[BoxedDevice],
    request: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Dispatch, FanoutError> {
    let mut seen = HashSet::with_capacity(devices.len());
    for device in devices {
        if !seen.insert(device.id()) {
            return Err(FanoutError::DuplicateDevice(device.id().clone()));
        }
    }

    let start = Instant::now();
    let deadline = start + timeout;
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ReplyNotice>();
    let mut table = CorrelationTable::default();
    let mut results = BTreeMap::new();

    debug!("Send request({}) to {} devices", request, devices.len());
    for device in devices {
        let tx = reply_tx.clone();
        let on_reply: ReplyCallback = Box::new(move |device, id| {
            // Fails only once the call has returned; the reply is dropped.
            let _ = tx.send(ReplyNotice { device, id });
        });

        match device.submit_nonblocking(request, args, on_reply) {
            Ok(id) => {
                debug!("Request '{}' id({}) to device({})", request, id, device.id());
                table.sent(device.id().clone(), id);
            }
            Err(e) => {
                warn!("Request '{}' to device({}) failed: {}", request, device.id(), e);
                results.insert(
                    device.id().clone(),
                    DispatchResult::failed(request, None, DispatchError::Submit(e)),
                );
            }
        }
    }
    // Only the callbacks hold senders now; the channel closes once all of
    // them have fired or been dropped by their transport.
    drop(reply_tx);

    while table.awaiting() > 0 {
        match timeout_at(deadline, reply_rx.recv()).await {
            Ok(Some(notice)) => {
                if table.replied(&notice) {
                    debug!("Reply({}) from device({})", notice.id, notice.device);
                } else {
                    warn!(
                        "Ignoring unexpected reply({}) from device({})",
                        notice.id, notice.device
                    );
                }
            }
            Ok(None) => {
                debug!("All reply callbacks released, {} requests unanswered", table.awaiting());
                break;
            }
            Err(_) => {
                warn!(
                    "Request '{}' timed out after {:?}: {} of {} devices did not reply",
                    request,
                    timeout,
                    table.awaiting(),
                    devices.len()
                );
                break;
            }
        }
    }

    for device in devices {
        let Some(mut pending) = table.take(device.id()) else {
            continue;
        };

        let result = match pending.state {
            RequestState::Replied => {
                let outcome = device.fetch_reply(pending.id).map_err(DispatchError::Fetch);
                pending.state = RequestState::Consumed;
                DispatchResult {
                    request: request.to_string(),
                    request_id: Some(pending.id),
                    outcome,
                    latency: pending.replied.map(|t| t.duration_since(pending.submitted)),
                }
            }
            _ => {
                pending.state = RequestState::TimedOut;
                DispatchResult::failed(request, Some(pending.id), DispatchError::NoReply)
            }
        };

        // Consumed: free the buffered reply. Timed out: let the transport
        // discard the reply if it shows up later.
        release(device.as_ref(), &pending);
        results.insert(device.id().clone(), result);
    }

    let all_completed = results.values().all(DispatchResult::replied);
    let elapsed = start.elapsed();
    info!(
        "Request '{}': {}/{} devices replied in {:.1}ms",
        request,
        results.values().filter(|r| r.replied()).count(),
        devices.len(),
        elapsed.as_secs_f64() * 1000.0
    );

    Ok(Dispatch {
        all_completed,
        results,
        elapsed,
    })
}

fn release(device: &dyn Device, pending: &PendingRequest) {
    if let Err(e) = device.release(pending.id) {
        warn!(
            "Failed to release {:?} request({}) on device({}): {}",
            pending.state, pending.id, pending.device, e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corrctl_transport::{SimDevice, SimRequest, TransportError};
    use std::sync::Arc;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn board(id: &str, request: SimRequest) -> Arc<SimDevice> {
        Arc::new(SimDevice::new(id).with_request("tap-start", request))
    }

    fn boxed(sims: &[Arc<SimDevice>]) -> Vec<BoxedDevice> {
        sims.iter().map(|s| s.clone() as BoxedDevice).collect()
    }

    #[tokio::test]
    async fn test_all_devices_reply() {
        let sims = vec![
            board(
                "roach0",
                SimRequest::ok().with_informs(vec![args(&["tap", "gbe0"])]),
            ),
            board("roach1", SimRequest::ok()),
            board(
                "roach2",
                SimRequest::reply(args(&["fail", "busy"]))
                    .with_latency(Duration::from_millis(30)),
            ),
        ];
        let devices = boxed(&sims);

        let out = dispatch(&devices, "tap-start", &args(&["gbe0"]), Duration::from_secs(2))
            .await
            .unwrap();

        assert!(out.all_completed);
        assert_eq!(out.results.len(), 3);
        assert_eq!(out.missing().count(), 0);

        let r0 = out.get(&DeviceId::new("roach0")).unwrap();
        assert!(r0.is_ok());
        assert_eq!(r0.request, "tap-start");
        assert_eq!(r0.informs(), &[args(&["tap", "gbe0"])]);

        let r2 = out.get(&DeviceId::new("roach2")).unwrap();
        assert!(r2.replied());
        assert!(!r2.is_ok());
        assert_eq!(r2.status(), Some("fail"));
        assert_eq!(r2.reply().unwrap().arguments, args(&["fail", "busy"]));

        // every buffered reply was released
        assert!(sims.iter().all(|s| s.buffered_replies() == 0));
    }

    #[tokio::test]
    async fn test_partial_timeout() {
        let sims = vec![
            board("roach0", SimRequest::ok()),
            board("roach1", SimRequest::ok().with_latency(Duration::from_millis(20))),
            board("roach2", SimRequest::ok().with_latency(Duration::from_secs(3))),
        ];
        let devices = boxed(&sims);
        let timeout = Duration::from_millis(300);

        let started = std::time::Instant::now();
        let out = dispatch(&devices, "tap-start", &[], timeout).await.unwrap();
        let waited = started.elapsed();

        assert!(!out.all_completed);
        assert!(out.get(&DeviceId::new("roach0")).unwrap().replied());
        assert!(out.get(&DeviceId::new("roach1")).unwrap().replied());
        let slow = out.get(&DeviceId::new("roach2")).unwrap();
        assert_eq!(slow.outcome, Err(DispatchError::NoReply));
        assert!(slow.request_id.is_some());
        assert_eq!(
            out.missing().cloned().collect::<Vec<_>>(),
            vec![DeviceId::new("roach2")]
        );

        assert!(waited >= timeout);
        assert!(waited < timeout + Duration::from_secs(1), "waited {waited:?}");

        // the timed-out request was released, so its late reply is dropped
        assert_eq!(sims[2].in_flight(), 0);
    }

    #[tokio::test]
    async fn test_silent_device_ends_wait_when_callbacks_drop() {
        let sims = vec![
            board("roach0", SimRequest::ok()),
            board("roach1", SimRequest::silent()),
        ];
        let devices = boxed(&sims);

        let out = dispatch(&devices, "tap-start", &[], Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!out.all_completed);
        assert!(out.elapsed < Duration::from_secs(5));
        assert_eq!(
            out.get(&DeviceId::new("roach1")).unwrap().outcome,
            Err(DispatchError::NoReply)
        );
    }

    #[tokio::test]
    async fn test_submit_failure_is_per_device() {
        let sims = vec![board("roach0", SimRequest::ok()), board("roach1", SimRequest::ok())];
        sims[1].set_offline(true);
        let devices = boxed(&sims);

        let out = dispatch(&devices, "tap-start", &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert!(!out.all_completed);
        assert!(out.get(&DeviceId::new("roach0")).unwrap().is_ok());
        let failed = out.get(&DeviceId::new("roach1")).unwrap();
        assert_eq!(
            failed.outcome,
            Err(DispatchError::Submit(TransportError::Disconnected))
        );
        assert_eq!(failed.request_id, None);
    }

    #[tokio::test]
    async fn test_replies_out_of_submission_order() {
        let sims = vec![
            board(
                "roach0",
                SimRequest::reply(args(&["ok", "first"])).with_latency(Duration::from_millis(150)),
            ),
            board("roach1", SimRequest::reply(args(&["ok", "second"]))),
        ];
        let devices = boxed(&sims);

        let out = dispatch(&devices, "tap-start", &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert!(out.all_completed);
        let r0 = out.get(&DeviceId::new("roach0")).unwrap();
        let r1 = out.get(&DeviceId::new("roach1")).unwrap();
        assert_eq!(r0.reply().unwrap().arguments[1], "first");
        assert_eq!(r1.reply().unwrap().arguments[1], "second");
        assert!(r0.latency.unwrap() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_duplicate_device_rejected() {
        let sim = board("roach0", SimRequest::ok());
        let devices = vec![sim.clone() as BoxedDevice, sim as BoxedDevice];

        let err = dispatch(&devices, "tap-start", &[], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, FanoutError::DuplicateDevice(DeviceId::new("roach0")));
    }

    #[tokio::test]
    async fn test_empty_device_list() {
        let out = dispatch(&[], "tap-start", &[], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(out.all_completed);
        assert!(out.results.is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_uses_default_budget() {
        let dispatcher = FanoutDispatcher::new(Duration::from_millis(100));
        let sims = vec![board("roach0", SimRequest::ok().with_latency(Duration::from_secs(2)))];

        let out = dispatcher
            .request(&boxed(&sims), "tap-start", &[])
            .await
            .unwrap();
        assert!(!out.all_completed);
        assert!(out.elapsed < Duration::from_secs(1));
        assert_eq!(FanoutDispatcher::default().timeout(), DEFAULT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_unknown_request_still_counts_as_reply() {
        let sims = vec![board("roach0", SimRequest::ok())];
        let out = dispatch(&boxed(&sims), "progdev", &[], Duration::from_secs(2))
            .await
            .unwrap();

        assert!(out.all_completed);
        let r = out.get(&DeviceId::new("roach0")).unwrap();
        assert_eq!(r.status(), Some("invalid"));
        assert!(!r.is_ok());
    }
}
