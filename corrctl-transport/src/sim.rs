//! In-process simulated board
//!
//! `SimDevice` stands in for a real board connection: it keeps a register
//! file, answers requests from a table of canned replies after a configurable
//! latency, and records every register write so callers can inspect the exact
//! sequence a board would have seen.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::TransportError;
use crate::types::{DeviceId, Reply, RequestId, STATUS_OK};
use crate::{Device, ReplyCallback};

/// Canned behaviour for one request name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimRequest {
    /// Reply arguments (status word first)
    pub reply: Vec<String>,
    /// Informs delivered ahead of the reply
    pub informs: Vec<Vec<String>>,
    /// Delay between submission and completion
    pub latency: Duration,
    /// Never complete the request
    pub silent: bool,
}

impl SimRequest {
    /// A request that replies `ok` immediately
    pub fn ok() -> Self {
        Self::reply(vec![STATUS_OK.to_string()])
    }

    /// A request that replies with the given arguments
    pub fn reply(arguments: Vec<String>) -> Self {
        Self {
            reply: arguments,
            informs: Vec::new(),
            latency: Duration::ZERO,
            silent: false,
        }
    }

    /// A request that is accepted but never answered
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::ok()
        }
    }

    pub fn with_informs(mut self, informs: Vec<Vec<String>>) -> Self {
        self.informs = informs;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn unknown(request: &str) -> Self {
        Self::reply(vec![
            "invalid".to_string(),
            format!("Unknown request {request}."),
        ])
    }
}

/// Bookkeeping for submitted requests, shared with completion threads
#[derive(Default)]
struct RequestTable {
    in_flight: HashSet<RequestId>,
    completed: HashMap<RequestId, Reply>,
}

/// Simulated board
pub struct SimDevice {
    id: DeviceId,
    registers: Mutex<HashMap<String, u32>>,
    read_only: HashSet<String>,
    requests: HashMap<String, SimRequest>,
    table: Arc<Mutex<RequestTable>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    write_log: Mutex<Vec<(String, u32)>>,
    write_attempts: AtomicUsize,
    failing_writes: HashSet<usize>,
}

impl SimDevice {
    /// Create a board with no registers and no known requests
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            registers: Mutex::new(HashMap::new()),
            read_only: HashSet::new(),
            requests: HashMap::new(),
            table: Arc::new(Mutex::new(RequestTable::default())),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            write_log: Mutex::new(Vec::new()),
            write_attempts: AtomicUsize::new(0),
            failing_writes: HashSet::new(),
        }
    }

    /// Add a register with its initial value
    pub fn with_register(self, name: impl Into<String>, value: u32) -> Self {
        self.registers.lock().insert(name.into(), value);
        self
    }

    /// Mark a register as rejecting writes
    pub fn with_read_only(mut self, name: impl Into<String>) -> Self {
        self.read_only.insert(name.into());
        self
    }

    /// Reject the `nth` register write (1-based, counting every attempt)
    pub fn with_failed_write(mut self, nth: usize) -> Self {
        self.failing_writes.insert(nth);
        self
    }

    /// Answer `name` requests with the given canned behaviour
    pub fn with_request(mut self, name: impl Into<String>, request: SimRequest) -> Self {
        self.requests.insert(name.into(), request);
        self
    }

    /// Simulate a dropped connection: all operations fail with `Disconnected`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Current value of a register
    pub fn register(&self, name: &str) -> Option<u32> {
        self.registers.lock().get(name).copied()
    }

    /// Overwrite a register without logging a write
    pub fn set_register(&self, name: &str, value: u32) {
        self.registers.lock().insert(name.to_string(), value);
    }

    /// Every accepted register write, oldest first
    pub fn write_log(&self) -> Vec<(String, u32)> {
        self.write_log.lock().clone()
    }

    pub fn clear_write_log(&self) {
        self.write_log.lock().clear();
    }

    /// Completed requests whose reply has not been released yet
    pub fn buffered_replies(&self) -> usize {
        self.table.lock().completed.len()
    }

    /// Submitted requests that have not completed yet
    pub fn in_flight(&self) -> usize {
        self.table.lock().in_flight.len()
    }

    fn check_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }

    fn spawn_completion(
        &self,
        id: RequestId,
        request: SimRequest,
        on_reply: ReplyCallback,
    ) -> Result<(), TransportError> {
        let table = Arc::clone(&self.table);
        let device = self.id.clone();

        std::thread::Builder::new()
            .name(format!("sim-reply-{device}"))
            .spawn(move || {
                if !request.latency.is_zero() {
                    std::thread::sleep(request.latency);
                }

                {
                    let mut table = table.lock();
                    if !table.in_flight.remove(&id) {
                        debug!("{device}: dropping late reply for released request {id}");
                        return;
                    }
                    let reply = Reply::new(request.reply).with_informs(request.informs);
                    table.completed.insert(id, reply);
                }

                on_reply(device, id);
            })
            .map_err(|e| TransportError::Internal(format!("failed to spawn reply thread: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl Device for SimDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    async fn read_uint(&self, register: &str) -> Result<u32, TransportError> {
        self.check_online()?;
        self.register(register)
            .ok_or_else(|| TransportError::UnknownRegister(register.to_string()))
    }

    async fn write_int(&self, register: &str, value: u32) -> Result<(), TransportError> {
        self.check_online()?;
        let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_writes.contains(&attempt) {
            return Err(TransportError::WriteRejected {
                register: register.to_string(),
                reason: format!("injected failure on write {attempt}"),
            });
        }
        if self.read_only.contains(register) {
            return Err(TransportError::WriteRejected {
                register: register.to_string(),
                reason: "register is read-only".into(),
            });
        }

        let mut registers = self.registers.lock();
        match registers.get_mut(register) {
            Some(slot) => *slot = value,
            None => return Err(TransportError::UnknownRegister(register.to_string())),
        }
        self.write_log.lock().push((register.to_string(), value));
        debug!("{}: {} <- 0x{:08X}", self.id, register, value);
        Ok(())
    }

    fn submit_nonblocking(
        &self,
        request: &str,
        args: &[String],
        on_reply: ReplyCallback,
    ) -> Result<RequestId, TransportError> {
        self.check_online()?;

        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let canned = self
            .requests
            .get(request)
            .cloned()
            .unwrap_or_else(|| SimRequest::unknown(request));

        debug!("{}: request {} {} {:?}", self.id, id, request, args);
        self.table.lock().in_flight.insert(id);

        if canned.silent {
            // Accepted, never answered: the callback is dropped unused.
            return Ok(id);
        }

        if let Err(e) = self.spawn_completion(id, canned, on_reply) {
            self.table.lock().in_flight.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    fn fetch_reply(&self, id: RequestId) -> Result<Reply, TransportError> {
        let table = self.table.lock();
        if let Some(reply) = table.completed.get(&id) {
            Ok(reply.clone())
        } else if table.in_flight.contains(&id) {
            Err(TransportError::NotCompleted(id))
        } else {
            Err(TransportError::UnknownRequest(id))
        }
    }

    fn release(&self, id: RequestId) -> Result<(), TransportError> {
        let mut table = self.table.lock();
        if table.completed.remove(&id).is_some() || table.in_flight.remove(&id) {
            Ok(())
        } else {
            Err(TransportError::UnknownRequest(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn notify_channel() -> (ReplyCallback, mpsc::Receiver<(DeviceId, RequestId)>) {
        let (tx, rx) = mpsc::channel();
        let cb: ReplyCallback = Box::new(move |device, id| {
            let _ = tx.send((device, id));
        });
        (cb, rx)
    }

    #[tokio::test]
    async fn test_register_read_write() {
        let dev = SimDevice::new("roach0").with_register("control", 0x20);

        assert_eq!(dev.read_uint("control").await.unwrap(), 0x20);
        dev.write_int("control", 0x60).await.unwrap();
        assert_eq!(dev.register("control"), Some(0x60));
        assert_eq!(dev.write_log(), vec![("control".to_string(), 0x60)]);
    }

    #[tokio::test]
    async fn test_unknown_register() {
        let dev = SimDevice::new("roach0");
        assert_eq!(
            dev.read_uint("nope").await,
            Err(TransportError::UnknownRegister("nope".into()))
        );
        assert!(dev.write_int("nope", 1).await.is_err());
        assert!(dev.write_log().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_and_offline() {
        let dev = SimDevice::new("roach0")
            .with_register("status", 7)
            .with_read_only("status");

        assert!(matches!(
            dev.write_int("status", 0).await,
            Err(TransportError::WriteRejected { .. })
        ));
        assert_eq!(dev.register("status"), Some(7));

        dev.set_offline(true);
        assert_eq!(
            dev.read_uint("status").await,
            Err(TransportError::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let dev = SimDevice::new("roach0")
            .with_register("control", 0)
            .with_failed_write(2);

        dev.write_int("control", 1).await.unwrap();
        assert!(matches!(
            dev.write_int("control", 2).await,
            Err(TransportError::WriteRejected { .. })
        ));
        dev.write_int("control", 3).await.unwrap();

        let words: Vec<u32> = dev.write_log().into_iter().map(|(_, w)| w).collect();
        assert_eq!(words, vec![1, 3]);
    }

    #[test]
    fn test_request_completes_and_releases() {
        let dev = SimDevice::new("roach0").with_request(
            "tap-start",
            SimRequest::ok().with_informs(vec![vec!["starting".into()]]),
        );
        let (cb, rx) = notify_channel();

        let id = dev.submit_nonblocking("tap-start", &[], cb).unwrap();
        let (device, got) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(device, DeviceId::new("roach0"));
        assert_eq!(got, id);

        let reply = dev.fetch_reply(id).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.informs, vec![vec!["starting".to_string()]]);
        assert_eq!(dev.buffered_replies(), 1);

        dev.release(id).unwrap();
        assert_eq!(dev.buffered_replies(), 0);
        assert_eq!(dev.release(id), Err(TransportError::UnknownRequest(id)));
    }

    #[test]
    fn test_unknown_request_replies_invalid() {
        let dev = SimDevice::new("roach0");
        let (cb, rx) = notify_channel();

        let id = dev.submit_nonblocking("bogus", &[], cb).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let reply = dev.fetch_reply(id).unwrap();
        assert_eq!(reply.status(), "invalid");
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_silent_request_stays_in_flight() {
        let dev = SimDevice::new("roach0").with_request("hang", SimRequest::silent());
        let (cb, rx) = notify_channel();

        let id = dev.submit_nonblocking("hang", &[], cb).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(dev.fetch_reply(id), Err(TransportError::NotCompleted(id)));
        assert_eq!(dev.in_flight(), 1);

        dev.release(id).unwrap();
        assert_eq!(dev.in_flight(), 0);
    }

    #[test]
    fn test_late_reply_after_release_is_dropped() {
        let dev = SimDevice::new("roach0").with_request(
            "slow",
            SimRequest::ok().with_latency(Duration::from_millis(100)),
        );
        let (cb, rx) = notify_channel();

        let id = dev.submit_nonblocking("slow", &[], cb).unwrap();
        dev.release(id).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
        assert_eq!(dev.buffered_replies(), 0);
    }
}
