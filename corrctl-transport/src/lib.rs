//! Device collaborator layer for CASPER-style FPGA boards
//!
//! This crate defines the interface the control core needs from a board
//! connection, independent of the wire protocol behind it:
//!
//! - raw 32-bit register access (`read_uint` / `write_int`)
//! - non-blocking requests whose completion is signalled through a callback,
//!   with the reply and its informs buffered until fetched and released
//!
//! Two implementations ship with the crate: [`SimDevice`], an in-process board
//! used by tests and offline runs, and [`MonitorDevice`], a middleware that
//! prints all traffic passing through another device.

pub mod error;
pub mod monitor;
pub mod sim;
pub mod types;

pub use error::TransportError;
pub use monitor::{MonitorConfig, MonitorDevice, MonitorFilter};
pub use sim::{SimDevice, SimRequest};
pub use types::{DeviceId, Reply, RequestId, STATUS_OK};

use async_trait::async_trait;
use std::sync::Arc;

/// Completion notification for a non-blocking request.
///
/// Invoked exactly once per request id, from whatever thread the transport
/// completes the request on.
pub type ReplyCallback = Box<dyn FnOnce(DeviceId, RequestId) + Send + 'static>;

/// The core device trait - all backends implement this
///
/// A device handle lives for the whole control session. Callers only borrow
/// it; opening and closing the underlying connection is the backend's job.
#[async_trait]
pub trait Device: Send + Sync {
    /// Identity of this board
    fn id(&self) -> &DeviceId;

    /// Read a 32-bit register as an unsigned integer
    async fn read_uint(&self, register: &str) -> Result<u32, TransportError>;

    /// Write a 32-bit register
    async fn write_int(&self, register: &str, value: u32) -> Result<(), TransportError>;

    /// Begin a request without waiting for its reply
    ///
    /// # Arguments
    /// * `request` - Request name (e.g. `progdev`, `tap-start`)
    /// * `args` - Request arguments
    /// * `on_reply` - Called once the reply has been buffered
    ///
    /// # Returns
    /// The id under which the reply can later be fetched
    fn submit_nonblocking(
        &self,
        request: &str,
        args: &[String],
        on_reply: ReplyCallback,
    ) -> Result<RequestId, TransportError>;

    /// Retrieve a completed request's reply and informs
    fn fetch_reply(&self, id: RequestId) -> Result<Reply, TransportError>;

    /// Free the buffered record of a request
    ///
    /// Releasing a request that has not completed yet tells the backend to
    /// discard its reply when (if ever) it arrives.
    fn release(&self, id: RequestId) -> Result<(), TransportError>;
}

/// Type alias for a shared device handle
pub type BoxedDevice = Arc<dyn Device>;
