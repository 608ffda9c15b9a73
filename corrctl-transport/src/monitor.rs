//! MonitorDevice middleware for watching board traffic
//!
//! Wraps any [`Device`] and prints every register access and request/reply
//! passing through it to stderr.
//!
//! # Example
//!
//! ```ignore
//! use corrctl_transport::{MonitorConfig, MonitorDevice, SimDevice};
//!
//! let board = Arc::new(SimDevice::new("roach0"));
//! let monitored = MonitorDevice::wrap(board, MonitorConfig::default());
//! // Now all reads, writes and requests will be printed
//! ```

use crate::{BoxedDevice, Device, DeviceId, Reply, ReplyCallback, RequestId, TransportError};
use async_trait::async_trait;
use colored::{ColoredString, Colorize};
use std::str::FromStr;
use std::sync::Arc;

/// Traffic filter for selective display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonitorFilter {
    #[default]
    All,
    Registers,
    Requests,
}

impl FromStr for MonitorFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            "registers" | "register" | "regs" | "reg" => Ok(Self::Registers),
            "requests" | "request" | "req" => Ok(Self::Requests),
            _ => Err(format!("Unknown filter: {}", s)),
        }
    }
}

/// Configuration for the MonitorDevice
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    /// Filter for selective display
    pub filter: MonitorFilter,
    /// Also print informs attached to fetched replies
    pub show_informs: bool,
}

impl MonitorConfig {
    /// Create config with filter
    pub fn with_filter(mut self, filter: MonitorFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Create config with inform output setting
    pub fn with_informs(mut self, show: bool) -> Self {
        self.show_informs = show;
        self
    }

    fn shows_registers(&self) -> bool {
        matches!(self.filter, MonitorFilter::All | MonitorFilter::Registers)
    }

    fn shows_requests(&self) -> bool {
        matches!(self.filter, MonitorFilter::All | MonitorFilter::Requests)
    }
}

/// Which way traffic is flowing, relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToBoard,
    FromBoard,
}

impl Direction {
    fn marker(self) -> ColoredString {
        match self {
            Direction::ToBoard => ">>>".cyan(),
            Direction::FromBoard => "<<<".green(),
        }
    }

    fn tag(self, tag: &str) -> ColoredString {
        match self {
            Direction::ToBoard => tag.cyan().bold(),
            Direction::FromBoard => tag.green().bold(),
        }
    }
}

fn register_line(
    dir: Direction,
    op: &str,
    device: &DeviceId,
    register: &str,
    value: u32,
) -> String {
    format!(
        "{} {} {:<8} {} 0x{:08X}",
        dir.marker(),
        dir.tag(op),
        device.as_str(),
        register.yellow(),
        value
    )
}

fn request_line(dir: Direction, tag: &str, device: &DeviceId, id: RequestId, body: &str) -> String {
    format!(
        "{} {} {:<8} {} {}",
        dir.marker(),
        dir.tag(tag),
        device.as_str(),
        id,
        body
    )
}

fn error_line(op: &str, device: &DeviceId, err: &TransportError) -> String {
    format!(
        "{} {} {:<8} {}",
        "!!!".red().bold(),
        op.red(),
        device.as_str(),
        err
    )
}

/// Device middleware that prints all traffic
pub struct MonitorDevice {
    inner: BoxedDevice,
    config: MonitorConfig,
}

impl MonitorDevice {
    /// Wrap a device with printing middleware
    pub fn wrap(device: BoxedDevice, config: MonitorConfig) -> BoxedDevice {
        Arc::new(Self {
            inner: device,
            config,
        })
    }

    fn print_register(&self, dir: Direction, op: &str, register: &str, value: u32) {
        if self.config.shows_registers() {
            eprintln!("{}", register_line(dir, op, self.inner.id(), register, value));
        }
    }

    fn print_error(&self, op: &str, err: &TransportError) {
        eprintln!("{}", error_line(op, self.inner.id(), err));
    }
}

#[async_trait]
impl Device for MonitorDevice {
    fn id(&self) -> &DeviceId {
        self.inner.id()
    }

    async fn read_uint(&self, register: &str) -> Result<u32, TransportError> {
        let result = self.inner.read_uint(register).await;
        match &result {
            Ok(value) => self.print_register(Direction::FromBoard, "RD ", register, *value),
            Err(e) => self.print_error("RD ", e),
        }
        result
    }

    async fn write_int(&self, register: &str, value: u32) -> Result<(), TransportError> {
        self.print_register(Direction::ToBoard, "WR ", register, value);
        let result = self.inner.write_int(register, value).await;
        if let Err(e) = &result {
            self.print_error("WR ", e);
        }
        result
    }

    fn submit_nonblocking(
        &self,
        request: &str,
        args: &[String],
        on_reply: ReplyCallback,
    ) -> Result<RequestId, TransportError> {
        let result = self.inner.submit_nonblocking(request, args, on_reply);
        match &result {
            Ok(id) if self.config.shows_requests() => {
                let body = format!("?{} {}", request.yellow(), args.join(" "));
                eprintln!(
                    "{}",
                    request_line(Direction::ToBoard, "REQ", self.inner.id(), *id, &body)
                );
            }
            Ok(_) => {}
            Err(e) => self.print_error("REQ", e),
        }
        result
    }

    fn fetch_reply(&self, id: RequestId) -> Result<Reply, TransportError> {
        let result = self.inner.fetch_reply(id);
        match &result {
            Ok(reply) if self.config.shows_requests() => {
                if self.config.show_informs {
                    for inform in &reply.informs {
                        let body = inform.join(" ");
                        eprintln!(
                            "{}",
                            request_line(Direction::FromBoard, "INF", self.inner.id(), id, &body)
                        );
                    }
                }
                let body = reply.arguments.join(" ");
                eprintln!(
                    "{}",
                    request_line(Direction::FromBoard, "RPL", self.inner.id(), id, &body)
                );
            }
            Ok(_) => {}
            Err(e) => self.print_error("RPL", e),
        }
        result
    }

    fn release(&self, id: RequestId) -> Result<(), TransportError> {
        self.inner.release(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimDevice;

    #[test]
    fn test_filter_parse() {
        assert_eq!("all".parse::<MonitorFilter>(), Ok(MonitorFilter::All));
        assert_eq!("".parse::<MonitorFilter>(), Ok(MonitorFilter::All));
        assert_eq!("Regs".parse::<MonitorFilter>(), Ok(MonitorFilter::Registers));
        assert_eq!("req".parse::<MonitorFilter>(), Ok(MonitorFilter::Requests));
        assert!("events".parse::<MonitorFilter>().is_err());
    }

    #[test]
    fn test_line_layout() {
        colored::control::set_override(false);
        let dev = DeviceId::new("roach0");

        assert_eq!(
            register_line(Direction::ToBoard, "WR ", &dev, "control", 0x42),
            ">>> WR  roach0   control 0x00000042"
        );
        assert_eq!(
            request_line(Direction::FromBoard, "RPL", &dev, RequestId(7), "ok"),
            format!("<<< RPL roach0   {} ok", RequestId(7))
        );
        assert_eq!(
            error_line("RD ", &dev, &TransportError::Disconnected),
            "!!! RD  roach0   Device disconnected"
        );
        colored::control::unset_override();
    }

    #[tokio::test]
    async fn test_wrapped_device_passes_through() {
        let board = Arc::new(SimDevice::new("roach0").with_register("control", 1));
        let monitored = MonitorDevice::wrap(
            board.clone(),
            MonitorConfig::default().with_filter(MonitorFilter::Requests),
        );

        assert_eq!(monitored.id(), &DeviceId::new("roach0"));
        assert_eq!(monitored.read_uint("control").await.unwrap(), 1);
        monitored.write_int("control", 3).await.unwrap();
        assert_eq!(board.register("control"), Some(3));
        assert!(monitored.read_uint("missing").await.is_err());
    }
}
