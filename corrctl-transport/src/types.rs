//! Common types for transport layer

use serde::Serialize;
use std::fmt;

/// Identity of one board in the fleet (typically its hostname)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque request identifier handed out by a device on submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reply status word for a successful request
pub const STATUS_OK: &str = "ok";

/// Buffered result of a completed request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reply {
    /// Reply arguments; the first one is the status word (`ok`, `fail`, `invalid`)
    pub arguments: Vec<String>,
    /// Arguments of every inform message received before the reply, in order
    pub informs: Vec<Vec<String>>,
}

impl Reply {
    pub fn new(arguments: Vec<String>) -> Self {
        Self {
            arguments,
            informs: Vec::new(),
        }
    }

    pub fn with_informs(mut self, informs: Vec<Vec<String>>) -> Self {
        self.informs = informs;
        self
    }

    /// Status word (first reply argument), empty if the reply had no arguments
    pub fn status(&self) -> &str {
        self.arguments.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_ok(&self) -> bool {
        self.status() == STATUS_OK
    }
}
