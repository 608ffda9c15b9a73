//! Error types for register and dispatch operations

use corrctl_transport::{DeviceId, TransportError};
use thiserror::Error;

use crate::masked::WriteReport;

/// A register layout that cannot describe a 32-bit word
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Layout {layout}: field widths sum to {total} bits, expected 32")]
    WidthSum { layout: String, total: u32 },

    #[error("Layout {layout}: field {field} has zero width")]
    ZeroWidth { layout: String, field: String },

    #[error("Layout {layout}: field name {field} used more than once")]
    DuplicateField { layout: String, field: String },

    #[error("Layout {layout}: field names must not be empty")]
    EmptyName { layout: String },
}

/// Errors from masked-register operations
#[derive(Error, Debug)]
pub enum RegisterError {
    /// Malformed layout
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Encode was given a field the layout does not declare
    #[error("Unknown field {field} in register {register}")]
    UnknownField { register: String, field: String },

    /// A write update named a field the layout does not declare
    #[error("Attempting to write key {key} but it doesn't exist in register {register}")]
    UnknownKey { register: String, key: String },

    /// Value does not fit in the field
    #[error("Value {value} does not fit in {width}-bit field {field}")]
    Range { field: String, value: u32, width: u8 },

    /// Toggle or pulse requested on a multi-bit field
    #[error("Field {field} is not a flag")]
    NotAFlag { field: String },

    /// Register name list does not line up with the device list
    #[error("Got {names} register names for {devices} devices")]
    Arity { names: usize, devices: usize },

    /// Raw device I/O failure, propagated unchanged
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Some devices were written and others were not
    #[error("{} of {} devices failed", .0.failed_devices().len(), .0.devices().len())]
    PartialFailure(WriteReport),
}

/// Why one device in a fan-out has no usable reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The request could not be submitted
    #[error("submit failed: {0}")]
    Submit(TransportError),

    /// No reply arrived within the wait budget
    #[error("no reply")]
    NoReply,

    /// The reply was signalled but could not be retrieved
    #[error("fetch failed: {0}")]
    Fetch(TransportError),
}

/// Caller errors that prevent a fan-out from starting
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FanoutError {
    #[error("Device {0} appears more than once in the fan-out list")]
    DuplicateDevice(DeviceId),
}
