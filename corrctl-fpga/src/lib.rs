//! Register and request control for fleets of FPGA boards
//!
//! This crate sits on top of any [`corrctl_transport::Device`] and provides:
//!
//! - [`bitfield`]: 32-bit register layouts and the codec between words and
//!   named fields
//! - [`masked`]: read-modify-write of selected fields across many boards,
//!   including toggles and 0-1-0 pulses
//! - [`fanout`]: one request sent to many boards at once, with replies
//!   collected under a single deadline

pub mod bitfield;
pub mod error;
pub mod fanout;
pub mod masked;

pub use bitfield::{
    DecodedRegister, FieldDef, FieldKind, FieldMap, FieldSpec, LayoutBuilder, RegisterLayout,
    Value, REGISTER_BITS,
};
pub use error::{DispatchError, FanoutError, LayoutError, RegisterError};
pub use fanout::{
    dispatch, Dispatch, DispatchResult, FanoutDispatcher, PendingRequest, RequestState,
    DEFAULT_TIMEOUT,
};
pub use masked::{
    pulse, read_all, write_all, FieldUpdate, FieldUpdates, MaskedRegister, WriteOutcome,
    WritePass, WriteReport, WrittenWord,
};
