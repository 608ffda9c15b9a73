//! corrctl - control for fleets of FPGA boards
//!
//! The register codec, masked-register protocol and fan-out dispatcher live
//! in `corrctl-fpga`; board connections in `corrctl-transport`. This crate
//! adds the fleet configuration shared by the `corrctl` binary and tests.

pub mod config;

pub use config::{ConfigError, DeviceConfig, FieldConfig, Fleet, FleetConfig, LayoutConfig};
