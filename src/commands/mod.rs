//! Command handlers for the CLI application.
//!
//! - `registers`: layout listing and masked-register commands (layouts, read,
//!   write, pulse)
//! - `request`: fan-out requests (request)

pub mod registers;
pub mod request;

use anyhow::Context;
use corrctl::{Fleet, FleetConfig};
use corrctl_transport::{BoxedDevice, MonitorConfig, MonitorFilter};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Devices and output settings shared by every command
pub struct Session {
    pub fleet: Fleet,
    pub devices: Vec<BoxedDevice>,
    pub json: bool,
}

impl Session {
    /// Load the fleet and select the devices to address
    pub fn open(
        config: Option<&Path>,
        select: &[String],
        monitor: Option<MonitorConfig>,
        json: bool,
    ) -> anyhow::Result<Self> {
        let config = match config {
            Some(path) => FleetConfig::load_from_file(path)
                .with_context(|| format!("loading fleet from {}", path.display()))?,
            None => {
                info!("No fleet file given, using the built-in demo fleet");
                FleetConfig::demo()?
            }
        };
        let fleet = Fleet::from_config(&config)?;
        let devices = fleet.devices(select, monitor.as_ref())?;
        Ok(Self {
            fleet,
            devices,
            json,
        })
    }

    /// Print a value as pretty JSON
    pub fn print_json<T: Serialize>(&self, value: &T) -> CommandResult {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// Create monitor config from CLI flags
pub fn create_monitor_config(
    monitor: bool,
    verbose: bool,
    filter: Option<&str>,
) -> anyhow::Result<Option<MonitorConfig>> {
    if !monitor {
        return Ok(None);
    }

    let filter = match filter {
        Some(f) => f.parse::<MonitorFilter>().map_err(anyhow::Error::msg)?,
        None => MonitorFilter::All,
    };

    Ok(Some(
        MonitorConfig::default()
            .with_filter(filter)
            .with_informs(verbose),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use corrctl_transport::Device;

    #[test]
    fn test_monitor_config_from_flags() {
        assert!(create_monitor_config(false, false, Some("requests"))
            .unwrap()
            .is_none());

        let config = create_monitor_config(true, true, Some("regs"))
            .unwrap()
            .unwrap();
        assert_eq!(config.filter, MonitorFilter::Registers);
        assert!(config.show_informs);

        assert!(create_monitor_config(true, false, Some("packets")).is_err());
    }

    #[test]
    fn test_session_on_demo_fleet() {
        let session = Session::open(None, &["roach020902".to_string()], None, false).unwrap();
        assert_eq!(session.devices.len(), 1);
        assert_eq!(session.devices[0].id().as_str(), "roach020902");
    }
}
