// Fleet configuration
// Register layouts and (simulated) boards loaded from TOML

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use corrctl_fpga::{FieldDef, LayoutError, RegisterLayout};
use corrctl_transport::{
    BoxedDevice, Device, DeviceId, MonitorConfig, MonitorDevice, SimDevice, SimRequest, STATUS_OK,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors loading or using a fleet configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("Invalid timeout_secs: {0}")]
    Timeout(f64),

    #[error("Layout {0} is defined more than once")]
    DuplicateLayout(String),

    #[error("Device {0} is defined more than once")]
    DuplicateDevice(String),

    #[error("Unknown layout: {0}")]
    UnknownLayout(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

fn default_timeout_secs() -> f64 {
    5.0
}

fn default_reply() -> Vec<String> {
    vec![STATUS_OK.to_string()]
}

/// Top-level fleet file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Default fan-out wait budget
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default)]
    pub layouts: Vec<LayoutConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// One register layout, fields listed MSB-first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub name: String,
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FieldConfig {
    Flag { name: String },
    Uint { name: String, width: u8 },
    Padding { width: u8 },
}

impl From<&FieldConfig> for FieldDef {
    fn from(field: &FieldConfig) -> Self {
        match field {
            FieldConfig::Flag { name } => FieldDef::Flag(name.clone()),
            FieldConfig::Uint { name, width } => FieldDef::Uint(name.clone(), *width),
            FieldConfig::Padding { width } => FieldDef::Padding(*width),
        }
    }
}

/// A simulated board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    /// Initial register values
    #[serde(default)]
    pub registers: BTreeMap<String, u32>,
    /// Registers that reject writes
    #[serde(default)]
    pub read_only: Vec<String>,
    /// Canned replies by request name
    #[serde(default)]
    pub requests: BTreeMap<String, RequestConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default = "default_reply")]
    pub reply: Vec<String>,
    #[serde(default)]
    pub informs: Vec<Vec<String>>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub silent: bool,
}

impl From<&RequestConfig> for SimRequest {
    fn from(req: &RequestConfig) -> Self {
        let mut sim = SimRequest::reply(req.reply.clone())
            .with_informs(req.informs.clone())
            .with_latency(Duration::from_millis(req.latency_ms));
        sim.silent = req.silent;
        sim
    }
}

impl DeviceConfig {
    fn build(&self) -> SimDevice {
        let mut sim = SimDevice::new(self.id.as_str());
        for (name, value) in &self.registers {
            sim = sim.with_register(name.as_str(), *value);
        }
        for name in &self.read_only {
            sim = sim.with_read_only(name.as_str());
        }
        for (name, req) in &self.requests {
            sim = sim.with_request(name.as_str(), SimRequest::from(req));
        }
        sim
    }
}

impl FleetConfig {
    /// Load from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// The built-in demo fleet
    pub fn demo() -> Result<Self, ConfigError> {
        Self::from_toml(DEMO_FLEET_TOML)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timeout()?;

        let mut names = HashSet::new();
        for layout in &self.layouts {
            if !names.insert(layout.name.as_str()) {
                return Err(ConfigError::DuplicateLayout(layout.name.clone()));
            }
            layout.build()?;
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(device.id.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.id.clone()));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.timeout_secs)
            .map_err(|_| ConfigError::Timeout(self.timeout_secs))
    }
}

impl LayoutConfig {
    pub fn build(&self) -> Result<RegisterLayout, LayoutError> {
        RegisterLayout::new(self.name.as_str(), self.fields.iter().map(FieldDef::from).collect())
    }
}

/// Layouts and boards ready for use
pub struct Fleet {
    layouts: Vec<RegisterLayout>,
    boards: Vec<Arc<SimDevice>>,
    timeout: Duration,
}

impl Fleet {
    pub fn from_config(config: &FleetConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let layouts = config
            .layouts
            .iter()
            .map(LayoutConfig::build)
            .collect::<Result<Vec<_>, _>>()?;
        let boards: Vec<Arc<SimDevice>> = config
            .devices
            .iter()
            .map(|d| Arc::new(d.build()))
            .collect();
        debug!(
            "Fleet: {} layouts, {} devices",
            layouts.len(),
            boards.len()
        );

        Ok(Self {
            layouts,
            boards,
            timeout: config.timeout()?,
        })
    }

    /// Layouts in declaration order
    pub fn layouts(&self) -> &[RegisterLayout] {
        &self.layouts
    }

    pub fn layout(&self, name: &str) -> Result<&RegisterLayout, ConfigError> {
        self.layouts
            .iter()
            .find(|l| l.name() == name)
            .ok_or_else(|| ConfigError::UnknownLayout(name.to_string()))
    }

    pub fn boards(&self) -> &[Arc<SimDevice>] {
        &self.boards
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Devices to operate on
    ///
    /// # Arguments
    /// * `select` - Device ids in the order to address them; empty selects
    ///   every board in declaration order
    /// * `monitor` - Wrap each device in a traffic monitor
    pub fn devices(
        &self,
        select: &[String],
        monitor: Option<&MonitorConfig>,
    ) -> Result<Vec<BoxedDevice>, ConfigError> {
        let chosen: Vec<&Arc<SimDevice>> = if select.is_empty() {
            self.boards.iter().collect()
        } else {
            select
                .iter()
                .map(|id| {
                    let id = DeviceId::new(id.as_str());
                    self.boards
                        .iter()
                        .find(|b| b.id() == &id)
                        .ok_or_else(|| ConfigError::UnknownDevice(id.to_string()))
                })
                .collect::<Result<_, _>>()?
        };

        Ok(chosen
            .into_iter()
            .map(|board| {
                let device: BoxedDevice = board.clone();
                match monitor {
                    Some(config) => MonitorDevice::wrap(device, config.clone()),
                    None => device,
                }
            })
            .collect())
    }
}

/// Demo fleet: four F-engine boards with the wideband control and status maps
pub const DEMO_FLEET_TOML: &str = r##"# corrctl demo fleet
# Layouts list fields MSB-first; the widths of each layout sum to 32.
timeout_secs = 2.0

[[layouts]]
name = "control"
fields = [
    { kind = "padding", width = 11 },
    { kind = "flag", name = "tvgsel_noise" },
    { kind = "flag", name = "tvgsel_fdfs" },
    { kind = "flag", name = "tvgsel_pkt" },
    { kind = "flag", name = "tvgsel_ct" },
    { kind = "flag", name = "tvg_en" },
    { kind = "padding", width = 2 },
    { kind = "flag", name = "adc_protect_disable" },
    { kind = "flag", name = "flasher_en" },
    { kind = "padding", width = 2 },
    { kind = "flag", name = "gbe_enable" },
    { kind = "flag", name = "gbe_rst" },
    { kind = "padding", width = 4 },
    { kind = "flag", name = "clr_status" },
    { kind = "flag", name = "arm" },
    { kind = "flag", name = "soft_sync" },
    { kind = "flag", name = "mrst" },
]

[[layouts]]
name = "fstatus0"
fields = [
    { kind = "padding", width = 2 },
    { kind = "uint", name = "sync_val", width = 2 },
    { kind = "padding", width = 10 },
    { kind = "flag", name = "xaui_lnkdn" },
    { kind = "flag", name = "xaui_over" },
    { kind = "padding", width = 9 },
    { kind = "flag", name = "dram_err" },
    { kind = "flag", name = "clk_err" },
    { kind = "flag", name = "adc_disabled" },
    { kind = "flag", name = "ct_error" },
    { kind = "flag", name = "adc_overrange" },
    { kind = "flag", name = "fft_overrange" },
    { kind = "flag", name = "quant_overrange" },
]

[[devices]]
id = "roach020901"
registers = { control = 0x200, fstatus0 = 0x10000000 }
read_only = ["fstatus0"]
requests.tap-start = { informs = [["tap", "gbe0", "started"]] }
requests.progdev = {}

[[devices]]
id = "roach020902"
registers = { control = 0x200, fstatus0 = 0x10000004 }
read_only = ["fstatus0"]
requests.tap-start = { informs = [["tap", "gbe0", "started"]], latency_ms = 40 }
requests.progdev = {}

[[devices]]
id = "roach020903"
registers = { control = 0x0, fstatus0 = 0x10020000 }
read_only = ["fstatus0"]
requests.tap-start = { reply = ["fail", "gbe0 core not found"] }
requests.progdev = { latency_ms = 120 }

[[devices]]
id = "roach020904"
registers = { control = 0x200, fstatus0 = 0x10000000 }
read_only = ["fstatus0"]
requests.tap-start = { silent = true }
requests.progdev = {}
"##;
