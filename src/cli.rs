// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "corrctl")]
#[command(author, version, about = "Register and request control for FPGA board fleets")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Fleet file (TOML); the built-in demo fleet is used when omitted
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable traffic monitoring (prints all register access and requests)
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Filter monitor output (all, registers, requests)
    #[arg(long, global = true)]
    pub filter: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Only address these devices (repeatable, default: all)
    #[arg(short, long = "device", global = true, value_name = "ID")]
    pub devices: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List configured register layouts
    #[command(visible_alias = "ls")]
    Layouts,

    /// Read and decode a register on every device
    #[command(visible_alias = "rd")]
    Read {
        /// Layout name
        layout: String,
        /// Per-device register names (comma separated, one per device)
        #[arg(long, value_delimiter = ',')]
        names: Option<Vec<String>>,
    },

    /// Update fields of a register on every device
    #[command(visible_alias = "wr")]
    Write {
        /// Layout name
        layout: String,
        /// FIELD=VALUE updates; VALUE is true/false/on/off, an integer
        /// (decimal or 0x hex), toggle or pulse
        #[arg(required = true, value_name = "FIELD=VALUE")]
        updates: Vec<String>,
        /// Per-device register names (comma separated, one per device)
        #[arg(long, value_delimiter = ',')]
        names: Option<Vec<String>>,
    },

    /// Strobe flags 0 -> 1 -> 0 on every device
    Pulse {
        /// Layout name
        layout: String,
        /// Flag names
        #[arg(required = true)]
        fields: Vec<String>,
        /// Per-device register names (comma separated, one per device)
        #[arg(long, value_delimiter = ',')]
        names: Option<Vec<String>>,
    },

    /// Send a request to every device and collect the replies
    #[command(visible_alias = "req")]
    Request {
        /// Request name
        name: String,
        /// Request arguments
        args: Vec<String>,
        /// Wait budget in seconds (default from the fleet file)
        #[arg(short, long)]
        timeout: Option<f64>,
    },
}
