//! corrctl CLI
//!
//! Reads, writes and pulses register fields across a fleet of FPGA boards,
//! and fans requests out to all of them at once.

use clap::Parser;
use tracing_subscriber::EnvFilter;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;
use commands::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("corrctl={level}").parse()?)
                .add_directive(format!("corrctl_fpga={level}").parse()?)
                .add_directive(format!("corrctl_transport={level}").parse()?),
        )
        .init();

    // Create monitor config if monitoring is enabled
    let monitor = commands::create_monitor_config(cli.monitor, cli.verbose, cli.filter.as_deref())?;
    let session = Session::open(cli.config.as_deref(), &cli.devices, monitor, cli.json)?;

    match cli.command {
        Commands::Layouts => commands::registers::layouts(&session)?,
        Commands::Read { layout, names } => {
            commands::registers::read(&session, &layout, names.as_deref()).await?;
        }
        Commands::Write {
            layout,
            updates,
            names,
        } => {
            commands::registers::write(&session, &layout, &updates, names.as_deref()).await?;
        }
        Commands::Pulse {
            layout,
            fields,
            names,
        } => {
            commands::registers::pulse(&session, &layout, &fields, names.as_deref()).await?;
        }
        Commands::Request {
            name,
            args,
            timeout,
        } => {
            commands::request::request(&session, &name, &args, timeout).await?;
        }
    }

    Ok(())
}
