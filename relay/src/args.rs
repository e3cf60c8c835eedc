use std::path::PathBuf;

use clap::Parser;

/// Relay MCP router
#[derive(Debug, Parser)]
#[command(name = "relay", about = "Protocol-aggregating router for MCP")]
pub struct Args {
    /// Path to configuration file; environment variables apply on top.
    /// When omitted, configuration comes from the environment alone.
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,
}
