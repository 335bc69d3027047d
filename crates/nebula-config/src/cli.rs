//! Command-line argument parsing for the Nebula client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Nebula client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-client", about = "Nebula headless network client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Connection protocol (e.g. tcp).
    #[arg(long)]
    pub protocol: Option<String>,

    /// Reconnect budget: -1 retries forever, 0 never retries.
    #[arg(long, allow_negative_numbers = true)]
    pub reconnect: Option<i32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref protocol) = args.protocol {
            self.network.protocol = protocol.clone();
        }
        if let Some(budget) = args.reconnect {
            self.network.reconnect_budget = budget;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
