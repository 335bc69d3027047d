//! Configuration system for the Nebula client.
//!
//! Provides runtime-configurable settings that persist to disk as RON files.
//! Supports CLI overrides via clap, hot-reload detection, and forward/backward
//! compatible serialization.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BackoffStrategy, CONFIG_FILE_NAME, Config, DebugConfig, NetworkConfig, ReconnectConfig,
};
pub use error::ConfigError;
