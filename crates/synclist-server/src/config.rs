//! Server configuration: TOML file with CLI overrides.
//!
//! Log verbosity comes from the `RUST_LOG` environment variable via
//! `env_logger`, not from this file.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Command line interface for the sync server.
#[derive(Debug, Parser)]
#[command(name = "synclist-server", about = "synclist sync server")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP listener to.
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Path of the SQLite database file.
    #[arg(long)]
    pub db_path: Option<PathBuf>,
}

/// Configuration values for running a sync server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: String,
    /// Path of the SQLite database file.
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7600".to_string(),
            db_path: "./synclist-server.db".into(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&data)?)
    }

    /// Apply CLI overrides onto this configuration.
    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(addr) = &cli.listen_addr {
            self.listen_addr = addr.clone();
        }
        if let Some(path) = &cli.db_path {
            self.db_path = path.clone();
        }
    }
}
