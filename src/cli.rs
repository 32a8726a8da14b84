use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

/// tokenpatrol: GitLab access token expiry exporter
#[derive(Debug, Parser)]
#[command(name = "tokenpatrol", version, about)]
pub struct Cli {
    /// YAML config file; a missing file falls back to the environment
    #[arg(long, global = true, env = "TOKENPATROL_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduled scanner and serve /metrics (default)
    Serve {
        /// Port to bind, overriding SERVER_PORT and the config file
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one scan cycle now and print the report as JSON
    Scan,
}
