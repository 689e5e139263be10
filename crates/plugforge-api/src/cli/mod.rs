//! CLI command definitions for the `plugforge` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod config;
pub mod user;

use clap::{Parser, Subcommand};

/// Relay server for the WooCommerce plugin generator.
#[derive(Parser)]
#[command(name = "plugforge", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn,plugforge_api=info",
            1 => "info,plugforge_core=debug,plugforge_infra=debug,plugforge_api=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API and relay WebSocket server.
    Serve {
        /// Address to bind.
        #[arg(long, env = "PLUGFORGE_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on.
        #[arg(long, short, env = "PLUGFORGE_PORT", default_value_t = 8080)]
        port: u16,
    },

    /// Manage API users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum UserAction {
    /// Create a user and print its API key (shown only once).
    Create {
        /// Display name.
        name: String,
    },

    /// List users.
    #[command(alias = "ls")]
    List,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the resolved configuration (API key redacted).
    Show,
}
