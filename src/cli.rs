//! Command-line surface, grounded on `db/src/cli/server.rs`'s
//! `Cli`/`Commands`/`ServerConfig` layering (stripped of the clustering,
//! persistence, and auth flags that crate carries, none of which this
//! server has).

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Starts the server and blocks until shutdown
    Run(ServerConfig),
    /// Prints supported commands and exits
    Help,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServerConfig {
    #[arg(long, default_value_t = String::from("0.0.0.0"))]
    pub host: String,

    #[arg(long, default_value_t = 8085)]
    pub port: u16,

    /// Idle connection timeout in milliseconds
    #[arg(long, default_value_t = 60_000)]
    pub idle_timeout_ms: u64,

    /// Maximum request body size in bytes
    #[arg(long, default_value_t = 4096)]
    pub max_message_size: usize,

    /// Maximum number of arguments per request
    #[arg(long, default_value_t = 1024)]
    pub max_args: usize,

    /// Log level (RUST_LOG-compatible env filter default)
    #[arg(long, default_value_t = String::from("info"))]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            #[cfg(not(test))]
            port: 8085,
            // allow the OS to pick a port
            #[cfg(test)]
            port: 0,
            idle_timeout_ms: 60_000,
            max_message_size: 4096,
            max_args: 1024,
            log_level: String::from("info"),
        }
    }
}

/// Supported commands, printed by the `help` subcommand.
pub const SUPPORTED_COMMANDS: &[&str] = &[
    "keys", "get", "set", "del", "pexpire", "pttl", "zadd", "zrem", "zscore", "zquery",
];

pub fn print_help() {
    println!("ferrokv-server: in-memory key/value server\n");
    println!("Supported commands:");
    for cmd in SUPPORTED_COMMANDS {
        println!("  {cmd}");
    }
}
