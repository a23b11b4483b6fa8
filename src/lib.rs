#![allow(dead_code)]

mod cli;
mod conn;
mod dispatch;
mod engine;
mod errors;
mod logging;
mod server;
mod slab;
mod wire;

pub use cli::{Cli, Commands, ServerConfig};
pub use errors::StartupError;

/// Runs the server to completion (blocks until `SIGINT` or a fatal error).
pub fn run(config: &ServerConfig) -> Result<(), StartupError> {
    server::run(config)
}

/// Like [`run`], but reports the bound listener address once the socket is
/// up. Lets integration tests using `port: 0` (OS-assigned) learn which port
/// was actually chosen before connecting.
pub fn run_and_report(
    config: &ServerConfig,
    on_bound: impl FnOnce(std::net::SocketAddr),
) -> Result<(), StartupError> {
    server::run_reporting(config, on_bound)
}
