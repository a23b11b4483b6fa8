mod cli;
mod conn;
mod dispatch;
mod engine;
mod errors;
mod logging;
mod server;
mod slab;
mod wire;

use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();
    let command = cli.command.unwrap_or(cli::Commands::Run(cli::ServerConfig::default()));
    match command {
        cli::Commands::Run(config) => {
            logging::init(&config.log_level);
            if let Err(e) = server::run(&config) {
                tracing::error!(error = %e, "fatal startup error");
                std::process::exit(1);
            }
        }
        cli::Commands::Help => cli::print_help(),
    }
}
