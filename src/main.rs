//! Binary entry point for `rmate-launcher`. See SPEC_FULL.md.

use clap::Parser;

use rmate_launcher::config::Config;
use rmate_launcher::{daemon, logging, signal};

/// Local launcher daemon for the rmate remote-editing protocol.
#[derive(Parser, Debug)]
#[command(name = "rmate-launcher", version, about, long_about = None)]
struct Cli {}

fn main() {
    let _cli = Cli::parse();

    logging::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let shutdown = match signal::install_signal_handlers() {
        Ok(flag) => flag,
        Err(err) => {
            tracing::error!(error = %err, "failed to install signal handlers");
            std::process::exit(1);
        }
    };

    if let Err(err) = daemon::run(config, shutdown) {
        tracing::error!(error = %err, "daemon exited with an error");
        std::process::exit(1);
    }
}
