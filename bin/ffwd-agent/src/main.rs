//! ffwd agent.
//!
//! Loads configuration, initializes logging, and runs the agent until it is asked to stop.

#![deny(warnings)]
#![deny(missing_docs)]

use clap::Parser as _;
use ffwd_app::prelude::*;
use tracing::{error, info};

mod cli;
use self::cli::{config::handle_config_command, load_configuration, run::handle_run_command, Action, Cli};

fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(cli.config_file.as_deref())
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:?}", e)));
    let logging_config = LoggingConfiguration::try_from_config(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to read logging configuration: {:?}", e)));

    match cli.action.unwrap_or_default() {
        Action::Run => {
            let _guard = initialize_logging(&logging_config)
                .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {:?}", e)));

            info!(version = env!("FFWD_VERSION"), "ffwd agent starting...");
            let exit_code = match handle_run_command(&configuration) {
                Ok(()) => {
                    info!("ffwd agent stopped.");
                    0
                }
                Err(e) => {
                    error!("{:?}", e);
                    1
                }
            };

            // Flush buffered log lines before exiting.
            drop(_guard);
            std::process::exit(exit_code);
        }
        Action::Config => {
            if let Err(e) = handle_config_command(&configuration) {
                fatal_and_exit(format!("{:?}", e));
            }
        }
    }
}
