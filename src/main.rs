use std::process::ExitCode;
use std::sync::Arc;

use clap::{crate_authors, crate_version};
use orr::center::Center;
use orr::config::Config;
use orr::log::Logger;
use orr::store::ConfigStore;

fn main() -> ExitCode {
    // Set up the command-line interface.
    let cmd = clap::Command::new("orrd").version(crate_version!()).author(crate_authors!()).next_line_help(true);
    let cmd = Config::setup_cli(cmd);
    let matches = cmd.get_matches();

    // Construct the configuration, falling back to stderr logging until the
    // configured target is known.
    let mut config = match Config::init(&matches) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("orrd couldn't be configured: {error}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = config.init_from_file() {
        eprintln!("orrd couldn't be configured: {error}");
        return ExitCode::FAILURE;
    }

    let logger = match Logger::launch(&config.logging) {
        Ok(logger) => logger,
        Err(error) => {
            eprintln!("orrd couldn't start logging: {error}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("Couldn't start Tokio: {error}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let store = match ConfigStore::open(&config.db_path).await {
            Ok(store) => store,
            Err(error) => {
                tracing::error!(%error, "Could not open the config store");
                return ExitCode::FAILURE;
            }
        };

        let center = Arc::new(Center::new(config, store, logger));

        if let Err(error) = center.spawn_all().await {
            tracing::error!(%error, "Failed to start clusters");
            return ExitCode::FAILURE;
        }

        let result = match tokio::signal::ctrl_c().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                tracing::error!(%error, "Listening for CTRL-C (SIGINT) failed");
                ExitCode::FAILURE
            }
        };

        center.shutdown().await;
        result
    })
}
