use clap::Parser;
use prefetchd::app::App;
use prefetchd::cli::Args;
use prefetchd::config;
use prefetchd::logging::ring::LogRing;
use prefetchd::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

/// Bytes of recent log output kept for the `/_/logs` endpoint.
const LOG_RING_CAPACITY: usize = 64 * 1024;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Load config before logging setup so the chosen level applies from the
    // first line; config errors go to stderr directly.
    let config = match config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("prefetchd: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let logs = LogRing::new(LOG_RING_CAPACITY);
    setup_logging(&config, args.tracing, logs.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        origins = config.origins.len(),
        "starting prefetchd"
    );

    let app = match App::new(config, logs) {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "failed to initialize");
            return ExitCode::FAILURE;
        }
    };

    match app.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
