pub mod ring;

use crate::cli::TracingFormat;
use crate::config::Config;
use ring::LogRing;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Configure and initialize logging for the application.
///
/// Stdout gets pretty or JSON output per the CLI flag; a compact copy of the
/// same stream is kept in the in-memory ring for the `/_/logs` endpoint.
/// `RUST_LOG` overrides the config-driven default filter.
pub fn setup_logging(config: &Config, format: TracingFormat, logs: LogRing) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let base_level = &config.log_level;
        EnvFilter::new(format!("warn,prefetchd={base_level}"))
    });

    match format {
        TracingFormat::Pretty => {
            let ring_layer = fmt::layer()
                .with_writer(logs)
                .with_ansi(false)
                .with_target(true)
                .compact();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .with(ring_layer)
                .init();
        }
        TracingFormat::Json => {
            let ring_layer = fmt::layer()
                .with_writer(logs)
                .with_ansi(false)
                .with_target(true)
                .compact();
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).json())
                .with(ring_layer)
                .init();
        }
    }
}
