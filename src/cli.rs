use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Caching reverse proxy for paginated upstream search results.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short, default_value = "prefetchd.toml")]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty)]
    pub tracing: TracingFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    Pretty,
    Json,
}
