//! Configuration loading and validation.
//!
//! Settings merge in order: built-in defaults, an optional TOML file, then
//! `PREFETCHD_`-prefixed environment variables (`__` separates nesting, e.g.
//! `PREFETCHD_FETCHER__WORKERS=4`). Durations accept humantime strings like
//! `"5m"` or `"90s"`.

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

fn default_listen() -> String {
    "0.0.0.0:8383".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_workers() -> usize {
    10
}

fn default_queue() -> usize {
    20
}

fn default_npref() -> u32 {
    4
}

fn default_lifetime() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_gcpause() -> Duration {
    Duration::from_secs(20)
}

fn default_max_memory() -> i64 {
    256 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address the HTTP server binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Base log level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    /// Origins served by this instance, each with its own cache.
    #[serde(default, rename = "origin")]
    pub origins: Vec<OriginConfig>,
}

/// Shared fetch pool sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Parallel fetch executors.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded job queue depth; a full queue blocks enqueuing.
    #[serde(default = "default_queue")]
    pub queue: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue: default_queue(),
        }
    }
}

/// Per-origin cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
    /// Path prefix this origin is served under.
    pub name: String,
    /// Upstream URL template with `{query}` and `{offset}` placeholders.
    pub tmpl: String,
    /// Offset stride per page index.
    pub incr: u64,
    /// Read-ahead radius in pages.
    #[serde(default = "default_npref")]
    pub npref: u32,
    /// Entry TTL.
    #[serde(default = "default_lifetime", with = "humantime_serde")]
    pub lifetime: Duration,
    /// Interval between GC sweeps.
    #[serde(default = "default_gcpause", with = "humantime_serde")]
    pub gcpause: Duration,
    /// Soft ceiling on total cached bytes; 0 disables eviction.
    #[serde(default = "default_max_memory")]
    pub max_memory: i64,
}

/// Load and validate configuration. A missing file is fine (defaults plus
/// environment), a malformed one is not.
pub fn load(path: &Path) -> Result<Config> {
    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("PREFETCHD_").split("__"))
        .extract()
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.origins.is_empty() {
            bail!("no origins configured");
        }
        if self.fetcher.workers == 0 {
            bail!("fetcher.workers must be at least 1");
        }

        let mut names = HashSet::new();
        for origin in &self.origins {
            if origin.name.is_empty() {
                bail!("origin with empty name");
            }
            if !names.insert(origin.name.as_str()) {
                bail!("duplicate origin name {:?}", origin.name);
            }
            if origin.incr == 0 {
                bail!("origin {:?}: incr must be greater than zero", origin.name);
            }
            if !origin.tmpl.contains("{query}") || !origin.tmpl.contains("{offset}") {
                bail!(
                    "origin {:?}: tmpl must contain {{query}} and {{offset}} placeholders",
                    origin.name
                );
            }
            if origin.gcpause.is_zero() {
                bail!("origin {:?}: gcpause must be non-zero", origin.name);
            }
        }
        Ok(())
    }
}
