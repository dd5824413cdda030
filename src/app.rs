//! Application wiring: config to caches to HTTP server.

use crate::cache::PageCache;
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::logging::ring::LogRing;
use crate::state::AppState;
use crate::utils::fmt_duration;
use crate::web;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tracing::info;

pub struct App {
    config: Config,
    state: AppState,
}

impl App {
    /// Build the shared fetch pool and one cache engine per origin.
    pub fn new(config: Config, logs: LogRing) -> Result<Self> {
        config.validate()?;

        let fetcher = Fetcher::new(config.fetcher.workers, config.fetcher.queue);
        info!(
            workers = config.fetcher.workers,
            queue = config.fetcher.queue,
            "fetch pool started"
        );

        let mut origins = HashMap::new();
        for origin in &config.origins {
            info!(
                origin = %origin.name,
                incr = origin.incr,
                npref = origin.npref,
                lifetime = fmt_duration(origin.lifetime),
                gcpause = fmt_duration(origin.gcpause),
                max_memory = origin.max_memory,
                "origin configured"
            );
            origins.insert(
                origin.name.clone(),
                PageCache::new(origin.clone(), fetcher.clone()),
            );
        }

        let state = AppState::new(origins, logs);
        Ok(Self { config, state })
    }

    /// Serve HTTP until SIGINT or SIGTERM.
    ///
    /// Cache engines and fetch workers are detached tasks; they die with the
    /// process once the listener has drained.
    pub async fn run(self) -> Result<()> {
        let router = web::create_router(self.state);
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen))?;
        info!(addr = %self.config.listen, "listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("http server failed")
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
