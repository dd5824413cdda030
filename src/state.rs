//! Application state shared across the web handlers.

use crate::cache::PageCache;
use crate::logging::ring::LogRing;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable after startup: one cache per configured origin plus the log
/// ring for the dump endpoint. Clone-cheap.
#[derive(Clone)]
pub struct AppState {
    origins: Arc<HashMap<String, PageCache>>,
    pub logs: LogRing,
}

impl AppState {
    pub fn new(origins: HashMap<String, PageCache>, logs: LogRing) -> Self {
        Self {
            origins: Arc::new(origins),
            logs,
        }
    }

    /// Look up an origin's cache by its path name.
    pub fn origin(&self, name: &str) -> Option<&PageCache> {
        self.origins.get(name)
    }
}
