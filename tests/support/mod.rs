//! Shared helpers: a stub upstream that records which pages were fetched.
#![allow(dead_code)]

use axum::Router;
use axum::extract::{Query, State};
use axum::routing::get;
use prefetchd::config::OriginConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// Per-(query, offset) hit counts recorded by the stub upstream.
#[derive(Clone, Default)]
pub struct Hits(Arc<Mutex<HashMap<(String, u64), usize>>>);

impl Hits {
    fn record(&self, query: String, offset: u64) {
        *self.0.lock().unwrap().entry((query, offset)).or_insert(0) += 1;
    }

    pub fn count(&self, query: &str, offset: u64) -> usize {
        self.0
            .lock()
            .unwrap()
            .get(&(query.to_owned(), offset))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.lock().unwrap().values().sum()
    }

    /// All offsets fetched for a query, sorted.
    pub fn offsets(&self, query: &str) -> Vec<u64> {
        let mut offsets: Vec<u64> = self
            .0
            .lock()
            .unwrap()
            .keys()
            .filter(|(q, _)| q == query)
            .map(|&(_, off)| off)
            .collect();
        offsets.sort_unstable();
        offsets
    }
}

#[derive(Clone, Default)]
pub struct UpstreamOptions {
    /// Artificial latency before answering, to keep fetches in flight.
    pub delay: Duration,
    /// Fixed body size per query; other queries echo `"{q}:{of}"`.
    pub sizes: HashMap<String, usize>,
    /// Refuse connections instead of serving: the address is reserved and
    /// released, so every GET fails at the transport level.
    pub refuse: bool,
}

pub struct Upstream {
    pub addr: SocketAddr,
    pub hits: Hits,
}

impl Upstream {
    /// URL template pointing at this stub.
    pub fn tmpl(&self) -> String {
        format!("http://{}/search?q={{query}}&of={{offset}}", self.addr)
    }
}

#[derive(Deserialize)]
struct Params {
    q: String,
    of: u64,
}

async fn serve_search(
    State((hits, options)): State<(Hits, Arc<UpstreamOptions>)>,
    Query(params): Query<Params>,
) -> Vec<u8> {
    hits.record(params.q.clone(), params.of);
    if !options.delay.is_zero() {
        tokio::time::sleep(options.delay).await;
    }
    match options.sizes.get(&params.q) {
        Some(&len) => vec![b'x'; len],
        None => format!("{}:{}", params.q, params.of).into_bytes(),
    }
}

/// Start a stub upstream on an ephemeral port. With `refuse` set, the port
/// is left closed and nothing ever answers.
pub async fn spawn_upstream(options: UpstreamOptions) -> Upstream {
    let hits = Hits::default();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    if options.refuse {
        drop(listener);
        return Upstream { addr, hits };
    }

    let router = Router::new()
        .route("/search", get(serve_search))
        .with_state((hits.clone(), Arc::new(options)));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Upstream { addr, hits }
}

/// Origin settings for tests: 60s TTL, GC effectively off, generous memory.
pub fn origin(tmpl: &str, incr: u64, npref: u32) -> OriginConfig {
    OriginConfig {
        name: "test".to_owned(),
        tmpl: tmpl.to_owned(),
        incr,
        npref,
        lifetime: Duration::from_secs(60),
        gcpause: Duration::from_secs(60),
        max_memory: 256 * 1024 * 1024,
    }
}

/// Poll `condition` every 10ms until it holds or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
