//! Fixed worker pool draining a bounded fetch queue.
//!
//! The queue is the only channel shared across origins, and its bound is the
//! system's backpressure lever: when upstream is saturated, `request` blocks
//! the enqueuing engine instead of letting jobs accumulate without limit.
//! Workers run until the process exits and always deliver a result back to
//! the owning cache, success or failure, so waiters are never stranded.

use crate::cache::PageCache;
use crate::utils::fmt_duration;
use anyhow::Result;
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Idle-connection reuse tuning for the upstream client. Not contractual.
const MAX_IDLE_PER_HOST: usize = 10;
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading body from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A resolved upstream URL, remembering which page it stands for.
#[derive(Debug, Clone)]
pub(crate) struct PageUrl {
    url: String,
    query: String,
    offset: u64,
}

impl PageUrl {
    /// Expand a URL template, substituting the URL-escaped query for
    /// `{query}` and the integer offset for `{offset}`.
    pub(crate) fn new(tmpl: &str, query: &str, offset: u64) -> Self {
        let url = tmpl
            .replace("{query}", &urlencoding::encode(query))
            .replace("{offset}", &offset.to_string());
        Self {
            url,
            query: query.to_owned(),
            offset,
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// A fetch descriptor: where to GET and which cache receives the result.
pub(crate) struct FetchJob {
    url: PageUrl,
    cache: PageCache,
}

impl FetchJob {
    pub(crate) fn new(url: PageUrl, cache: PageCache) -> Self {
        Self { url, cache }
    }
}

/// Handle to the shared fetch pool. Cloned into every origin's engine.
#[derive(Clone)]
pub struct Fetcher {
    jobs: async_channel::Sender<FetchJob>,
}

impl Fetcher {
    /// Start `workers` executor tasks sharing one bounded job queue and one
    /// upstream HTTP client.
    pub fn new(workers: usize, queue: usize) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build()
            .expect("failed to build upstream HTTP client");

        let (jobs, feed) = async_channel::bounded(queue.max(1));
        for id in 0..workers {
            tokio::spawn(run_worker(id, feed.clone(), client.clone()));
        }
        Self { jobs }
    }

    /// Enqueue a job, waiting for space when the queue is full.
    pub(crate) async fn request(&self, job: FetchJob) -> Result<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("fetch queue is closed"))
    }
}

async fn run_worker(id: usize, jobs: async_channel::Receiver<FetchJob>, client: reqwest::Client) {
    debug!(worker_id = id, "fetch worker started");
    while let Ok(FetchJob { url, cache }) = jobs.recv().await {
        let start = Instant::now();
        match fetch(&client, url.as_str()).await {
            Ok(body) => {
                debug!(
                    worker_id = id,
                    url = %url,
                    bytes = body.len(),
                    duration = fmt_duration(start.elapsed()),
                    "page fetched"
                );
                cache.put(url.query, url.offset, body, false).await;
            }
            Err(error) => {
                warn!(worker_id = id, url = %url, %error, "upstream fetch failed");
                // Deliver the failure too; the engine releases the waiters.
                cache.put(url.query, url.offset, Bytes::new(), true).await;
            }
        }
    }
    debug!(worker_id = id, "fetch worker stopped");
}

/// GET the URL and read the whole body into memory.
///
/// Non-2xx statuses are not failures here: whatever the upstream answers is
/// the page body, error pages included.
async fn fetch(client: &reqwest::Client, url: &str) -> Result<Bytes, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_owned(),
            source,
        })?;
    response.bytes().await.map_err(|source| FetchError::Body {
        url: url.to_owned(),
        source,
    })
}
