//! Coalescing, TTL-bound, memory-bounded page cache with read-ahead.
//!
//! All cache state (store, waiters, counters) is owned by a single engine
//! task and mutated only while handling commands from its channel, one at a
//! time. That command loop is the sole serialization mechanism: presence
//! checks and waiter installation happen in the same step, which is what
//! guarantees at most one in-flight fetch per `(query, offset)` no matter how
//! many callers race.
//!
//! Handlers must not submit commands back to their own loop; paths that need
//! a follow-up step (the memory-limit eviction after an insert) dispatch it
//! from a freshly spawned task instead.

mod stats;
mod store;
mod waiters;

pub use stats::CacheStats;

use crate::config::OriginConfig;
use crate::fetch::{FetchJob, Fetcher, PageUrl};
use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;
use store::{Entry, PageStore};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use waiters::Waiters;

/// A page as served to the router: body bytes, expiration, and whether the
/// caller found it already cached on its first lookup.
#[derive(Debug, Clone)]
pub struct Page {
    pub body: Bytes,
    pub expire: DateTime<Utc>,
    pub cached: bool,
}

/// Outcome of a lookup step: either a fresh page, or a signal to wait on
/// while the fetch completes.
enum Lookup {
    Hit(Page),
    Pending(watch::Receiver<bool>),
}

enum Command {
    Lookup {
        query: String,
        index: u32,
        /// Whether this is the caller's first attempt; a hit only counts as
        /// "cached" when the page was present before any waiting.
        first_attempt: bool,
        reply: oneshot::Sender<Lookup>,
    },
    Insert {
        query: String,
        offset: u64,
        body: Bytes,
        failed: bool,
    },
    Snapshot {
        reply: oneshot::Sender<CacheStats>,
    },
    Sweep {
        done: oneshot::Sender<()>,
    },
    Evict,
}

/// Handle to one origin's cache engine. Cheap to clone; all methods funnel
/// through the engine's command channel.
#[derive(Clone)]
pub struct PageCache {
    commands: mpsc::Sender<Command>,
}

impl PageCache {
    /// Spawn the engine task and its GC ticker for one configured origin.
    pub fn new(config: OriginConfig, fetcher: Fetcher) -> Self {
        let (commands, rx) = mpsc::channel(1);
        let gcpause = config.gcpause;

        let engine = Engine {
            config,
            fetcher,
            commands: commands.clone(),
            store: PageStore::new(),
            waits: Waiters::new(),
            stats: CacheStats::new(),
        };
        tokio::spawn(engine.run(rx));
        tokio::spawn(gc_ticker(commands.clone(), gcpause));

        Self { commands }
    }

    /// Fetch page `index` for `query`, from cache or upstream. Blocks until
    /// a body is available; a failed fetch yields an empty body rather than
    /// an error.
    ///
    /// Errors only when the engine task itself is gone.
    pub async fn get(&self, query: &str, index: u32) -> Result<Page> {
        let mut first_attempt = true;
        loop {
            let (reply, outcome) = oneshot::channel();
            self.commands
                .send(Command::Lookup {
                    query: query.to_owned(),
                    index,
                    first_attempt,
                    reply,
                })
                .await
                .context("cache engine is gone")?;

            match outcome.await.context("cache engine dropped a lookup")? {
                Lookup::Hit(page) => return Ok(page),
                Lookup::Pending(mut ready) => {
                    first_attempt = false;
                    // A dropped sender counts as completion too; either way
                    // the next lookup re-checks the store rather than trusting
                    // the signal, since the entry may have expired or been
                    // evicted in between.
                    let _ = ready.wait_for(|done| *done).await;
                }
            }
        }
    }

    /// Deliver a fetch result. Called by fetch workers, not users; always
    /// invoked, success or failure, so pending waiters are released.
    pub(crate) async fn put(&self, query: String, offset: u64, body: Bytes, failed: bool) {
        let _ = self
            .commands
            .send(Command::Insert {
                query,
                offset,
                body,
                failed,
            })
            .await;
    }

    /// Snapshot the counters, refreshing entry and waiter totals first.
    pub async fn stats(&self) -> Result<CacheStats> {
        let (reply, snapshot) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .context("cache engine is gone")?;
        snapshot.await.context("cache engine dropped a snapshot")
    }
}

struct Engine {
    config: OriginConfig,
    fetcher: Fetcher,
    /// Clone of our own command sender, handed to fetch jobs (results come
    /// back as `Insert`) and to the spawned eviction trigger.
    commands: mpsc::Sender<Command>,
    store: PageStore,
    waits: Waiters,
    stats: CacheStats,
}

impl Engine {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        debug!(origin = %self.config.name, "cache engine stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Lookup {
                query,
                index,
                first_attempt,
                reply,
            } => {
                let outcome = self.lookup(&query, index, first_attempt).await;
                let _ = reply.send(outcome);
            }
            Command::Insert {
                query,
                offset,
                body,
                failed,
            } => self.insert(query, offset, body, failed),
            Command::Snapshot { reply } => {
                self.stats.entries = self.store.count();
                self.stats.waiters = self.waits.count();
                let _ = reply.send(self.stats.clone());
            }
            Command::Sweep { done } => {
                debug!(origin = %self.config.name, mem = self.stats.mem, "gc sweep starting");
                let freed = self.store.gc(Utc::now());
                self.stats.add_mem(-freed);
                debug!(origin = %self.config.name, freed, mem = self.stats.mem, "gc sweep done");
                let _ = done.send(());
            }
            Command::Evict => self.evict(),
        }
    }

    async fn lookup(&mut self, query: &str, index: u32, first_attempt: bool) -> Lookup {
        let offset = index as u64 * self.config.incr;
        let now = Utc::now();

        match self.store.get(query, offset) {
            Some(entry) if !entry.expired(now) => {
                let page = Page {
                    body: entry.body.clone(),
                    expire: entry.deadline,
                    cached: first_attempt,
                };
                self.read_ahead(query, index).await;
                self.stats.hit(first_attempt);
                debug!(query, offset, "page found");
                Lookup::Hit(page)
            }
            _ => {
                debug!(query, offset, "page not cached, fetching");
                Lookup::Pending(self.request(query, index).await)
            }
        }
    }

    /// Install a waiter for the demanded page, enqueue its fetch, and kick
    /// off read-ahead for the neighborhood.
    async fn request(&mut self, query: &str, index: u32) -> watch::Receiver<bool> {
        let offset = index as u64 * self.config.incr;
        let ready = self.waits.subscribe(query, offset);
        self.enqueue_fetch(query, offset).await;
        self.read_ahead(query, index).await;
        ready
    }

    /// Speculatively fetch the pages around `index` that are neither cached
    /// nor already being fetched. Waiters are installed here, in the same
    /// command step as the presence checks, so later demand coalesces.
    async fn read_ahead(&mut self, query: &str, index: u32) {
        for i in neighborhood(index, self.config.npref) {
            let offset = i as u64 * self.config.incr;
            if self.store.has(query, offset) || self.waits.has(query, offset) {
                continue;
            }
            self.waits.subscribe(query, offset);
            self.enqueue_fetch(query, offset).await;
        }
    }

    async fn enqueue_fetch(&self, query: &str, offset: u64) {
        let url = PageUrl::new(&self.config.tmpl, query, offset);
        let job = FetchJob::new(
            url,
            PageCache {
                commands: self.commands.clone(),
            },
        );
        if let Err(error) = self.fetcher.request(job).await {
            warn!(query, offset, %error, "failed to enqueue fetch");
        }
    }

    fn insert(&mut self, query: String, offset: u64, body: Bytes, failed: bool) {
        // Failed fetches are inserted too (with whatever body they produced,
        // usually empty). The entry acts as a negative cache for `lifetime`
        // and lets waiters find something on their re-check.
        let added = body.len() as i64;
        let entry = Entry::new(body, self.config.lifetime);
        if let Some(replaced) = self.store.put(&query, offset, entry) {
            self.stats.add_mem(-(replaced.body.len() as i64));
        }
        self.stats.add_mem(added);
        debug!(query, offset, bytes = added, failed, "page added");

        if self.config.max_memory > 0 && self.stats.above(self.config.max_memory) {
            // Never submit to our own loop from inside a handler; a parallel
            // task delivers the eviction command once this step finishes.
            let commands = self.commands.clone();
            tokio::spawn(async move {
                let _ = commands.send(Command::Evict).await;
            });
        }

        self.waits.done(&query, offset);
    }

    /// Evict whole queries, oldest first by each query's oldest deadline,
    /// until memory drops below the limit or nothing is left.
    fn evict(&mut self) {
        debug!(
            origin = %self.config.name,
            mem = self.stats.mem,
            limit = self.config.max_memory,
            "memory limit reached, evicting"
        );
        let mut queries = self.store.deadlines();
        // Descending by deadline, so the query with the oldest pages is last.
        queries.sort_by(|a, b| b.1.cmp(&a.1));

        while let Some((query, _)) = queries.pop() {
            let freed = self.store.purge(&query);
            self.stats.add_mem(-freed);
            debug!(origin = %self.config.name, query = %query, freed, "query evicted");
            if !self.stats.above(self.config.max_memory) {
                break;
            }
        }
        debug!(origin = %self.config.name, mem = self.stats.mem, "eviction done");
    }
}

/// Page indexes to read ahead around `index`: every `i` in
/// `[index - radius, index + radius)` clamped at zero, skipping `index`
/// itself. The window is deliberately asymmetric, one short on the upper
/// side, since the demanded page covers the center.
fn neighborhood(index: u32, radius: u32) -> impl Iterator<Item = u32> {
    let low = index.saturating_sub(radius);
    let high = index.saturating_add(radius);
    (low..high).filter(move |&i| i != index)
}

/// Periodically submit a GC sweep, waiting for each sweep to finish before
/// sleeping again so slow sweeps don't pile up.
async fn gc_ticker(commands: mpsc::Sender<Command>, pause: Duration) {
    loop {
        tokio::time::sleep(pause).await;
        let (done, swept) = oneshot::channel();
        if commands.send(Command::Sweep { done }).await.is_err() {
            break;
        }
        if swept.await.is_err() {
            break;
        }
    }
}
