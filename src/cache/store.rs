//! In-memory page store: a two-level map keyed by query, then byte offset.
//!
//! The store does no locking of its own. Every call comes from the cache
//! engine's command loop, which serializes all mutations.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// A cached page body with its absolute expiration time.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub body: Bytes,
    pub deadline: DateTime<Utc>,
}

impl Entry {
    pub(crate) fn new(body: Bytes, lifetime: Duration) -> Self {
        Self {
            body,
            deadline: Utc::now() + lifetime,
        }
    }

    /// An entry is expired once its deadline is no longer in the future.
    pub(crate) fn expired(&self, t: DateTime<Utc>) -> bool {
        self.deadline <= t
    }
}

/// Two-level mapping `query -> offset -> Entry`.
///
/// A query key exists iff it has at least one live entry; removal paths prune
/// empty inner maps so iteration never sees hollow queries.
#[derive(Debug, Default)]
pub(crate) struct PageStore {
    pages: HashMap<String, HashMap<u64, Entry>>,
}

impl PageStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Total number of live entries across all queries.
    pub(crate) fn count(&self) -> usize {
        self.pages.values().map(HashMap::len).sum()
    }

    pub(crate) fn get(&self, query: &str, offset: u64) -> Option<&Entry> {
        self.pages.get(query)?.get(&offset)
    }

    pub(crate) fn has(&self, query: &str, offset: u64) -> bool {
        self.pages
            .get(query)
            .is_some_and(|pages| pages.contains_key(&offset))
    }

    /// Insert an entry, creating the inner map on demand.
    ///
    /// Returns the replaced entry, if any, so the caller can keep its memory
    /// accounting exact.
    pub(crate) fn put(&mut self, query: &str, offset: u64, entry: Entry) -> Option<Entry> {
        self.pages
            .entry(query.to_owned())
            .or_default()
            .insert(offset, entry)
    }

    /// Remove a single entry, pruning the query key if it becomes empty.
    pub(crate) fn remove(&mut self, query: &str, offset: u64) -> Option<Entry> {
        let pages = self.pages.get_mut(query)?;
        let removed = pages.remove(&offset);
        if pages.is_empty() {
            self.pages.remove(query);
        }
        removed
    }

    /// Drop a whole query. Returns the number of body bytes freed.
    pub(crate) fn purge(&mut self, query: &str) -> i64 {
        let freed = self.sizeof(query);
        self.pages.remove(query);
        freed
    }

    /// Sum of body lengths across a query's entries.
    pub(crate) fn sizeof(&self, query: &str) -> i64 {
        self.pages
            .get(query)
            .map(|pages| pages.values().map(|e| e.body.len() as i64).sum())
            .unwrap_or(0)
    }

    /// Minimum deadline across a query's entries. `None` for an absent query.
    pub(crate) fn oldest_deadline(&self, query: &str) -> Option<DateTime<Utc>> {
        self.pages.get(query)?.values().map(|e| e.deadline).min()
    }

    /// All query keys with their oldest deadline, for eviction ranking.
    pub(crate) fn deadlines(&self) -> Vec<(String, DateTime<Utc>)> {
        self.pages
            .keys()
            .filter_map(|q| Some((q.clone(), self.oldest_deadline(q)?)))
            .collect()
    }

    /// Single pass removing every entry with `deadline <= now`.
    ///
    /// Returns the number of body bytes freed.
    pub(crate) fn gc(&mut self, now: DateTime<Utc>) -> i64 {
        let expired: Vec<(String, u64)> = self
            .pages
            .iter()
            .flat_map(|(query, pages)| {
                pages
                    .iter()
                    .filter(|(_, entry)| entry.expired(now))
                    .map(move |(&offset, _)| (query.clone(), offset))
            })
            .collect();

        let mut freed = 0i64;
        for (query, offset) in expired {
            if let Some(entry) = self.remove(&query, offset) {
                freed += entry.body.len() as i64;
            }
        }
        freed
    }
}
