//! Running counters for one origin's cache, snapshotted on demand.

use serde::Serialize;

/// Counter record kept by the cache engine and cloned for snapshots.
///
/// `entries` and `waiters` are refreshed from the live tables when a snapshot
/// is taken; the rest accumulate as traffic flows.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Live entries across all queries.
    pub entries: usize,
    /// Pending fetches.
    pub waiters: usize,
    /// Total `get` calls resolved.
    pub requests: u64,
    /// Requests satisfied from an already-present, valid entry.
    pub cached: u64,
    /// Sum of body lengths over live entries, in bytes.
    pub mem: i64,
}

impl CacheStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_mem(&mut self, delta: i64) {
        self.mem += delta;
    }

    /// Record a resolved request; `cached` is whether the caller found the
    /// page present on its first lookup.
    pub(crate) fn hit(&mut self, cached: bool) {
        if cached {
            self.cached += 1;
        }
        self.requests += 1;
    }

    pub(crate) fn above(&self, limit: i64) -> bool {
        self.mem >= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_counts_requests_and_cached() {
        let mut stats = CacheStats::new();
        stats.hit(true);
        stats.hit(false);
        stats.hit(true);
        assert_eq!(stats.requests, 3);
        assert_eq!(stats.cached, 2);
    }

    #[test]
    fn mem_deltas_accumulate() {
        let mut stats = CacheStats::new();
        stats.add_mem(100);
        stats.add_mem(-30);
        assert_eq!(stats.mem, 70);
        assert!(stats.above(70));
        assert!(!stats.above(71));
    }

    #[test]
    fn snapshot_is_detached() {
        let mut stats = CacheStats::new();
        stats.hit(true);
        let snapshot = stats.clone();
        stats.hit(true);
        assert_eq!(snapshot.requests, 1);
        assert_eq!(stats.requests, 2);
    }
}
