//! Single-flight signaling: one broadcast-once channel per pending fetch.
//!
//! While a fetch for `(query, offset)` is in flight, a `watch` sender is
//! registered here. Every caller interested in that page subscribes to the
//! same sender, so concurrent demand coalesces onto one upstream request.
//! `done` flips the value and drops the sender, waking all subscribers at
//! once. Signals are single-use; a later fetch installs a fresh one.
//!
//! Like [`super::store::PageStore`], this structure is only ever touched from
//! the engine's command loop.

use std::collections::HashMap;
use tokio::sync::watch;

#[derive(Debug, Default)]
pub(crate) struct Waiters {
    waits: HashMap<String, HashMap<u64, watch::Sender<bool>>>,
}

impl Waiters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Total number of pending fetches.
    pub(crate) fn count(&self) -> usize {
        self.waits.values().map(HashMap::len).sum()
    }

    /// Subscribe to the signal for `(query, offset)`, installing it first if
    /// no fetch is pending there. Subscribing is idempotent: concurrent
    /// callers all receive handles to the same signal.
    pub(crate) fn subscribe(&mut self, query: &str, offset: u64) -> watch::Receiver<bool> {
        self.waits
            .entry(query.to_owned())
            .or_default()
            .entry(offset)
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    pub(crate) fn has(&self, query: &str, offset: u64) -> bool {
        self.waits
            .get(query)
            .is_some_and(|waits| waits.contains_key(&offset))
    }

    /// Close the signal for `(query, offset)` and forget it. No-op when no
    /// fetch is pending there. Empty inner maps are pruned.
    pub(crate) fn done(&mut self, query: &str, offset: u64) {
        let Some(waits) = self.waits.get_mut(query) else {
            return;
        };
        if let Some(signal) = waits.remove(&offset) {
            signal.send_replace(true);
        }
        if waits.is_empty() {
            self.waits.remove(query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let mut waiters = Waiters::new();
        let a = waiters.subscribe("q", 0);
        let b = waiters.subscribe("q", 0);
        assert!(a.same_channel(&b));
        assert_eq!(waiters.count(), 1);

        let other = waiters.subscribe("q", 10);
        assert!(!a.same_channel(&other));
        assert_eq!(waiters.count(), 2);
    }

    #[tokio::test]
    async fn done_wakes_all_subscribers() {
        let mut waiters = Waiters::new();
        let mut a = waiters.subscribe("q", 0);
        let mut b = waiters.subscribe("q", 0);

        waiters.done("q", 0);
        assert!(!waiters.has("q", 0));

        // Both observe readiness even though they wait after the close.
        assert!(a.wait_for(|done| *done).await.is_ok());
        assert!(b.wait_for(|done| *done).await.is_ok());
    }

    #[test]
    fn done_without_pending_fetch_is_noop() {
        let mut waiters = Waiters::new();
        waiters.done("q", 0);
        assert_eq!(waiters.count(), 0);
    }

    #[test]
    fn done_prunes_empty_queries() {
        let mut waiters = Waiters::new();
        waiters.subscribe("q", 0);
        waiters.subscribe("q", 10);

        waiters.done("q", 0);
        assert!(waiters.has("q", 10));

        waiters.done("q", 10);
        assert_eq!(waiters.count(), 0);
        // A new subscribe after the prune installs a fresh signal.
        let fresh = waiters.subscribe("q", 0);
        assert!(!*fresh.borrow());
    }
}
