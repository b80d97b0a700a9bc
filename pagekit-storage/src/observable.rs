//! Lock-guarded page store with snapshot publication.
//!
//! Writers choose per mutation whether the result becomes visible. Visible
//! mutations publish a fresh [`PageSnapshot`] on a `watch` channel, which
//! replays the latest snapshot to new subscribers. Publication happens while
//! the write lock is held, so published versions never go backwards.
//!
//! Every mutation also reports a [`PageEvent`] on a broadcast channel and to
//! an optional callback. Events are emitted after the lock is released and
//! are not atomic with the snapshot a concurrent reader observes.

use crate::page_store::{IdentityFn, PageStore};
use pagekit_core::{ItemIdentity, Page, PageEvent, PageItem, PageKey, PageSnapshot, StoreError};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, watch};
use tracing::trace;

/// Synchronous page lifecycle observer.
pub type PageEventCallback<K> = Arc<dyn Fn(&PageEvent<K>) + Send + Sync>;

pub struct ObservablePageStore<K, T, I> {
    store: RwLock<PageStore<K, T, I>>,
    published: watch::Sender<PageSnapshot<K, T>>,
    events: broadcast::Sender<PageEvent<K>>,
    callback: Option<PageEventCallback<K>>,
}

impl<K, T, I> ObservablePageStore<K, T, I>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
{
    /// Create a store reporting lifecycle events to `events` and `callback`.
    pub fn new(
        identity: IdentityFn<T, I>,
        events: broadcast::Sender<PageEvent<K>>,
        callback: Option<PageEventCallback<K>>,
    ) -> Self {
        let (published, _) = watch::channel(PageSnapshot::empty());
        Self {
            store: RwLock::new(PageStore::new(identity)),
            published,
            events,
            callback,
        }
    }

    /// Create a store with its own lifecycle channel and no callback.
    pub fn standalone(identity: IdentityFn<T, I>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self::new(identity, events, None)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, PageStore<K, T, I>>, StoreError> {
        self.store
            .read()
            .map_err(|_| StoreError::LockPoisoned { resource: "pages" })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PageStore<K, T, I>>, StoreError> {
        self.store
            .write()
            .map_err(|_| StoreError::LockPoisoned { resource: "pages" })
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Store `items` as the content of `key`.
    pub fn update_page(&self, key: K, items: Vec<T>, publish: bool) -> Result<(), StoreError> {
        {
            let mut store = self.write()?;
            trace!(key = ?key, items = items.len(), publish, "Storing page");
            store.set(key.clone(), items);
            if publish {
                self.published.send_replace(store.all());
            }
        }
        self.notify(PageEvent::Loaded(key));
        Ok(())
    }

    /// Remove the page for `key`. Returns whether a page was cached.
    ///
    /// `Unloaded` is only reported when a page was actually removed.
    pub fn remove_page(&self, key: &K, publish: bool) -> Result<bool, StoreError> {
        let removed = {
            let mut store = self.write()?;
            let removed = store.remove(key).is_some();
            trace!(key = ?key, removed, publish, "Removing page");
            if publish {
                self.published.send_replace(store.all());
            }
            removed
        };
        if removed {
            self.notify(PageEvent::Unloaded(key.clone()));
        }
        Ok(removed)
    }

    /// Remove every page, reporting `Unloaded` for each.
    pub fn clear(&self, publish: bool) -> Result<(), StoreError> {
        let keys = {
            let mut store = self.write()?;
            let keys = store.clear();
            if publish {
                self.published.send_replace(store.all());
            }
            keys
        };
        trace!(pages = keys.len(), publish, "Cleared page store");
        for key in keys {
            self.notify(PageEvent::Unloaded(key));
        }
        Ok(())
    }

    /// Report a lifecycle event to the broadcast channel and the callback.
    pub fn notify(&self, event: PageEvent<K>) {
        if let Some(callback) = &self.callback {
            callback(&event);
        }
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn get(&self, key: &K) -> Result<Option<Page<T>>, StoreError> {
        Ok(self.read()?.get(key))
    }

    pub fn contains(&self, key: &K) -> Result<bool, StoreError> {
        Ok(self.read()?.contains(key))
    }

    pub fn keys(&self) -> Result<Vec<K>, StoreError> {
        Ok(self.read()?.keys())
    }

    /// Reads the live reverse index, bypassing published snapshots.
    pub fn key_for_item(&self, item: &T) -> Result<Option<K>, StoreError> {
        Ok(self.read()?.key_for_item(item))
    }

    /// Copy of the current content, including unpublished mutations.
    pub fn snapshot(&self) -> Result<PageSnapshot<K, T>, StoreError> {
        Ok(self.read()?.all())
    }

    /// The last published snapshot.
    pub fn published(&self) -> PageSnapshot<K, T> {
        self.published.borrow().clone()
    }

    /// Receiver that immediately sees the last published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PageSnapshot<K, T>> {
        self.published.subscribe()
    }

    /// Receiver for lifecycle events emitted from now on.
    pub fn page_events(&self) -> broadcast::Receiver<PageEvent<K>> {
        self.events.subscribe()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn store() -> ObservablePageStore<u32, String, String> {
        ObservablePageStore::standalone(Arc::new(|s: &String| s.clone()), 16)
    }

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unpublished_update_is_live_but_not_published() {
        let store = store();
        store
            .update_page(1, items(&["a"]), false)
            .expect("update should succeed");

        assert!(store.contains(&1).expect("contains should succeed"));
        assert!(store.snapshot().expect("snapshot should succeed").contains_key(&1));
        assert!(store.published().is_empty());
    }

    #[test]
    fn test_published_versions_increase() {
        let store = store();
        store.update_page(1, items(&["a"]), true).expect("update should succeed");
        let first = store.published().version();
        store.update_page(2, items(&["b"]), true).expect("update should succeed");
        let second = store.published().version();
        assert!(second > first);
    }

    #[test]
    fn test_key_for_item_reads_live_store() {
        let store = store();
        store
            .update_page(3, items(&["x", "y"]), false)
            .expect("update should succeed");
        assert_eq!(
            store.key_for_item(&"y".to_string()).expect("lookup should succeed"),
            Some(3)
        );
        store.remove_page(&3, true).expect("remove should succeed");
        assert_eq!(
            store.key_for_item(&"y".to_string()).expect("lookup should succeed"),
            None
        );
    }

    #[tokio::test]
    async fn test_subscriber_replays_latest_snapshot() {
        let store = store();
        store.update_page(1, items(&["a"]), true).expect("update should succeed");
        store.update_page(2, items(&["b"]), true).expect("update should succeed");

        let rx = store.subscribe();
        let latest = rx.borrow().clone();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest.flatten(&[1, 2]), items(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let store = store();
        let mut events = store.page_events();

        store.update_page(1, items(&["a"]), true).expect("update should succeed");
        store.remove_page(&1, true).expect("remove should succeed");
        // Nothing cached for 2, nothing reported.
        store.remove_page(&2, true).expect("remove should succeed");
        store.update_page(3, items(&["c"]), false).expect("update should succeed");
        store.clear(true).expect("clear should succeed");

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                PageEvent::Loaded(1),
                PageEvent::Unloaded(1),
                PageEvent::Loaded(3),
                PageEvent::Unloaded(3),
            ]
        );
    }

    #[test]
    fn test_callback_observes_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (events, _) = broadcast::channel(4);
        let store: ObservablePageStore<u32, String, String> = ObservablePageStore::new(
            Arc::new(|s: &String| s.clone()),
            events,
            Some(Arc::new(move |event: &PageEvent<u32>| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(*event);
                }
            })),
        );

        store.notify(PageEvent::Loading(7));
        store.update_page(7, items(&["z"]), true).expect("update should succeed");

        let seen = seen.lock().expect("lock should succeed").clone();
        assert_eq!(seen, vec![PageEvent::Loading(7), PageEvent::Loaded(7)]);
    }
}
