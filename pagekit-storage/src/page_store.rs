//! Plain keyed page cache with an item to key reverse index.

use pagekit_core::constants::DEFAULT_ASSUMED_CACHE_SIZE;
use pagekit_core::{ItemIdentity, Page, PageItem, PageKey, PageSnapshot};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Derives the reverse-index identity of an item.
pub type IdentityFn<T, I> = Arc<dyn Fn(&T) -> I + Send + Sync>;

/// Keyed cache of loaded pages.
///
/// Not synchronized; [`crate::ObservablePageStore`] wraps it in a lock.
///
/// `set` replaces the index entries of the previous content of a key with
/// entries for the new content. An identity shared by two pages maps to the
/// one stored last.
pub struct PageStore<K, T, I> {
    pages: HashMap<K, Page<T>>,
    owners: HashMap<I, K>,
    identity: IdentityFn<T, I>,
    version: u64,
}

impl<K: fmt::Debug, T, I> fmt::Debug for PageStore<K, T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStore")
            .field("keys", &self.pages.keys().collect::<Vec<_>>())
            .field("indexed_items", &self.owners.len())
            .field("version", &self.version)
            .finish()
    }
}

impl<K, T, I> PageStore<K, T, I>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
{
    pub fn new(identity: IdentityFn<T, I>) -> Self {
        Self {
            pages: HashMap::with_capacity(DEFAULT_ASSUMED_CACHE_SIZE),
            owners: HashMap::new(),
            identity,
            version: 0,
        }
    }

    /// Create a store from a plain identity function.
    pub fn with_identity<F>(identity: F) -> Self
    where
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        Self::new(Arc::new(identity))
    }

    pub fn get(&self, key: &K) -> Option<Page<T>> {
        self.pages.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.pages.contains_key(key)
    }

    /// Overwrite the page for `key` and index its items.
    pub fn set(&mut self, key: K, items: Vec<T>) {
        if let Some(previous) = self.pages.remove(&key) {
            self.unindex(&key, &previous);
        }
        for item in &items {
            self.owners.insert((self.identity)(item), key.clone());
        }
        self.pages.insert(key, Page::from(items));
        self.version += 1;
    }

    /// Insert several pages at once.
    pub fn put_all<P>(&mut self, pages: P)
    where
        P: IntoIterator<Item = (K, Vec<T>)>,
    {
        for (key, items) in pages {
            self.set(key, items);
        }
    }

    /// Remove a page and the reverse-index entries that still point at it.
    pub fn remove(&mut self, key: &K) -> Option<Page<T>> {
        let page = self.pages.remove(key)?;
        self.unindex(key, &page);
        self.version += 1;
        Some(page)
    }

    fn unindex(&mut self, key: &K, page: &[T]) {
        for item in page {
            let id = (self.identity)(item);
            if self.owners.get(&id) == Some(key) {
                self.owners.remove(&id);
            }
        }
    }

    /// Remove every page. Returns the keys that were loaded.
    pub fn clear(&mut self) -> Vec<K> {
        let keys: Vec<K> = self.pages.keys().cloned().collect();
        self.pages.clear();
        self.owners.clear();
        self.version += 1;
        keys
    }

    /// Mutation-independent copy of the page map.
    pub fn all(&self) -> PageSnapshot<K, T> {
        PageSnapshot::new(self.version, self.pages.clone())
    }

    pub fn key_for_item(&self, item: &T) -> Option<K> {
        self.owners.get(&(self.identity)(item)).cloned()
    }

    pub fn key_for_identity(&self, id: &I) -> Option<K> {
        self.owners.get(id).cloned()
    }

    pub fn keys(&self) -> Vec<K> {
        self.pages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Mutation counter, bumped by every write.
    pub fn version(&self) -> u64 {
        self.version
    }
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// Property: After `set(k, items)`, every item maps back to `k`.
        #[test]
        fn prop_key_for_item_after_set(
            pages in proptest::collection::hash_map(0u8..20, proptest::collection::vec(any::<u16>(), 0..10), 0..10),
            key in 0u8..20,
            items in proptest::collection::vec(any::<u16>(), 0..10),
        ) {
            let mut store: PageStore<u8, u16, u16> = PageStore::with_identity(|i: &u16| *i);
            store.put_all(pages);
            store.set(key, items.clone());

            for item in &items {
                prop_assert_eq!(store.key_for_item(item), Some(key));
            }
        }

        /// Property: Removing a key never leaves an index entry pointing at it.
        #[test]
        fn prop_remove_clears_own_entries(
            pages in proptest::collection::hash_map(0u8..20, proptest::collection::vec(any::<u16>(), 0..10), 1..10),
        ) {
            let mut store: PageStore<u8, u16, u16> = PageStore::with_identity(|i: &u16| *i);
            store.put_all(pages.clone());

            for (key, items) in &pages {
                store.remove(key);
                for item in items {
                    prop_assert_ne!(store.key_for_item(item), Some(*key));
                }
            }
        }

        /// Property: Overwriting a page drops index entries of its old
        /// content, and removing it afterwards leaves nothing behind.
        #[test]
        fn prop_overwrite_then_remove_clears_old_entries(
            key in 0u8..20,
            first in proptest::collection::vec(any::<u16>(), 0..10),
            second in proptest::collection::vec(any::<u16>(), 0..10),
        ) {
            let mut store: PageStore<u8, u16, u16> = PageStore::with_identity(|i: &u16| *i);
            store.set(key, first.clone());
            store.set(key, second.clone());

            for item in &first {
                let expected = second.contains(item).then_some(key);
                prop_assert_eq!(store.key_for_item(item), expected);
            }

            store.remove(&key);
            for item in first.iter().chain(&second) {
                prop_assert_eq!(store.key_for_item(item), None);
            }
        }
    }
}
