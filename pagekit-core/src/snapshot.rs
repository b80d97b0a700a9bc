//! Immutable page snapshots.
//!
//! A [`PageSnapshot`] is a point-in-time copy of the page map. The store
//! builds a fresh map for every snapshot it hands out, so a snapshot never
//! observes later mutations and can be retained or shared freely. Page
//! contents are reference counted, which keeps taking a snapshot
//! proportional to the number of pages rather than the number of items.

use crate::PageKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Loaded content of a single page.
pub type Page<T> = Arc<[T]>;

/// Versioned, immutable mapping from key to loaded page content.
pub struct PageSnapshot<K, T> {
    version: u64,
    pages: Arc<HashMap<K, Page<T>>>,
}

impl<K, T> Clone for PageSnapshot<K, T> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            pages: Arc::clone(&self.pages),
        }
    }
}

impl<K: fmt::Debug, T> fmt::Debug for PageSnapshot<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes: Vec<(&K, usize)> = self.pages.iter().map(|(k, p)| (k, p.len())).collect();
        f.debug_struct("PageSnapshot")
            .field("version", &self.version)
            .field("pages", &sizes)
            .finish()
    }
}

impl<K: PageKey, T> Default for PageSnapshot<K, T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: PageKey, T> PageSnapshot<K, T> {
    /// Snapshot with no pages at version zero.
    pub fn empty() -> Self {
        Self {
            version: 0,
            pages: Arc::new(HashMap::new()),
        }
    }

    /// Wrap an already-copied page map.
    pub fn new(version: u64, pages: HashMap<K, Page<T>>) -> Self {
        Self {
            version,
            pages: Arc::new(pages),
        }
    }

    /// Store mutation counter at the time this snapshot was taken.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &K) -> Option<&[T]> {
        self.pages.get(key).map(|page| &page[..])
    }

    /// Shared handle to a page's content.
    pub fn page(&self, key: &K) -> Option<Page<T>> {
        self.pages.get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.pages.contains_key(key)
    }

    /// Number of items in a loaded page, `None` when the page is absent.
    pub fn page_len(&self, key: &K) -> Option<usize> {
        self.pages.get(key).map(|page| page.len())
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.pages.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[T])> {
        self.pages.iter().map(|(k, p)| (k, &p[..]))
    }

    /// Number of loaded pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl<K: PageKey, T: Clone> PageSnapshot<K, T> {
    /// Concatenate the pages for `keys` in order. Absent keys contribute nothing.
    pub fn flatten<'a, I>(&self, keys: I) -> Vec<T>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut items = Vec::new();
        for key in keys {
            if let Some(page) = self.pages.get(key) {
                items.extend(page.iter().cloned());
            }
        }
        items
    }
}
