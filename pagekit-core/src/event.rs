//! Events flowing into and out of a paginator.
//!
//! [`WindowEvent`] is what the view layer reports (what is visible, where the
//! anchor is). [`PageEvent`] is what the page store reports back about each
//! page's lifecycle, for instrumentation or affordances such as a minimap.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// WINDOW EVENTS
// ============================================================================

/// Window-change event consumed by the built-in fetch strategies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowEvent<K> {
    /// The set of keys whose items are currently visible, in display order
    VisibleKeysChanged(Vec<K>),
    /// A single reference key the window should be centered on
    AnchorChanged(K),
}

impl<K> WindowEvent<K> {
    pub fn visible(keys: impl IntoIterator<Item = K>) -> Self {
        WindowEvent::VisibleKeysChanged(keys.into_iter().collect())
    }

    pub fn anchor(key: K) -> Self {
        WindowEvent::AnchorChanged(key)
    }
}

// ============================================================================
// PAGE LIFECYCLE
// ============================================================================

/// Lifecycle notification for a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageEvent<K> {
    /// A load started for a page with no cached content
    Loading(K),
    /// New content was stored for the page
    Loaded(K),
    /// The page was removed from the store
    Unloaded(K),
}

impl<K> PageEvent<K> {
    pub fn key(&self) -> &K {
        match self {
            PageEvent::Loading(key) | PageEvent::Loaded(key) | PageEvent::Unloaded(key) => key,
        }
    }

    pub fn into_key(self) -> K {
        match self {
            PageEvent::Loading(key) | PageEvent::Loaded(key) | PageEvent::Unloaded(key) => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PageEvent::Loading(_) => "loading",
            PageEvent::Loaded(_) => "loaded",
            PageEvent::Unloaded(_) => "unloaded",
        }
    }
}

impl<K: fmt::Debug> fmt::Display for PageEvent<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.kind(), self.key())
    }
}
