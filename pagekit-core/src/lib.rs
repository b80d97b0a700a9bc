//! pagekit Core - Data Types and Window Policies
//!
//! Pure data structures and pure functions shared by every other crate:
//! page snapshots, lifecycle and window events, the key space and fetch
//! strategies that decide which pages should be loaded, and the bridging
//! algorithm that keeps loaded pages between two window keys from being
//! dropped. Nothing in here spawns tasks or takes locks.
//!
//! # Window Calculation
//!
//! ```text
//! WindowEvent ──→ FetchStrategy::resolve_window ──→ bridge_window ──→ active keys
//!                    ▲            (fallback chain)      ▲
//!                    └──── PageSnapshot (page sizes) ───┘ (loaded / loading keys)
//! ```

use std::fmt::Debug;
use std::hash::Hash;

pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod snapshot;
pub mod strategy;

pub use bridge::{bridge_window, bridged_between, insert_key, reaches};
pub use config::PaginatorConfig;
pub use error::{ConfigError, LoadError, PagekitError, PagekitResult, PaginatorError, StoreError};
pub use event::{PageEvent, WindowEvent};
pub use snapshot::{Page, PageSnapshot};
pub use strategy::{
    extend_backward_by_items, extend_backward_by_pages, extend_forward_by_items,
    extend_forward_by_pages, FetchStrategy, KeySpace, WindowRequest,
};

// ============================================================================
// MARKER TRAITS
// ============================================================================

/// Identifier of one page. Keys need not be totally ordered; the key space
/// supplies successor and predecessor.
pub trait PageKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<K> PageKey for K where K: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Opaque payload stored in pages. The engine never inspects items.
pub trait PageItem: Clone + Send + Sync + 'static {}

impl<T> PageItem for T where T: Clone + Send + Sync + 'static {}

/// Identity derived from an item, used for the item to page reverse index.
pub trait ItemIdentity: Eq + Hash + Send + Sync + 'static {}

impl<I> ItemIdentity for I where I: Eq + Hash + Send + Sync + 'static {}
