//! pagekit - Windowed, Key-Addressed Page Cache
//!
//! Keeps a bounded, moving window of pages loaded from a caller-supplied
//! [`PageSource`], cancels loads for pages that leave the window, and exposes
//! the concatenation of loaded pages as a single observable list.
//!
//! # Architecture
//!
//! ```text
//! view layer ──WindowEvent──→ Pageable ──→ Paginator ──→ FetchStrategy
//!     ▲                          │              │  (window + bridging)
//!     │                          │              ▼
//!     │                          │         JobTracker ──→ PageSource::load
//!     │                          │              │
//!     └──── items / flags ◀──────┴── flatten ◀──ObservablePageStore
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use pagekit::constants::DEFAULT_MINIMUM_ITEMS_PER_SIDE;
//! use pagekit::{single_load, FetchStrategy, KeySpace, Pageable, WindowEvent};
//!
//! let strategy =
//!     FetchStrategy::minimum_item_count(KeySpace::indexed(0), DEFAULT_MINIMUM_ITEMS_PER_SIDE);
//! let pageable = Pageable::builder(
//!     strategy,
//!     single_load(|_: &(), page: &usize| fetch_page(*page)),
//!     |row: &Row| row.id,
//! )
//! .build()?;
//!
//! let mut items = pageable.subscribe()?;
//! pageable.on_event(WindowEvent::visible([3, 4]));
//! items.changed().await?;
//! ```

pub mod factory;
pub mod pageable;
pub mod paginator;
pub mod source;

pub use factory::PaginatorFactory;
pub use pageable::{Pageable, PageableBuilder};
pub use paginator::{ItemsTransform, Paginator};
pub use source::{single_load, PageLoad, PageSource, PageStream};

pub use pagekit_core::{
    bridge_window, constants, extend_backward_by_items, extend_backward_by_pages,
    extend_forward_by_items, extend_forward_by_pages, insert_key, ConfigError, FetchStrategy,
    ItemIdentity, KeySpace, LoadError, Page, PageEvent, PageItem, PageKey, PageSnapshot,
    PagekitError, PagekitResult, PaginatorConfig, PaginatorError, StoreError, WindowEvent,
    WindowRequest,
};
pub use pagekit_storage::{JobHandle, JobTracker, ObservablePageStore, PageEventCallback, PageStore};
