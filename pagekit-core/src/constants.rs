//! Constants for pagekit
//!
//! Defaults for strategies and paginator configuration, plus the environment
//! variable names read by [`crate::PaginatorConfig::from_env`].

// ============================================================================
// STRATEGIES
// ============================================================================

/// Default number of items to keep prefetched on each side of the visible pages
pub const DEFAULT_MINIMUM_ITEMS_PER_SIDE: usize = 20;

/// Default number of pages to keep prefetched on each side of the visible pages
pub const DEFAULT_PAGES_PER_SIDE: usize = 1;

/// Default number of pages to keep on each side of an anchor page
pub const DEFAULT_ANCHOR_PAGES_PER_SIDE: usize = 2;

// ============================================================================
// PAGINATOR
// ============================================================================

/// Default upper bound on `next_key` steps taken while bridging two window keys
pub const DEFAULT_MAX_BRIDGE_STEPS: usize = 256;

/// Default capacity of the page lifecycle broadcast channel
pub const DEFAULT_PAGE_EVENT_CAPACITY: usize = 64;

/// Assumed number of pages held at once, used to pre-size maps
pub const DEFAULT_ASSUMED_CACHE_SIZE: usize = 20;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Environment variable overriding [`DEFAULT_MAX_BRIDGE_STEPS`]
pub const ENV_MAX_BRIDGE_STEPS: &str = "PAGEKIT_MAX_BRIDGE_STEPS";

/// Environment variable overriding [`DEFAULT_PAGE_EVENT_CAPACITY`]
pub const ENV_PAGE_EVENT_CAPACITY: &str = "PAGEKIT_PAGE_EVENT_CAPACITY";
