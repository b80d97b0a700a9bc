//! Configuration types

use crate::constants::{
    DEFAULT_MAX_BRIDGE_STEPS, DEFAULT_PAGE_EVENT_CAPACITY, ENV_MAX_BRIDGE_STEPS,
    ENV_PAGE_EVENT_CAPACITY,
};
use crate::ConfigError;
use serde::{Deserialize, Serialize};

/// Configuration for a paginator and the pageable facade built around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatorConfig {
    /// Upper bound on `next_key` steps walked between two adjacent window
    /// keys while bridging, and while placing a jumped-to key into the
    /// current window (default: 256)
    pub max_bridge_steps: usize,

    /// Capacity of the page lifecycle broadcast channel. Slow receivers lag
    /// past this many events (default: 64)
    pub page_event_capacity: usize,
}

impl Default for PaginatorConfig {
    fn default() -> Self {
        Self {
            max_bridge_steps: DEFAULT_MAX_BRIDGE_STEPS,
            page_event_capacity: DEFAULT_PAGE_EVENT_CAPACITY,
        }
    }
}

impl PaginatorConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a PaginatorConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PAGEKIT_MAX_BRIDGE_STEPS`: Bridging step bound (default: 256)
    /// - `PAGEKIT_PAGE_EVENT_CAPACITY`: Lifecycle channel capacity (default: 64)
    ///
    /// Unparseable values fall back to the defaults; call [`Self::validate`]
    /// to reject out-of-range ones.
    pub fn from_env() -> Self {
        let max_bridge_steps = std::env::var(ENV_MAX_BRIDGE_STEPS)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BRIDGE_STEPS);

        let page_event_capacity = std::env::var(ENV_PAGE_EVENT_CAPACITY)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PAGE_EVENT_CAPACITY);

        Self {
            max_bridge_steps,
            page_event_capacity,
        }
    }

    /// Set the bridging step bound.
    pub fn with_max_bridge_steps(mut self, steps: usize) -> Self {
        self.max_bridge_steps = steps;
        self
    }

    /// Set the lifecycle broadcast capacity.
    pub fn with_page_event_capacity(mut self, capacity: usize) -> Self {
        self.page_event_capacity = capacity;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bridge_steps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_bridge_steps".to_string(),
                value: self.max_bridge_steps.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.page_event_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "page_event_capacity".to_string(),
                value: self.page_event_capacity.to_string(),
                reason: "broadcast channels need a capacity of at least one".to_string(),
            });
        }
        Ok(())
    }
}
