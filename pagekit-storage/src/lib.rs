//! pagekit Storage - Page Store and Job Tracking
//!
//! The stateful leaves of the engine:
//!
//! - [`PageStore`]: keyed page cache plus an item to key reverse index
//! - [`ObservablePageStore`]: a lock-guarded store that publishes snapshots
//!   through a replay-latest channel and reports page lifecycle events
//! - [`JobTracker`]: at most one cancellable load task per key

pub mod job_tracker;
pub mod observable;
pub mod page_store;

pub use job_tracker::{JobHandle, JobTracker};
pub use observable::{PageEventCallback, ObservablePageStore};
pub use page_store::{IdentityFn, PageStore};
