//! The orchestrator: window recompute, per-key loads, flattening.
//!
//! A [`Paginator`] owns one page store and one job tracker for a single
//! external context. Its state is split across three channels:
//!
//! - the active window (`watch<Vec<K>>`), written by [`Paginator::on_event`]
//!   and [`Paginator::jump_to`] through single-writer `send_if_modified` updates
//! - the published page snapshot, written by load tasks
//! - the flattened items and fetching flags, written only by the driver
//!
//! The driver task reacts to window changes by reconciling jobs with the
//! window, and to snapshot publications by re-flattening.
//!
//! # Lock Order
//!
//! ```text
//! placement ──→ window (watch) ──→ page store (RwLock) ──→ published snapshot (watch)
//!                      └─────────→ job tracker (DashMap shard)
//! ```
//!
//! `placement` pairs a jump's store write with its window insertion, and the
//! driver's removal of a page with its window membership check. Page event
//! callbacks run with at most `placement` held, never under the window or
//! the store lock, so they may read the paginator or send it events.
//!
//! No other nesting occurs, and no lock is held across an await except the
//! jump mutex.

use crate::factory::Outputs;
use crate::source::{PageLoad, PageSource};
use dashmap::DashSet;
use futures_util::StreamExt;
use pagekit_core::{
    bridge_window, insert_key, FetchStrategy, ItemIdentity, PageEvent, PageItem, PageKey,
    PageSnapshot, PagekitResult, PaginatorConfig, PaginatorError, StoreError, WindowRequest,
};
use pagekit_storage::{JobHandle, JobTracker, ObservablePageStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Post-processing applied to every flattened item list before publication.
pub type ItemsTransform<T> = Arc<dyn Fn(Vec<T>) -> Vec<T> + Send + Sync>;

pub(crate) struct PaginatorParts<K: PageKey, T, I, E, C> {
    pub(crate) context: C,
    pub(crate) seed: Vec<K>,
    pub(crate) strategy: FetchStrategy<K, T, E, C>,
    pub(crate) source: Arc<dyn PageSource<K, T, C>>,
    pub(crate) store: ObservablePageStore<K, T, I>,
    pub(crate) outputs: Outputs<K, T>,
    pub(crate) config: PaginatorConfig,
    pub(crate) transform: Option<ItemsTransform<T>>,
    pub(crate) runtime: Handle,
}

struct Inner<K: PageKey, T, I, E, C> {
    id: Uuid,
    context: C,
    strategy: FetchStrategy<K, T, E, C>,
    source: Arc<dyn PageSource<K, T, C>>,
    store: ObservablePageStore<K, T, I>,
    jobs: JobTracker<K>,
    /// Window keys whose last load ended in an error
    failed: DashSet<K>,
    window: watch::Sender<Vec<K>>,
    outputs: Outputs<K, T>,
    jump_lock: Mutex<()>,
    placement: StdMutex<()>,
    driver: StdMutex<Option<JoinHandle<()>>>,
    config: PaginatorConfig,
    transform: Option<ItemsTransform<T>>,
    runtime: Handle,
}

/// Windowed page loader for one external context.
///
/// Cheap to clone. Background tasks only hold weak references: when the
/// last clone is dropped, the driver and every load are aborted.
pub struct Paginator<K: PageKey, T, I, E, C> {
    inner: Arc<Inner<K, T, I, E, C>>,
}

impl<K: PageKey, T, I, E, C> Clone for Paginator<K, T, I, E, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: PageKey, T, I, E, C> std::fmt::Debug for Paginator<K, T, I, E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("id", &self.inner.id)
            .field("window", &*self.inner.window.borrow())
            .finish_non_exhaustive()
    }
}

impl<K, T, I, E, C> Paginator<K, T, I, E, C>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Send + Sync + 'static,
{
    pub(crate) fn new(parts: PaginatorParts<K, T, I, E, C>) -> Self {
        let seed = if parts.seed.is_empty() {
            vec![parts.strategy.initial_key(&parts.context)]
        } else {
            parts.seed
        };
        let (window, _) = watch::channel(seed);
        let id = Uuid::now_v7();
        debug!(paginator_id = %id, window = ?*window.borrow(), "Created paginator");

        Self {
            inner: Arc::new(Inner {
                id,
                context: parts.context,
                strategy: parts.strategy,
                source: parts.source,
                store: parts.store,
                jobs: JobTracker::new(parts.runtime.clone()),
                failed: DashSet::new(),
                window,
                outputs: parts.outputs,
                jump_lock: Mutex::new(()),
                placement: StdMutex::new(()),
                driver: StdMutex::new(None),
                config: parts.config,
                transform: parts.transform,
                runtime: parts.runtime,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn context(&self) -> &C {
        &self.inner.context
    }

    pub fn store(&self) -> &ObservablePageStore<K, T, I> {
        &self.inner.store
    }

    /// Current active window.
    pub fn active_keys(&self) -> Vec<K> {
        self.inner.window.borrow().clone()
    }

    pub fn subscribe_window(&self) -> watch::Receiver<Vec<K>> {
        self.inner.window.subscribe()
    }

    /// Keys with a tracked load task.
    pub fn loading_keys(&self) -> Vec<K> {
        self.inner.jobs.active_keys()
    }

    pub fn is_running(&self) -> bool {
        match self.inner.driver.lock() {
            Ok(driver) => driver.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }

    /// Reads the live reverse index.
    pub fn key_for_item(&self, item: &T) -> PagekitResult<Option<K>> {
        Ok(self.inner.store.key_for_item(item)?)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start the driver. Idempotent while it is running.
    pub fn start(&self) -> PagekitResult<()> {
        let mut driver = self
            .inner
            .driver
            .lock()
            .map_err(|_| StoreError::LockPoisoned { resource: "driver" })?;
        if driver.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        info!(paginator_id = %self.inner.id, "Starting paginator");
        let window_rx = self.inner.window.subscribe();
        let snapshot_rx = self.inner.store.subscribe();
        let task = drive(Arc::downgrade(&self.inner), window_rx, snapshot_rx);
        *driver = Some(self.inner.runtime.spawn(task));
        Ok(())
    }

    /// Stop the driver and cancel every load. The store and the window are
    /// kept so a later [`Self::start`] resumes where this left off.
    pub async fn stop(&self) {
        if let Some(driver) = self.inner.take_driver() {
            driver.abort();
            if let Err(err) = driver.await {
                if err.is_panic() {
                    warn!(paginator_id = %self.inner.id, error = %err, "Paginator driver panicked");
                }
            }
        }
        self.inner.jobs.clear().await;
        self.inner.reset_flags();
        debug!(paginator_id = %self.inner.id, "Paginator stopped");
    }

    /// Stop and drop all cached pages without publishing.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.inner.failed.clear();
        if let Err(err) = self.inner.store.clear(false) {
            warn!(paginator_id = %self.inner.id, error = %err, "Failed to clear page store");
        }
        info!(paginator_id = %self.inner.id, "Paginator shut down");
    }

    /// Abort the driver and every load without waiting.
    pub fn abort(&self) {
        self.inner.abort_tasks();
        self.inner.reset_flags();
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    /// Recompute the window for `event`.
    ///
    /// Applies the strategy's fallback chain and bridging, then publishes the
    /// window if it changed. Also republishes an unchanged window when one of
    /// its keys failed to load, which relaunches that load.
    pub fn on_event(&self, event: E) {
        let inner = &self.inner;
        inner.window.send_if_modified(|window| {
            // Read under the window lock so successive recomputes never see
            // an older store than the one before them.
            let snapshot = match inner.store.snapshot() {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(paginator_id = %inner.id, error = %err, "Dropping window event");
                    return false;
                }
            };
            let request = WindowRequest::new(&event, &snapshot, &inner.context, window);
            let target = inner.strategy.resolve_window(&request);
            let bridged = inner.bridge(&target, &snapshot);
            let retry = bridged.iter().any(|key| inner.failed.contains(key));

            if bridged == *window {
                return retry;
            }
            debug!(paginator_id = %inner.id, window = ?bridged, "Window recomputed");
            *window = bridged;
            true
        });
    }

    /// Load `key` if needed, place it into the window, and return its content.
    ///
    /// Jumps run one at a time. An uncached key is loaded from the first value
    /// its source yields; `None` unloads it.
    pub async fn jump_to(&self, key: K) -> PagekitResult<Option<Vec<T>>> {
        let inner = &self.inner;
        let _jump = inner.jump_lock.lock().await;

        let (content, fetched) = match inner.store.get(&key)? {
            Some(page) => (Some(page.to_vec()), false),
            None => (inner.first_load(&key).await?, true),
        };

        {
            let _placement = inner
                .placement
                .lock()
                .map_err(|_| StoreError::LockPoisoned { resource: "placement" })?;

            if fetched {
                match &content {
                    Some(items) => inner.store.update_page(key.clone(), items.clone(), true)?,
                    None => {
                        inner.store.remove_page(&key, true)?;
                    }
                }
            }

            let mut placed = Ok(());
            inner.window.send_if_modified(|window| {
                let snapshot = match inner.store.snapshot() {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        placed = Err(err);
                        return false;
                    }
                };
                let inserted = insert_key(
                    window,
                    key.clone(),
                    |k| inner.strategy.next_key(&inner.context, k),
                    inner.config.max_bridge_steps,
                );
                let bridged = inner.bridge(&inserted, &snapshot);
                let retry = bridged.iter().any(|k| inner.failed.contains(k));
                if bridged == *window {
                    return retry;
                }
                *window = bridged;
                true
            });
            placed?;
        }

        debug!(
            paginator_id = %inner.id,
            key = ?key,
            fetched,
            found = content.is_some(),
            "Jumped to page"
        );
        Ok(content)
    }

    /// Flatten the published snapshot over the window now.
    pub(crate) fn publish_items(&self) {
        self.inner.flatten();
    }
}

impl<K, T, I, E, C> Inner<K, T, I, E, C>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Send + Sync + 'static,
{
    fn bridge(&self, target: &[K], snapshot: &PageSnapshot<K, T>) -> Vec<K> {
        bridge_window(
            target,
            |k| self.strategy.next_key(&self.context, k),
            |k| snapshot.contains_key(k) || self.jobs.is_active(k),
            self.config.max_bridge_steps,
        )
    }

    async fn first_load(&self, key: &K) -> PagekitResult<Option<Vec<T>>> {
        let mut pages = self.source.load(&self.context, key);
        match pages.next().await {
            Some(Ok(items)) => Ok(items),
            Some(Err(err)) => Err(PaginatorError::LoadFailed {
                key: format!("{key:?}"),
                reason: err.to_string(),
            }
            .into()),
            None => Ok(None),
        }
    }

    fn launch(self: &Arc<Self>, key: K) -> JobHandle {
        let weak = Arc::downgrade(self);
        let job_key = key.clone();
        self.jobs
            .launch_if_idle(key, move || load_page(weak, job_key))
    }

    /// Start loads for entered or failed keys, then drain keys that left.
    async fn reconcile(self: &Arc<Self>, window: &[K], reconciled: &mut HashSet<K>) {
        for key in window {
            if reconciled.contains(key) && !self.failed.contains(key) {
                continue;
            }
            if self.launch(key.clone()).is_new() {
                self.failed.remove(key);
            }
        }

        let wanted: HashSet<&K> = window.iter().collect();
        let mut stale: HashSet<K> = self.jobs.active_keys().into_iter().collect();
        match self.store.keys() {
            Ok(keys) => stale.extend(keys),
            Err(err) => warn!(paginator_id = %self.id, error = %err, "Failed to list cached pages"),
        }
        stale.retain(|key| !wanted.contains(key));

        if !stale.is_empty() {
            debug!(paginator_id = %self.id, dropped = ?stale, "Dropping pages outside window");
        }
        for key in stale {
            self.jobs.cancel_and_join(&key).await;
            self.failed.remove(&key);

            // A jump may have brought the key back while its job drained.
            {
                let _placement = match self.placement.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let wanted_again = self.window.borrow().contains(&key);
                if !wanted_again {
                    if let Err(err) = self.store.remove_page(&key, false) {
                        warn!(paginator_id = %self.id, key = ?key, error = %err, "Failed to drop page");
                    }
                }
            }
        }

        *reconciled = window.iter().cloned().collect();
    }

    fn refresh_flags(&self, window: &[K]) {
        let previous = window
            .first()
            .is_some_and(|k| self.strategy.previous_key(&self.context, k).is_some());
        let next = window
            .last()
            .is_some_and(|k| self.strategy.next_key(&self.context, k).is_some());
        set_flag(&self.outputs.fetching_previous, previous);
        set_flag(&self.outputs.fetching_next, next);
    }

    fn reset_flags(&self) {
        set_flag(&self.outputs.fetching_previous, false);
        set_flag(&self.outputs.fetching_next, false);
    }

    fn flatten(&self) {
        let snapshot = self.store.published();
        let window = self.window.borrow().clone();
        let mut items = snapshot.flatten(&window);
        if let Some(transform) = &self.transform {
            items = transform(items);
        }
        self.outputs.items.send_replace(items);
    }

    /// Apply one emission of a load. Returns whether the load continues.
    fn store_load(&self, key: &K, load: PageLoad<T>) -> bool {
        let stored = match load {
            Ok(Some(items)) => self.store.update_page(key.clone(), items, true),
            Ok(None) => self.store.remove_page(key, true).map(|_| ()),
            Err(err) => {
                warn!(paginator_id = %self.id, key = ?key, error = %err, "Page load failed");
                self.failed.insert(key.clone());
                return false;
            }
        };
        match stored {
            Ok(()) => true,
            Err(err) => {
                warn!(paginator_id = %self.id, key = ?key, error = %err, "Failed to store page");
                false
            }
        }
    }

    fn take_driver(&self) -> Option<JoinHandle<()>> {
        match self.driver.lock() {
            Ok(mut driver) => driver.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn abort_tasks(&self) {
        if let Some(driver) = self.take_driver() {
            driver.abort();
        }
        self.jobs.abort_all();
    }
}

impl<K: PageKey, T, I, E, C> Drop for Inner<K, T, I, E, C> {
    fn drop(&mut self) {
        let driver = match self.driver.get_mut() {
            Ok(driver) => driver.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(driver) = driver {
            driver.abort();
        }
        self.jobs.abort_all();
    }
}

fn set_flag(flag: &watch::Sender<bool>, value: bool) {
    flag.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

/// Driver loop: reconcile on window changes, flatten on snapshot changes.
async fn drive<K, T, I, E, C>(
    inner: Weak<Inner<K, T, I, E, C>>,
    mut window_rx: watch::Receiver<Vec<K>>,
    mut snapshot_rx: watch::Receiver<PageSnapshot<K, T>>,
) where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Send + Sync + 'static,
{
    let mut reconciled = HashSet::new();
    let mut first_pass = true;

    loop {
        let window = window_rx.borrow_and_update().clone();
        {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            inner.refresh_flags(&window);
            inner.reconcile(&window, &mut reconciled).await;

            // Keep initial items until something has been published.
            if !first_pass || inner.store.published().version() > 0 {
                inner.flatten();
            }
            first_pass = false;
        }

        loop {
            tokio::select! {
                changed = window_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                changed = snapshot_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    snapshot_rx.borrow_and_update();
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    inner.flatten();
                }
            }
        }
    }
}

/// Body of one key's load task.
async fn load_page<K, T, I, E, C>(inner: Weak<Inner<K, T, I, E, C>>, key: K)
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Send + Sync + 'static,
{
    let mut pages = {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.store.contains(&key).unwrap_or(false) {
            inner.store.notify(PageEvent::Loading(key.clone()));
        }
        inner.source.load(&inner.context, &key)
    };

    while let Some(load) = pages.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.store_load(&key, load) {
            return;
        }
    }
}
