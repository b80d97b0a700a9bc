//! Public facade: observable items, fetching flags, jumps, and events.
//!
//! A [`Pageable`] is inert until someone subscribes to its items. The first
//! subscription starts a supervisor task which runs the current paginator,
//! swaps in a fresh one whenever the external context changes, and stops it
//! once the last item receiver is gone. The store and window survive a stop,
//! so resubscribing resumes from the previous window.

use crate::factory::PaginatorFactory;
use crate::paginator::{ItemsTransform, Paginator};
use crate::source::PageSource;
use pagekit_core::{
    FetchStrategy, ItemIdentity, PageEvent, PageItem, PageKey, PagekitResult, PaginatorConfig,
    PaginatorError, StoreError,
};
use pagekit_storage::{IdentityFn, PageEventCallback};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

struct Shared<K: PageKey, T, I, E, C> {
    factory: PaginatorFactory<K, T, I, E, C>,
    current: watch::Sender<Paginator<K, T, I, E, C>>,
    context: watch::Receiver<C>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Windowed, observable view over a paged data source.
///
/// Cheap to clone; every clone drives the same paginator.
pub struct Pageable<K: PageKey, T, I, E, C = ()> {
    shared: Arc<Shared<K, T, I, E, C>>,
}

impl<K: PageKey, T, I, E, C> Clone for Pageable<K, T, I, E, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: PageKey, T, I, E, C> std::fmt::Debug for Pageable<K, T, I, E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pageable")
            .field("paginator", &*self.shared.current.borrow())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, T, I, E> Pageable<K, T, I, E, ()>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
{
    /// Builder for a pageable without external context.
    pub fn builder<S, F>(
        strategy: FetchStrategy<K, T, E, ()>,
        source: S,
        identity: F,
    ) -> PageableBuilder<K, T, I, E, ()>
    where
        S: PageSource<K, T, ()>,
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        PageableBuilder::new(strategy, source, identity)
    }
}

impl<K, T, I, E, C> Pageable<K, T, I, E, C>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Clone + PartialEq + Send + Sync + 'static,
{
    fn paginator(&self) -> Paginator<K, T, I, E, C> {
        self.shared.current.borrow().clone()
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    /// Receiver of the flattened item list. Activates the pageable.
    pub fn subscribe(&self) -> PagekitResult<watch::Receiver<Vec<T>>> {
        let items = self.shared.factory.items();
        self.activate()?;
        Ok(items)
    }

    /// The flattened item list as a `Stream`. Activates the pageable.
    pub fn item_stream(&self) -> PagekitResult<WatchStream<Vec<T>>> {
        Ok(WatchStream::new(self.subscribe()?))
    }

    /// Latest published item list, without activating.
    pub fn items(&self) -> Vec<T> {
        self.shared.factory.current_items()
    }

    /// Whether the window's first key has a predecessor.
    pub fn is_fetching_previous(&self) -> watch::Receiver<bool> {
        self.shared.factory.is_fetching_previous()
    }

    /// Whether the window's last key has a successor.
    pub fn is_fetching_next(&self) -> watch::Receiver<bool> {
        self.shared.factory.is_fetching_next()
    }

    pub fn page_events(&self) -> broadcast::Receiver<PageEvent<K>> {
        self.shared.factory.page_events()
    }

    pub fn active_keys(&self) -> Vec<K> {
        self.paginator().active_keys()
    }

    pub fn key_for_item(&self, item: &T) -> PagekitResult<Option<K>> {
        self.paginator().key_for_item(item)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    // ========================================================================
    // INPUT
    // ========================================================================

    /// Report a window-change event to the current paginator.
    pub fn on_event(&self, event: E) {
        if self.is_closed() {
            return;
        }
        self.shared.current.borrow().on_event(event);
    }

    /// Load `key` if needed, bring it into the window, and return its content.
    pub async fn jump_to(&self, key: K) -> PagekitResult<Option<Vec<T>>> {
        if self.is_closed() {
            return Err(PaginatorError::Closed.into());
        }
        self.paginator().jump_to(key).await
    }

    /// Stop everything and drop all cached pages. Subscribing afterwards
    /// fails with [`PaginatorError::Closed`].
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let supervisor = match self.shared.supervisor.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(supervisor) = supervisor {
            supervisor.abort();
            supervisor_panicked(supervisor.await);
        }
        self.paginator().shutdown().await;
        info!("Pageable closed");
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    fn activate(&self) -> PagekitResult<()> {
        let mut slot = self
            .shared
            .supervisor
            .lock()
            .map_err(|_| StoreError::LockPoisoned { resource: "supervisor" })?;
        if self.is_closed() {
            return Err(PaginatorError::Closed.into());
        }
        if slot.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let context = self.shared.context.clone();
        *slot = Some(self.shared.factory.runtime().spawn(supervise(shared, context)));
        Ok(())
    }
}

/// Runs while at least one item receiver exists.
/// Log a supervisor that died by panic. Cancellation is the normal exit.
fn supervisor_panicked(exit: Result<(), JoinError>) -> bool {
    match exit {
        Err(err) if err.is_panic() => {
            warn!(error = %err, "Pageable supervisor panicked");
            true
        }
        _ => false,
    }
}

async fn supervise<K, T, I, E, C>(shared: Arc<Shared<K, T, I, E, C>>, mut context: watch::Receiver<C>)
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Clone + PartialEq + Send + Sync + 'static,
{
    info!("Pageable activated");
    let latest = context.borrow_and_update().clone();
    if latest != *shared.current.borrow().context() {
        swap_paginator(&shared, latest).await;
    }
    start_current(&shared);

    let mut context_open = true;
    loop {
        tokio::select! {
            changed = context.changed(), if context_open => {
                if changed.is_err() {
                    // Context is frozen from here on.
                    context_open = false;
                    continue;
                }
                let latest = context.borrow_and_update().clone();
                if latest != *shared.current.borrow().context() {
                    swap_paginator(&shared, latest).await;
                    start_current(&shared);
                }
            }
            _ = shared.factory.item_subscribers_closed() => {
                let paginator = shared.current.borrow().clone();
                paginator.stop().await;

                let mut slot = match shared.supervisor.lock() {
                    Ok(slot) => slot,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if shared.factory.item_subscribers() > 0 {
                    // Someone subscribed while stopping.
                    drop(slot);
                    start_current(&shared);
                    continue;
                }
                *slot = None;
                info!(paginator_id = %paginator.id(), "Last subscriber gone, pageable deactivated");
                return;
            }
        }
    }
}

/// Replace the current paginator with a fresh one for `context`.
async fn swap_paginator<K, T, I, E, C>(shared: &Shared<K, T, I, E, C>, context: C)
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Clone + PartialEq + Send + Sync + 'static,
{
    let old = shared.current.borrow().clone();
    old.shutdown().await;

    let fresh = shared.factory.create(context, Vec::new());
    info!(
        old_paginator_id = %old.id(),
        paginator_id = %fresh.id(),
        window = ?fresh.active_keys(),
        "Context changed, replaced paginator"
    );
    fresh.publish_items();
    shared.current.send_replace(fresh);
}

fn start_current<K, T, I, E, C>(shared: &Shared<K, T, I, E, C>)
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Send + Sync + 'static,
{
    let paginator = shared.current.borrow().clone();
    if let Err(err) = paginator.start() {
        warn!(paginator_id = %paginator.id(), error = %err, "Failed to start paginator");
    } else {
        debug!(paginator_id = %paginator.id(), "Paginator running");
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Configures and builds a [`Pageable`].
pub struct PageableBuilder<K: PageKey, T, I, E, C> {
    context: watch::Receiver<C>,
    strategy: FetchStrategy<K, T, E, C>,
    source: Arc<dyn PageSource<K, T, C>>,
    identity: IdentityFn<T, I>,
    config: PaginatorConfig,
    runtime: Option<Handle>,
    initial_items: Vec<T>,
    transform: Option<ItemsTransform<T>>,
    callback: Option<PageEventCallback<K>>,
}

impl<K, T, I, E> PageableBuilder<K, T, I, E, ()>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
{
    /// Builder for a pageable without external context.
    pub fn new<S, F>(strategy: FetchStrategy<K, T, E, ()>, source: S, identity: F) -> Self
    where
        S: PageSource<K, T, ()>,
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        // The sender is dropped right away; a closed context never changes.
        let (_, context) = watch::channel(());
        Self::with_context(context, strategy, source, identity)
    }
}

impl<K, T, I, E, C> PageableBuilder<K, T, I, E, C>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Clone + PartialEq + Send + Sync + 'static,
{
    /// Builder following an external context. A context value that differs
    /// from the previous one (by `PartialEq`) resets the pageable.
    pub fn with_context<S, F>(
        context: watch::Receiver<C>,
        strategy: FetchStrategy<K, T, E, C>,
        source: S,
        identity: F,
    ) -> Self
    where
        S: PageSource<K, T, C>,
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        Self {
            context,
            strategy,
            source: Arc::new(source),
            identity: Arc::new(identity),
            config: PaginatorConfig::default(),
            runtime: None,
            initial_items: Vec::new(),
            transform: None,
            callback: None,
        }
    }

    pub fn config(mut self, config: PaginatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runtime for loads and background tasks. Defaults to the runtime
    /// `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn initial_items(mut self, items: Vec<T>) -> Self {
        self.initial_items = items;
        self
    }

    /// Post-process every flattened list, e.g. to insert separators.
    pub fn transform_items<F>(mut self, transform: F) -> Self
    where
        F: Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Synchronous observer of page lifecycle events.
    pub fn on_page_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PageEvent<K>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> PagekitResult<Pageable<K, T, I, E, C>> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| PaginatorError::NoRuntime)?,
        };

        let mut factory =
            PaginatorFactory::from_shared(self.strategy, self.source, self.identity, runtime)
                .with_config(self.config)
                .with_initial_items(self.initial_items);
        if let Some(transform) = self.transform {
            factory = factory.with_transform(transform);
        }
        if let Some(callback) = self.callback {
            factory = factory.with_page_event_callback(callback);
        }

        let initial_context = self.context.borrow().clone();
        let paginator = factory.create(initial_context, Vec::new());
        let (current, _) = watch::channel(paginator);
        debug!(paginator_id = %current.borrow().id(), "Built pageable");

        Ok(Pageable {
            shared: Arc::new(Shared {
                factory,
                current,
                context: self.context,
                supervisor: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }
}
