//! Construction of paginators that share output channels.
//!
//! A context swap replaces the paginator wholesale instead of resetting it in
//! place. The factory keeps everything a fresh paginator needs, and the item,
//! fetching-flag, and lifecycle channels every paginator it builds publishes
//! to, so observers never have to resubscribe across swaps.

use crate::paginator::{ItemsTransform, Paginator, PaginatorParts};
use crate::source::PageSource;
use pagekit_core::{FetchStrategy, ItemIdentity, PageEvent, PageItem, PageKey, PaginatorConfig};
use pagekit_storage::{IdentityFn, ObservablePageStore, PageEventCallback};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};

/// Channels shared by every paginator of one factory.
pub(crate) struct Outputs<K, T> {
    pub(crate) items: Arc<watch::Sender<Vec<T>>>,
    pub(crate) fetching_previous: Arc<watch::Sender<bool>>,
    pub(crate) fetching_next: Arc<watch::Sender<bool>>,
    pub(crate) page_events: broadcast::Sender<PageEvent<K>>,
}

impl<K, T> Clone for Outputs<K, T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            fetching_previous: Arc::clone(&self.fetching_previous),
            fetching_next: Arc::clone(&self.fetching_next),
            page_events: self.page_events.clone(),
        }
    }
}

impl<K: Clone, T> Outputs<K, T> {
    fn new(initial_items: Vec<T>, event_capacity: usize) -> Self {
        let (items, _) = watch::channel(initial_items);
        let (fetching_previous, _) = watch::channel(false);
        let (fetching_next, _) = watch::channel(false);
        let (page_events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            items: Arc::new(items),
            fetching_previous: Arc::new(fetching_previous),
            fetching_next: Arc::new(fetching_next),
            page_events,
        }
    }
}

/// Builds [`Paginator`]s for a context and a seed window.
pub struct PaginatorFactory<K: PageKey, T, I, E, C> {
    strategy: FetchStrategy<K, T, E, C>,
    source: Arc<dyn PageSource<K, T, C>>,
    identity: IdentityFn<T, I>,
    config: PaginatorConfig,
    transform: Option<ItemsTransform<T>>,
    callback: Option<PageEventCallback<K>>,
    runtime: Handle,
    outputs: Outputs<K, T>,
}

impl<K, T, I, E, C> PaginatorFactory<K, T, I, E, C>
where
    K: PageKey,
    T: PageItem,
    I: ItemIdentity,
    E: 'static,
    C: Send + Sync + 'static,
{
    pub fn new<S, F>(strategy: FetchStrategy<K, T, E, C>, source: S, identity: F, runtime: Handle) -> Self
    where
        S: PageSource<K, T, C>,
        F: Fn(&T) -> I + Send + Sync + 'static,
    {
        Self::from_shared(strategy, Arc::new(source), Arc::new(identity), runtime)
    }

    /// Like [`Self::new`] for an already shared source and identity function.
    pub fn from_shared(
        strategy: FetchStrategy<K, T, E, C>,
        source: Arc<dyn PageSource<K, T, C>>,
        identity: IdentityFn<T, I>,
        runtime: Handle,
    ) -> Self {
        let config = PaginatorConfig::default();
        let outputs = Outputs::new(Vec::new(), config.page_event_capacity);
        Self {
            strategy,
            source,
            identity,
            config,
            transform: None,
            callback: None,
            runtime,
            outputs,
        }
    }

    /// Replace the config. Recreates the lifecycle channel with the new
    /// capacity, so call this before handing out receivers.
    pub fn with_config(mut self, config: PaginatorConfig) -> Self {
        self.outputs.page_events = broadcast::channel(config.page_event_capacity.max(1)).0;
        self.config = config;
        self
    }

    /// Items observed before the first flatten.
    pub fn with_initial_items(self, items: Vec<T>) -> Self {
        self.outputs.items.send_replace(items);
        self
    }

    pub fn with_transform(mut self, transform: ItemsTransform<T>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_page_event_callback(mut self, callback: PageEventCallback<K>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn config(&self) -> &PaginatorConfig {
        &self.config
    }

    pub fn strategy(&self) -> &FetchStrategy<K, T, E, C> {
        &self.strategy
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Build a stopped paginator. An empty seed starts from the context's
    /// initial key.
    pub fn create(&self, context: C, seed: Vec<K>) -> Paginator<K, T, I, E, C> {
        let store = ObservablePageStore::new(
            Arc::clone(&self.identity),
            self.outputs.page_events.clone(),
            self.callback.clone(),
        );
        Paginator::new(PaginatorParts {
            context,
            seed,
            strategy: self.strategy.clone(),
            source: Arc::clone(&self.source),
            store,
            outputs: self.outputs.clone(),
            config: self.config.clone(),
            transform: self.transform.clone(),
            runtime: self.runtime.clone(),
        })
    }

    // ========================================================================
    // SHARED OUTPUTS
    // ========================================================================

    pub fn items(&self) -> watch::Receiver<Vec<T>> {
        self.outputs.items.subscribe()
    }

    pub fn current_items(&self) -> Vec<T> {
        self.outputs.items.borrow().clone()
    }

    pub fn is_fetching_previous(&self) -> watch::Receiver<bool> {
        self.outputs.fetching_previous.subscribe()
    }

    pub fn is_fetching_next(&self) -> watch::Receiver<bool> {
        self.outputs.fetching_next.subscribe()
    }

    pub fn page_events(&self) -> broadcast::Receiver<PageEvent<K>> {
        self.outputs.page_events.subscribe()
    }

    pub(crate) fn item_subscribers(&self) -> usize {
        self.outputs.items.receiver_count()
    }

    pub(crate) async fn item_subscribers_closed(&self) {
        self.outputs.items.closed().await
    }
}
