//! Fetch strategies: pure policies mapping a window event to wanted keys.
//!
//! A [`FetchStrategy`] pairs a [`KeySpace`] (initial key, successor,
//! predecessor) with a window computation. The computation receives the
//! triggering event, a read-only [`PageSnapshot`], the external context and
//! the current window, and returns the keys that should be active.
//!
//! Three built-in strategies consume [`WindowEvent`]:
//!
//! - [`FetchStrategy::minimum_item_count`]: extend around the visible keys
//!   until enough items are covered on each side
//! - [`FetchStrategy::fixed_page_count`]: extend around the visible keys by a
//!   fixed number of pages on each side
//! - [`FetchStrategy::anchored`]: a fixed number of pages on each side of a
//!   single anchor key
//!
//! # Fallback
//!
//! [`FetchStrategy::resolve_window`] never returns an empty window. An empty
//! computation falls back to the current window, and an empty current window
//! falls back to `[initial_key]`.

use crate::{PageKey, PageSnapshot, WindowEvent};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// KEY SPACE
// ============================================================================

type InitialKeyFn<K, C> = Arc<dyn Fn(&C) -> K + Send + Sync>;
type NeighborFn<K, C> = Arc<dyn Fn(&C, &K) -> Option<K> + Send + Sync>;

/// Initial key plus successor and predecessor functions, evaluated against
/// the external context.
pub struct KeySpace<K, C = ()> {
    initial: InitialKeyFn<K, C>,
    next: NeighborFn<K, C>,
    previous: NeighborFn<K, C>,
}

impl<K, C> Clone for KeySpace<K, C> {
    fn clone(&self) -> Self {
        Self {
            initial: Arc::clone(&self.initial),
            next: Arc::clone(&self.next),
            previous: Arc::clone(&self.previous),
        }
    }
}

impl<K, C> fmt::Debug for KeySpace<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySpace").finish_non_exhaustive()
    }
}

impl<K: PageKey, C> KeySpace<K, C> {
    /// Key space whose initial key depends on the context.
    pub fn new<I, N, P>(initial: I, next: N, previous: P) -> Self
    where
        I: Fn(&C) -> K + Send + Sync + 'static,
        N: Fn(&C, &K) -> Option<K> + Send + Sync + 'static,
        P: Fn(&C, &K) -> Option<K> + Send + Sync + 'static,
    {
        Self {
            initial: Arc::new(initial),
            next: Arc::new(next),
            previous: Arc::new(previous),
        }
    }

    /// Key space with a context-independent initial key.
    pub fn starting_at<N, P>(initial: K, next: N, previous: P) -> Self
    where
        N: Fn(&C, &K) -> Option<K> + Send + Sync + 'static,
        P: Fn(&C, &K) -> Option<K> + Send + Sync + 'static,
    {
        Self::new(move |_: &C| initial.clone(), next, previous)
    }

    pub fn initial_key(&self, context: &C) -> K {
        (self.initial)(context)
    }

    pub fn next_key(&self, context: &C, key: &K) -> Option<K> {
        (self.next)(context, key)
    }

    pub fn previous_key(&self, context: &C, key: &K) -> Option<K> {
        (self.previous)(context, key)
    }
}

impl<C> KeySpace<usize, C> {
    /// Zero-based page indices: `next = k + 1`, `previous = k - 1` down to 0.
    pub fn indexed(initial: usize) -> Self {
        Self::starting_at(
            initial,
            |_: &C, key: &usize| key.checked_add(1),
            |_: &C, key: &usize| key.checked_sub(1),
        )
    }
}

// ============================================================================
// WINDOW REQUEST
// ============================================================================

/// Inputs to a window computation.
pub struct WindowRequest<'a, K, T, E, C> {
    /// The event that triggered the recompute
    pub event: &'a E,
    /// Page cache as of the recompute
    pub pages: &'a PageSnapshot<K, T>,
    /// External context the paginator was created for
    pub context: &'a C,
    /// Window published before this recompute
    pub current: &'a [K],
}

impl<'a, K, T, E, C> WindowRequest<'a, K, T, E, C> {
    pub fn new(event: &'a E, pages: &'a PageSnapshot<K, T>, context: &'a C, current: &'a [K]) -> Self {
        Self {
            event,
            pages,
            context,
            current,
        }
    }
}

// ============================================================================
// FETCH STRATEGY
// ============================================================================

type ComputeFn<K, T, E, C> =
    Arc<dyn Fn(&KeySpace<K, C>, &WindowRequest<'_, K, T, E, C>) -> Vec<K> + Send + Sync>;

/// Immutable windowing policy.
pub struct FetchStrategy<K, T, E, C = ()> {
    keys: KeySpace<K, C>,
    compute: ComputeFn<K, T, E, C>,
}

impl<K, T, E, C> Clone for FetchStrategy<K, T, E, C> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<K, T, E, C> fmt::Debug for FetchStrategy<K, T, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchStrategy")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl<K: PageKey, T, E, C> FetchStrategy<K, T, E, C> {
    /// Strategy with a caller-defined window computation over any event type.
    pub fn custom<F>(keys: KeySpace<K, C>, compute: F) -> Self
    where
        F: Fn(&KeySpace<K, C>, &WindowRequest<'_, K, T, E, C>) -> Vec<K> + Send + Sync + 'static,
    {
        Self {
            keys,
            compute: Arc::new(compute),
        }
    }

    pub fn keys(&self) -> &KeySpace<K, C> {
        &self.keys
    }

    pub fn initial_key(&self, context: &C) -> K {
        self.keys.initial_key(context)
    }

    pub fn next_key(&self, context: &C, key: &K) -> Option<K> {
        self.keys.next_key(context, key)
    }

    pub fn previous_key(&self, context: &C, key: &K) -> Option<K> {
        self.keys.previous_key(context, key)
    }

    /// Raw window computation, possibly empty.
    pub fn compute_window(&self, request: &WindowRequest<'_, K, T, E, C>) -> Vec<K> {
        (self.compute)(&self.keys, request)
    }

    /// Window computation with the fallback chain applied. Never empty.
    pub fn resolve_window(&self, request: &WindowRequest<'_, K, T, E, C>) -> Vec<K> {
        let computed = self.compute_window(request);
        if !computed.is_empty() {
            return computed;
        }
        if !request.current.is_empty() {
            return request.current.to_vec();
        }
        vec![self.initial_key(request.context)]
    }
}

impl<K: PageKey, T, C> FetchStrategy<K, T, WindowEvent<K>, C> {
    /// Extend the visible keys page by page until at least
    /// `minimum_items_per_side` items are covered before and after them.
    ///
    /// Extension in a direction also stops after adding a page that is not
    /// cached or is cached empty, since its size cannot contribute, and at a
    /// missing neighbor.
    pub fn minimum_item_count(keys: KeySpace<K, C>, minimum_items_per_side: usize) -> Self {
        Self::custom(keys, move |keys, request| {
            let WindowEvent::VisibleKeysChanged(visible) = request.event else {
                return Vec::new();
            };
            let mut pages = visible.clone();
            let context = request.context;

            extend_forward_by_items(
                &mut pages,
                |key| keys.next_key(context, key),
                request.pages,
                minimum_items_per_side,
            );
            extend_backward_by_items(
                &mut pages,
                |key| keys.previous_key(context, key),
                request.pages,
                minimum_items_per_side,
            );
            pages
        })
    }

    /// Extend the visible keys by `pages_per_side` pages in each direction.
    pub fn fixed_page_count(keys: KeySpace<K, C>, pages_per_side: usize) -> Self {
        Self::custom(keys, move |keys, request| {
            let WindowEvent::VisibleKeysChanged(visible) = request.event else {
                return Vec::new();
            };
            let mut pages = visible.clone();
            let context = request.context;

            extend_forward_by_pages(&mut pages, |key| keys.next_key(context, key), pages_per_side);
            extend_backward_by_pages(
                &mut pages,
                |key| keys.previous_key(context, key),
                pages_per_side,
            );
            pages
        })
    }

    /// Window of `pages_per_side` pages on each side of the anchor key.
    pub fn anchored(keys: KeySpace<K, C>, pages_per_side: usize) -> Self {
        Self::custom(keys, move |keys, request| {
            let WindowEvent::AnchorChanged(anchor) = request.event else {
                return Vec::new();
            };
            let mut pages = vec![anchor.clone()];
            let context = request.context;

            extend_forward_by_pages(&mut pages, |key| keys.next_key(context, key), pages_per_side);
            extend_backward_by_pages(
                &mut pages,
                |key| keys.previous_key(context, key),
                pages_per_side,
            );
            pages
        })
    }
}

// ============================================================================
// PREFETCH HELPERS
// ============================================================================

/// Append successors of the last key until `minimum_items` items are covered.
pub fn extend_forward_by_items<K, T, N>(
    pages: &mut Vec<K>,
    next: N,
    cache: &PageSnapshot<K, T>,
    minimum_items: usize,
) where
    K: PageKey,
    N: Fn(&K) -> Option<K>,
{
    let Some(last) = pages.last() else {
        return;
    };
    let mut covered = 0;
    let mut candidate = next(last);

    while let Some(key) = candidate {
        if covered >= minimum_items || pages.contains(&key) {
            break;
        }
        let size = cache.page_len(&key);
        candidate = next(&key);
        pages.push(key);

        match size {
            Some(size) if size > 0 => covered += size,
            _ => break,
        }
    }
}

/// Prepend predecessors of the first key until `minimum_items` items are covered.
pub fn extend_backward_by_items<K, T, P>(
    pages: &mut Vec<K>,
    previous: P,
    cache: &PageSnapshot<K, T>,
    minimum_items: usize,
) where
    K: PageKey,
    P: Fn(&K) -> Option<K>,
{
    let Some(first) = pages.first() else {
        return;
    };
    let mut covered = 0;
    let mut candidate = previous(first);

    while let Some(key) = candidate {
        if covered >= minimum_items || pages.contains(&key) {
            break;
        }
        let size = cache.page_len(&key);
        candidate = previous(&key);
        pages.insert(0, key);

        match size {
            Some(size) if size > 0 => covered += size,
            _ => break,
        }
    }
}

/// Append up to `count` successors of the last key.
pub fn extend_forward_by_pages<K, N>(pages: &mut Vec<K>, next: N, count: usize)
where
    K: PageKey,
    N: Fn(&K) -> Option<K>,
{
    let Some(last) = pages.last() else {
        return;
    };
    let mut candidate = next(last);

    for _ in 0..count {
        match candidate {
            Some(key) if !pages.contains(&key) => {
                candidate = next(&key);
                pages.push(key);
            }
            _ => break,
        }
    }
}

/// Prepend up to `count` predecessors of the first key.
pub fn extend_backward_by_pages<K, P>(pages: &mut Vec<K>, previous: P, count: usize)
where
    K: PageKey,
    P: Fn(&K) -> Option<K>,
{
    let Some(first) = pages.first() else {
        return;
    };
    let mut candidate = previous(first);

    for _ in 0..count {
        match candidate {
            Some(key) if !pages.contains(&key) => {
                candidate = previous(&key);
                pages.insert(0, key);
            }
            _ => break,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::Page;
    use proptest::prelude::*;
    use std::collections::HashMap;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Property: The resolved window is never empty, whatever the event.
        #[test]
        fn prop_resolved_window_never_empty(
            visible in proptest::collection::vec(0usize..50, 0..5),
            current in proptest::collection::vec(0usize..50, 0..5),
            sizes in proptest::collection::hash_map(0usize..50, 0usize..15, 0..30),
            per_side in 0usize..40,
        ) {
            let pages: HashMap<usize, Page<u8>> = sizes
                .into_iter()
                .map(|(k, n)| (k, Page::from(vec![0u8; n])))
                .collect();
            let pages = PageSnapshot::new(1, pages);
            let event = WindowEvent::VisibleKeysChanged(visible);
            let strategy: FetchStrategy<usize, u8, WindowEvent<usize>> =
                FetchStrategy::minimum_item_count(KeySpace::indexed(0), per_side);

            let window = strategy.resolve_window(&WindowRequest::new(&event, &pages, &(), &current));
            prop_assert!(!window.is_empty());
        }

        /// Property: Fixed page count never adds more than the configured
        /// pages on either side of a single visible key.
        #[test]
        fn prop_fixed_page_count_is_bounded(
            visible in 0usize..100,
            per_side in 0usize..6,
        ) {
            let pages: PageSnapshot<usize, u8> = PageSnapshot::empty();
            let event = WindowEvent::visible([visible]);
            let strategy: FetchStrategy<usize, u8, WindowEvent<usize>> =
                FetchStrategy::fixed_page_count(KeySpace::indexed(0), per_side);

            let current: Vec<usize> = Vec::new();
            let window = strategy.resolve_window(&WindowRequest::new(&event, &pages, &(), &current));
            prop_assert_eq!(window.len(), 1 + per_side + per_side.min(visible));
            prop_assert!(window.windows(2).all(|pair| pair[0] + 1 == pair[1]));
        }
    }
}
