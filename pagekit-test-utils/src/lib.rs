//! pagekit Test Utilities
//!
//! Shared test infrastructure for the pagekit workspace:
//! - In-memory page sources with load logging, gating, failures, and pushes
//! - Proptest generators for window events and page caches
//! - Async assertions for observable item lists
//! - Tracing initialisation for tests

use futures_util::future;
use futures_util::stream::{self, StreamExt};
use pagekit::{LoadError, PageSource};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Default upper bound for async assertions.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Install a test-writer subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pagekit=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PAGE SOURCES
// ============================================================================

pub mod sources {
    //! Page sources over numbered items.
    //!
    //! Page `k` of size `n` holds the items `k*n .. (k+1)*n`. Keys at or past
    //! `page_count` load as `None`.

    use super::*;

    /// Content of numbered page `key`, `None` past the last page.
    pub fn numbered_page(key: usize, page_size: usize, page_count: usize) -> Option<Vec<u32>> {
        if key >= page_count {
            return None;
        }
        let start = key * page_size;
        Some((start..start + page_size).map(|v| v as u32).collect())
    }

    /// Records every key a source was asked to load.
    #[derive(Debug, Clone, Default)]
    pub struct LoadLog {
        loads: Arc<Mutex<Vec<usize>>>,
    }

    impl LoadLog {
        pub fn record(&self, key: usize) {
            lock(&self.loads).push(key);
        }

        /// Number of loads started for `key`.
        pub fn count(&self, key: usize) -> usize {
            lock(&self.loads).iter().filter(|k| **k == key).count()
        }

        pub fn total(&self) -> usize {
            lock(&self.loads).len()
        }

        /// Every load in start order.
        pub fn keys(&self) -> Vec<usize> {
            lock(&self.loads).clone()
        }
    }

    /// One-shot numbered pages.
    pub fn numbered_pages(
        page_size: usize,
        page_count: usize,
    ) -> (impl PageSource<usize, u32, ()>, LoadLog) {
        let log = LoadLog::default();
        let recorder = log.clone();
        let source = move |_: &(), key: &usize| {
            recorder.record(*key);
            stream::once(future::ready(Ok::<_, LoadError>(numbered_page(
                *key, page_size, page_count,
            ))))
        };
        (source, log)
    }

    /// Opens or closes a [`gated_pages`] source.
    #[derive(Debug, Clone)]
    pub struct Gate {
        open: Arc<watch::Sender<bool>>,
    }

    impl Gate {
        pub fn open(&self) {
            self.open.send_replace(true);
        }

        pub fn close(&self) {
            self.open.send_replace(false);
        }
    }

    /// Numbered pages whose loads wait until the gate is opened.
    pub fn gated_pages(
        page_size: usize,
        page_count: usize,
    ) -> (impl PageSource<usize, u32, ()>, Gate, LoadLog) {
        let (open, gate_rx) = watch::channel(false);
        let log = LoadLog::default();
        let recorder = log.clone();
        let source = move |_: &(), key: &usize| {
            let key = *key;
            let mut gate = gate_rx.clone();
            recorder.record(key);
            stream::once(async move {
                let _ = gate.wait_for(|open| *open).await;
                Ok::<_, LoadError>(numbered_page(key, page_size, page_count))
            })
        };
        (
            source,
            Gate {
                open: Arc::new(open),
            },
            log,
        )
    }

    /// Makes a [`failing_pages`] source succeed from now on.
    #[derive(Debug, Clone)]
    pub struct FailSwitch {
        failing: Arc<AtomicBool>,
    }

    impl FailSwitch {
        pub fn heal(&self) {
            self.failing.store(false, Ordering::SeqCst);
        }

        pub fn is_failing(&self) -> bool {
            self.failing.load(Ordering::SeqCst)
        }
    }

    /// Numbered pages where `broken` keys fail until healed.
    pub fn failing_pages(
        page_size: usize,
        page_count: usize,
        broken: Vec<usize>,
    ) -> (impl PageSource<usize, u32, ()>, FailSwitch, LoadLog) {
        let switch = FailSwitch {
            failing: Arc::new(AtomicBool::new(true)),
        };
        let log = LoadLog::default();
        let recorder = log.clone();
        let state = switch.clone();
        let source = move |_: &(), key: &usize| {
            let key = *key;
            recorder.record(key);
            let load = if state.is_failing() && broken.contains(&key) {
                Err(LoadError::new(format!("page {key} unavailable")))
            } else {
                Ok(numbered_page(key, page_size, page_count))
            };
            stream::once(future::ready(load))
        };
        (source, switch, log)
    }

    /// Pushes new content into running loads of a [`live_pages`] source.
    #[derive(Debug, Clone)]
    pub struct LivePages {
        page_size: usize,
        channels: Arc<Mutex<HashMap<usize, watch::Sender<Option<Vec<u32>>>>>>,
    }

    impl LivePages {
        fn receiver(&self, key: usize) -> watch::Receiver<Option<Vec<u32>>> {
            let mut channels = lock(&self.channels);
            channels
                .entry(key)
                .or_insert_with(|| watch::channel(numbered_page(key, self.page_size, usize::MAX)).0)
                .subscribe()
        }

        /// Replace the content of `key`; `None` unloads it.
        pub fn push(&self, key: usize, items: Option<Vec<u32>>) {
            match lock(&self.channels).entry(key) {
                Entry::Occupied(sender) => {
                    sender.get().send_replace(items);
                }
                Entry::Vacant(slot) => {
                    slot.insert(watch::channel(items).0);
                }
            }
        }
    }

    /// Unbounded numbered pages whose loads stay open for pushed updates.
    pub fn live_pages(page_size: usize) -> (impl PageSource<usize, u32, ()>, LivePages) {
        let live = LivePages {
            page_size,
            channels: Arc::new(Mutex::new(HashMap::new())),
        };
        let handle = live.clone();
        let source = move |_: &(), key: &usize| {
            WatchStream::new(handle.receiver(*key)).map(Ok::<_, LoadError>)
        };
        (source, live)
    }

    /// Pages of strings labelled with the context they were loaded for.
    pub fn labelled_pages(page_size: usize) -> impl PageSource<usize, String, String> {
        move |context: &String, key: &usize| {
            let start = key * page_size;
            let items: Vec<String> = (start..start + page_size)
                .map(|n| format!("{context}:{n}"))
                .collect();
            stream::once(future::ready(Ok::<_, LoadError>(Some(items))))
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating test data.

    use pagekit::WindowEvent;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// A run of 1 to 3 consecutive visible keys below `max_key`.
    pub fn arb_visible_keys(max_key: usize) -> impl Strategy<Value = Vec<usize>> {
        (0..max_key, 1usize..4).prop_map(|(start, len)| (start..start + len).collect())
    }

    pub fn arb_window_event(max_key: usize) -> impl Strategy<Value = WindowEvent<usize>> {
        prop_oneof![
            arb_visible_keys(max_key).prop_map(WindowEvent::VisibleKeysChanged),
            (0..max_key).prop_map(WindowEvent::AnchorChanged),
        ]
    }

    /// Cached page sizes, including empty pages.
    pub fn arb_page_sizes(max_key: usize, max_size: usize) -> impl Strategy<Value = HashMap<usize, usize>> {
        proptest::collection::hash_map(0..max_key, 0..=max_size, 0..max_key)
    }
}

// ============================================================================
// ASYNC ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Waiting helpers for observable state.

    use super::*;
    use std::fmt::Debug;

    /// Wait until the item list satisfies `predicate` and return it.
    pub async fn wait_for_items<T, P>(rx: &mut watch::Receiver<Vec<T>>, predicate: P) -> Vec<T>
    where
        T: Clone + Debug,
        P: FnMut(&Vec<T>) -> bool,
    {
        let outcome = tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(predicate))
            .await
            .map(|result| result.map(|items| items.clone()));
        match outcome {
            Ok(Ok(items)) => items,
            Ok(Err(_)) => panic!("item channel closed"),
            Err(_) => panic!("timed out waiting for items, last: {:?}", *rx.borrow()),
        }
    }

    /// Wait until the item list equals `expected`.
    pub async fn wait_for_exact<T>(rx: &mut watch::Receiver<Vec<T>>, expected: &[T])
    where
        T: Clone + Debug + PartialEq,
    {
        wait_for_items(rx, |items| items.as_slice() == expected).await;
    }

    /// Poll `condition` until it holds.
    pub async fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        while !condition() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for condition"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Give background tasks a moment to run.
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
