//! Per-key arena of cancellable load tasks.
//!
//! At most one job is tracked per key. `launch_if_idle` uses the DashMap entry
//! API so concurrent launches for the same key resolve to a single spawn.
//! Jobs remove their own entry when they finish; each job carries a
//! generation id and only ever removes the entry holding that id, so a job
//! that finishes late never untracks its replacement.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::join_all;
use pagekit_core::PageKey;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, warn};

struct TrackedJob {
    id: u64,
    handle: JoinHandle<()>,
}

/// Handle to a tracked job, either freshly started or already running.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: u64,
    abort: AbortHandle,
    is_new: bool,
}

impl JobHandle {
    /// Generation id of the job.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this call started the job.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Request cancellation without waiting for it.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Removes a finished job's entry, if it still belongs to that job.
struct Untrack<K: PageKey> {
    jobs: Arc<DashMap<K, TrackedJob>>,
    key: K,
    id: u64,
}

impl<K: PageKey> Drop for Untrack<K> {
    fn drop(&mut self) {
        self.jobs.remove_if(&self.key, |_, job| job.id == self.id);
    }
}

pub struct JobTracker<K: PageKey> {
    jobs: Arc<DashMap<K, TrackedJob>>,
    runtime: Handle,
    next_id: AtomicU64,
}

impl<K: PageKey> std::fmt::Debug for JobTracker<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker")
            .field("active", &self.jobs.len())
            .finish_non_exhaustive()
    }
}

impl<K: PageKey> JobTracker<K> {
    /// Create a tracker spawning onto `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            runtime,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start the work for `key` unless a job is already tracked for it.
    ///
    /// `make_work` only runs when a new job is started.
    pub fn launch_if_idle<F, Fut>(&self, key: K, make_work: F) -> JobHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self.jobs.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let job = entry.get();
                JobHandle {
                    id: job.id,
                    abort: job.handle.abort_handle(),
                    is_new: false,
                }
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let jobs = Arc::clone(&self.jobs);
                let work = make_work();

                // The guard lives inside the task: a task dropped before its
                // first poll never touches the map.
                let handle = self.runtime.spawn(async move {
                    let _untrack = Untrack { jobs, key, id };
                    work.await;
                });
                let abort = handle.abort_handle();
                entry.insert(TrackedJob { id, handle });

                JobHandle {
                    id,
                    abort,
                    is_new: true,
                }
            }
        }
    }

    /// Cancel the job for `key` and wait until it has stopped.
    ///
    /// The key is untracked before this returns. No-op for untracked keys.
    pub async fn cancel_and_join(&self, key: &K) {
        let Some((_, job)) = self.jobs.remove(key) else {
            return;
        };
        job.handle.abort();
        log_join_result(key, job.handle.await);
    }

    /// Cancel every tracked job and wait for all of them.
    pub async fn clear(&self) {
        let keys: Vec<K> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        let mut pending = Vec::with_capacity(keys.len());

        for key in keys {
            if let Some((key, job)) = self.jobs.remove(&key) {
                job.handle.abort();
                pending.push(async move { (key, job.handle.await) });
            }
        }

        if pending.is_empty() {
            return;
        }
        debug!(jobs = pending.len(), "Cancelling all page loads");
        for (key, result) in join_all(pending).await {
            log_join_result(&key, result);
        }
    }

    /// Abort every tracked job without waiting. Usable from `Drop`.
    pub fn abort_all(&self) {
        self.jobs.retain(|_, job| {
            job.handle.abort();
            false
        });
    }

    /// Whether a job is tracked for `key` and has not finished yet.
    pub fn is_active(&self, key: &K) -> bool {
        self.jobs
            .get(key)
            .is_some_and(|job| !job.handle.is_finished())
    }

    pub fn active_keys(&self) -> Vec<K> {
        self.jobs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn log_join_result<K: PageKey>(key: &K, result: Result<(), JoinError>) {
    match result {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {}
        Err(err) => warn!(key = ?key, error = %err, "Page load task panicked"),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::{oneshot, Notify};

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_second_launch_reuses_running_job() {
        let tracker = JobTracker::new(Handle::current());
        let gate = Arc::new(Notify::new());
        let starts = Arc::new(AtomicUsize::new(0));

        let launch = || {
            let gate = Arc::clone(&gate);
            let starts = Arc::clone(&starts);
            tracker.launch_if_idle(1u32, move || async move {
                starts.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
            })
        };

        let first = launch();
        let second = launch();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.id(), second.id());
        assert_eq!(tracker.len(), 1);

        tracker.cancel_and_join(&1).await;
        assert!(starts.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_launches_start_one_job() {
        let tracker = Arc::new(JobTracker::new(Handle::current()));
        let gate = Arc::new(Notify::new());
        let built = Arc::new(AtomicUsize::new(0));

        let mut callers = Vec::new();
        for _ in 0..16 {
            let tracker = Arc::clone(&tracker);
            let gate = Arc::clone(&gate);
            let built = Arc::clone(&built);
            callers.push(tokio::spawn(async move {
                tracker
                    .launch_if_idle("k", move || {
                        built.fetch_add(1, Ordering::SeqCst);
                        async move { gate.notified().await }
                    })
                    .is_new()
            }));
        }

        let mut new_jobs = 0;
        for caller in callers {
            if caller.await.expect("caller should not panic") {
                new_jobs += 1;
            }
        }

        assert_eq!(new_jobs, 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.len(), 1);
        tracker.clear().await;
    }

    #[tokio::test]
    async fn test_finished_job_untracks_itself() {
        let tracker = JobTracker::new(Handle::current());
        let (done_tx, done_rx) = oneshot::channel();

        tracker.launch_if_idle(5u32, move || async move {
            let _ = done_tx.send(());
        });
        done_rx.await.expect("job should run");

        wait_until(|| tracker.is_empty()).await;
        assert!(!tracker.is_active(&5));
    }

    #[tokio::test]
    async fn test_cancel_and_join_stops_work_before_returning() {
        let tracker = JobTracker::new(Handle::current());
        let dropped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = oneshot::channel();

        {
            let dropped = Arc::clone(&dropped);
            let finished = Arc::clone(&finished);
            tracker.launch_if_idle(2u32, move || async move {
                let _guard = SetOnDrop(dropped);
                let _ = started_tx.send(());
                tokio::time::sleep(Duration::from_secs(30)).await;
                finished.store(true, Ordering::SeqCst);
            });
        }
        started_rx.await.expect("job should start");
        assert!(tracker.is_active(&2));

        tracker.cancel_and_join(&2).await;

        assert!(!tracker.is_active(&2));
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_untracked_key_is_noop() {
        let tracker: JobTracker<u32> = JobTracker::new(Handle::current());
        tracker.cancel_and_join(&42).await;
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_relaunch_after_cancel_starts_new_generation() {
        let tracker = JobTracker::new(Handle::current());
        let gate = Arc::new(Notify::new());

        let first = {
            let gate = Arc::clone(&gate);
            tracker.launch_if_idle(3u32, move || async move { gate.notified().await })
        };
        tracker.cancel_and_join(&3).await;

        let second = {
            let gate = Arc::clone(&gate);
            tracker.launch_if_idle(3u32, move || async move { gate.notified().await })
        };
        assert!(second.is_new());
        assert_ne!(first.id(), second.id());
        assert!(tracker.is_active(&3));

        tracker.clear().await;
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_clear_cancels_everything() {
        let tracker = JobTracker::new(Handle::current());
        let gate = Arc::new(Notify::new());

        for key in 0u32..5 {
            let gate = Arc::clone(&gate);
            tracker.launch_if_idle(key, move || async move { gate.notified().await });
        }
        let mut keys = tracker.active_keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);

        tracker.clear().await;
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_abort_all_untracks_synchronously() {
        let tracker = JobTracker::new(Handle::current());
        let gate = Arc::new(Notify::new());
        let handle = {
            let gate = Arc::clone(&gate);
            tracker.launch_if_idle(8u32, move || async move { gate.notified().await })
        };

        tracker.abort_all();
        assert!(tracker.is_empty());
        wait_until(|| handle.is_finished()).await;
    }
}
