//! Paginator tests driven through the factory, without the facade.

use pagekit::{
    FetchStrategy, KeySpace, PagekitError, Paginator, PaginatorFactory, StoreError, WindowEvent,
};
use pagekit_test_utils::assertions::{wait_for_exact, wait_until};
use pagekit_test_utils::generators::arb_window_event;
use pagekit_test_utils::init_tracing;
use pagekit_test_utils::sources::{gated_pages, numbered_page, numbered_pages};
use proptest::prelude::*;
use tokio::runtime::Handle;

type Factory = PaginatorFactory<usize, u32, u32, WindowEvent<usize>, ()>;
type NumberedPaginator = Paginator<usize, u32, u32, WindowEvent<usize>, ()>;

fn range(start: u32, end: u32) -> Vec<u32> {
    (start..end).collect()
}

fn factory(pages_per_side: usize, page_size: usize, page_count: usize) -> Factory {
    let (source, _log) = numbered_pages(page_size, page_count);
    PaginatorFactory::new(
        FetchStrategy::fixed_page_count(KeySpace::indexed(0), pages_per_side),
        source,
        |item: &u32| *item,
        Handle::current(),
    )
}

fn expected_items(paginator: &NumberedPaginator, page_size: usize, page_count: usize) -> Vec<u32> {
    paginator
        .active_keys()
        .into_iter()
        .flat_map(|key| numbered_page(key, page_size, page_count).unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn test_create_seeds_window() {
    let factory = factory(0, 4, 20);

    let fresh = factory.create((), Vec::new());
    assert_eq!(fresh.active_keys(), vec![0]);
    assert!(!fresh.is_running());

    let seeded = factory.create((), vec![2, 3]);
    assert_eq!(seeded.active_keys(), vec![2, 3]);
    assert_ne!(fresh.id(), seeded.id());
}

#[tokio::test]
async fn test_loaded_pages_bridge_gaps_in_target() {
    init_tracing();
    let factory = factory(0, 10, 20);
    let paginator = factory.create((), Vec::new());
    let mut items = factory.items();
    paginator.start().expect("start should succeed");

    paginator.on_event(WindowEvent::visible([1, 2, 3]));
    wait_for_exact(&mut items, &range(10, 40)).await;

    // Page 2 is cached, so it stays between 1 and 3.
    paginator.on_event(WindowEvent::visible([1, 3]));
    assert_eq!(paginator.active_keys(), vec![1, 2, 3]);

    paginator.on_event(WindowEvent::visible([3]));
    wait_for_exact(&mut items, &range(30, 40)).await;
    wait_until(|| {
        paginator.store().keys().map(|keys| keys == vec![3]).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_uncached_keys_are_not_bridged() {
    init_tracing();
    let factory = factory(0, 10, 20);
    let paginator = factory.create((), Vec::new());
    let mut items = factory.items();
    paginator.start().expect("start should succeed");
    wait_for_exact(&mut items, &range(0, 10)).await;

    paginator.on_event(WindowEvent::visible([0, 3]));
    assert_eq!(paginator.active_keys(), vec![0, 3]);
}

#[tokio::test]
async fn test_jump_inserts_key_before_reachable_window_key() {
    let factory = factory(0, 10, 20);
    let paginator = factory.create((), vec![5]);

    paginator.jump_to(3).await.expect("jump should succeed");
    assert_eq!(paginator.active_keys(), vec![3, 5]);

    let content = paginator.jump_to(4).await.expect("jump should succeed");
    assert_eq!(content, Some(range(40, 50)));
    assert_eq!(paginator.active_keys(), vec![3, 4, 5]);
    assert!(paginator
        .store()
        .contains(&4)
        .expect("store should be readable"));
}

#[tokio::test]
async fn test_stop_keeps_pages_and_start_resumes() {
    init_tracing();
    let factory = factory(1, 5, 20);
    let paginator = factory.create((), Vec::new());
    let mut items = factory.items();
    paginator.start().expect("start should succeed");
    paginator.start().expect("second start should be a no-op");

    paginator.on_event(WindowEvent::visible([2]));
    wait_for_exact(&mut items, &range(5, 20)).await;
    assert!(paginator.is_running());

    paginator.stop().await;
    assert!(!paginator.is_running());
    assert!(paginator.loading_keys().is_empty());
    assert!(!*factory.is_fetching_next().borrow());
    assert_eq!(paginator.active_keys(), vec![1, 2, 3]);
    assert_eq!(factory.current_items(), range(5, 20));

    paginator.start().expect("restart should succeed");
    assert!(paginator.is_running());
    paginator.on_event(WindowEvent::visible([3]));
    wait_for_exact(&mut items, &range(10, 25)).await;
}

#[tokio::test]
async fn test_shutdown_drops_cached_pages() {
    init_tracing();
    let factory = factory(0, 5, 20);
    let paginator = factory.create((), Vec::new());
    let mut items = factory.items();
    paginator.start().expect("start should succeed");
    wait_for_exact(&mut items, &range(0, 5)).await;

    paginator.shutdown().await;
    assert!(!paginator.is_running());
    assert!(paginator.store().keys().expect("store should be readable").is_empty());
    assert_eq!(paginator.key_for_item(&3).expect("lookup should succeed"), None);
}

#[tokio::test]
async fn test_leaving_window_cancels_pending_load() {
    init_tracing();
    let (source, gate, log) = gated_pages(5, 20);
    let factory: Factory = PaginatorFactory::new(
        FetchStrategy::fixed_page_count(KeySpace::indexed(0), 0),
        source,
        |item: &u32| *item,
        Handle::current(),
    );
    let paginator = factory.create((), Vec::new());
    let mut items = factory.items();
    paginator.start().expect("start should succeed");
    wait_until(|| paginator.loading_keys() == vec![0]).await;

    paginator.on_event(WindowEvent::visible([4]));
    wait_until(|| log.count(4) == 1).await;
    wait_until(|| paginator.loading_keys() == vec![4]).await;

    gate.open();
    wait_for_exact(&mut items, &range(20, 25)).await;
    assert!(!paginator.store().contains(&0).expect("store should be readable"));
}

#[tokio::test]
async fn test_poisoned_store_fails_jumps_and_drops_events() {
    init_tracing();
    let (source, _log) = numbered_pages(10, 20);
    let factory: Factory = PaginatorFactory::new(
        FetchStrategy::fixed_page_count(KeySpace::indexed(0), 0),
        source,
        |item: &u32| {
            assert_ne!(*item, 35, "identity rejects item 35");
            *item
        },
        Handle::current(),
    );
    let paginator = factory.create((), Vec::new());

    let jumper = paginator.clone();
    let crashed = tokio::spawn(async move { jumper.jump_to(3).await }).await;
    assert!(crashed.expect_err("indexing page 3 should panic").is_panic());

    let err = paginator
        .jump_to(4)
        .await
        .expect_err("jump over a poisoned store should fail");
    assert!(matches!(err, PagekitError::Store(StoreError::LockPoisoned { .. })));

    paginator.on_event(WindowEvent::visible([6]));
    assert_eq!(paginator.active_keys(), vec![0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_settle_on_final_window() {
    init_tracing();
    let factory = factory(1, 3, 40);
    let paginator = factory.create((), Vec::new());
    let mut items = factory.items();
    paginator.start().expect("start should succeed");

    let mut senders = Vec::new();
    for worker in 0..8usize {
        let paginator = paginator.clone();
        senders.push(tokio::spawn(async move {
            for step in 0..20usize {
                paginator.on_event(WindowEvent::visible([(worker * 7 + step) % 30]));
                tokio::task::yield_now().await;
            }
        }));
    }
    for sender in senders {
        sender.await.expect("sender should not panic");
    }

    paginator.on_event(WindowEvent::visible([10]));
    assert_eq!(paginator.active_keys().first(), Some(&9));
    let expected = expected_items(&paginator, 3, 40);
    wait_for_exact(&mut items, &expected).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_event_racing_jump_keeps_jumped_page() {
    init_tracing();
    for _ in 0..20 {
        let factory = factory(0, 10, 20);
        let paginator = factory.create((), Vec::new());
        let mut items = factory.items();
        paginator.start().expect("start should succeed");
        wait_for_exact(&mut items, &range(0, 10)).await;

        let jumper = paginator.clone();
        let jump = tokio::spawn(async move { jumper.jump_to(3).await });
        let sender = paginator.clone();
        let event = tokio::spawn(async move { sender.on_event(WindowEvent::visible([2, 4])) });

        let content = jump
            .await
            .expect("jump task should not panic")
            .expect("jump should succeed");
        event.await.expect("event task should not panic");
        assert_eq!(content, Some(range(30, 40)));

        // Whichever lands first, the cached jump target bridges 2 and 4.
        assert_eq!(paginator.active_keys(), vec![2, 3, 4]);
        wait_for_exact(&mut items, &range(20, 50)).await;
        paginator.shutdown().await;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_items_follow_final_window(events in prop::collection::vec(arb_window_event(16), 1..6)) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime should build");

        let active = runtime.block_on(async {
            let factory = factory(1, 4, 12);
            let paginator = factory.create((), Vec::new());
            let mut items = factory.items();
            paginator.start().expect("start should succeed");

            for event in events {
                paginator.on_event(event);
            }
            let expected = expected_items(&paginator, 4, 12);
            wait_for_exact(&mut items, &expected).await;

            let active = paginator.active_keys();
            paginator.shutdown().await;
            active
        });

        prop_assert!(!active.is_empty());
    }
}
