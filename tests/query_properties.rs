use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use query_sync::cache::{
    CacheStore, EntryStatus, EventKind, Fetcher, Page, PageContext, PaginationController,
    QueryClient, QueryOptions, fetcher, page_fetcher,
};
use query_sync::query_key;
use tokio::sync::oneshot;

fn counting(calls: &Arc<AtomicUsize>, value: u32) -> Fetcher<Vec<u32>> {
    let calls = Arc::clone(calls);
    fetcher(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::task::yield_now().await;
            Ok::<_, std::io::Error>(vec![value])
        }
    })
}

fn push(current: Option<&Vec<u32>>, value: &u32) -> Vec<u32> {
    let mut next = current.cloned().unwrap_or_default();
    next.push(*value);
    next
}

#[tokio::test]
async fn many_concurrent_readers_share_one_request() {
    let client: Arc<QueryClient<Vec<u32>>> = Arc::new(QueryClient::new());
    let key = query_key!["chat", "1"];
    let calls = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            let key = key.clone();
            let fetch = counting(&calls, 5);
            tokio::spawn(async move { client.ensure_fresh(&key, fetch).await })
        })
        .collect();

    for reader in readers {
        let value = reader.await.expect("reader task").expect("fetch");
        assert_eq!(value, vec![5]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!client.is_fetching(&key));
}

#[tokio::test(start_paused = true)]
async fn entries_go_stale_after_their_window() {
    let client: QueryClient<Vec<u32>> = QueryClient::new()
        .with_defaults(QueryOptions::default().with_stale_after(Duration::from_secs(10)));
    let key = query_key!["feed"];
    let calls = Arc::new(AtomicUsize::new(0));

    client
        .ensure_fresh(&key, counting(&calls, 1))
        .await
        .expect("first fetch");
    tokio::time::advance(Duration::from_secs(9)).await;
    client
        .ensure_fresh(&key, counting(&calls, 1))
        .await
        .expect("still fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    client
        .ensure_fresh(&key, counting(&calls, 1))
        .await
        .expect("stale refetch");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn prefix_invalidation_only_touches_matching_keys() {
    let client: QueryClient<Vec<u32>> = QueryClient::new()
        .with_defaults(QueryOptions::default().with_stale_after(Duration::from_secs(60)));
    let calls = Arc::new(AtomicUsize::new(0));
    let chat_one = query_key!["chat", "1"];
    let chat_two = query_key!["chat", "2"];
    let feed = query_key!["feed", "all"];

    for key in [&chat_one, &chat_two, &feed] {
        client
            .ensure_fresh(key, counting(&calls, 1))
            .await
            .expect("seed");
    }

    let mut invalidated = client.invalidate_prefix(&query_key!["chat"]);
    invalidated.sort();
    assert_eq!(invalidated, vec![chat_one.clone(), chat_two.clone()]);
    assert!(client.read(&chat_one).invalidated);
    assert!(!client.read(&feed).invalidated);
    assert_eq!(client.data(&chat_two), Some(vec![1]));
}

#[tokio::test]
async fn optimistic_value_is_visible_while_the_remote_call_is_pending() {
    let client: Arc<QueryClient<Vec<u32>>> = Arc::new(QueryClient::new());
    let key = query_key!["chat", "1"];
    let server = Arc::new(Mutex::new(vec![1]));

    let source = Arc::clone(&server);
    client.register(
        key.clone(),
        fetcher(move |_| {
            let rows = source.lock().expect("server lock").clone();
            async move { Ok::<_, std::io::Error>(rows) }
        }),
    );
    client.refetch(&key).await.expect("seed");

    let (release, gate) = oneshot::channel::<()>();
    let mutation = {
        let client = Arc::clone(&client);
        let key = key.clone();
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            client
                .mutate(
                    &key,
                    2,
                    move |value: u32| async move {
                        let _ = gate.await;
                        server.lock().expect("server lock").push(value * 10);
                        Ok::<_, std::io::Error>(())
                    },
                    push,
                )
                .await
        })
    };

    while client.data(&key) != Some(vec![1, 2]) {
        tokio::task::yield_now().await;
    }
    assert_eq!(client.read(&key).status, EntryStatus::Success);

    release.send(()).expect("mutation waiting");
    mutation.await.expect("task").expect("mutation");
    assert_eq!(client.data(&key), Some(vec![1, 20]));
}

#[tokio::test]
async fn rolled_back_mutation_restores_exact_snapshot_and_reports_events() {
    let client: QueryClient<Vec<u32>> = QueryClient::new();
    let key = query_key!["chat", "1"];
    let calls = Arc::new(AtomicUsize::new(0));
    client
        .ensure_fresh(&key, counting(&calls, 7))
        .await
        .expect("seed");

    let kinds = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    let _subscription = client.subscribe(key.clone(), move |event| {
        sink.lock().expect("sink lock").push((event.kind, event.epoch));
    });

    let error = client
        .mutate(
            &key,
            8,
            |_| async { Err::<(), _>(std::io::Error::other("rejected")) },
            push,
        )
        .await
        .expect_err("rolled back");
    assert!(error.is_rollback());

    let entry = client.read(&key);
    assert_eq!(entry.data, Some(vec![7]));
    assert_eq!(entry.status, EntryStatus::Error);

    let kinds = kinds.lock().expect("sink lock");
    let observed: Vec<EventKind> = kinds.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(
        observed,
        vec![EventKind::OptimisticApplied, EventKind::RolledBack]
    );
    assert!(kinds[0].1 < kinds[1].1);
}

#[tokio::test]
async fn superseded_fetch_never_overwrites_newer_state() {
    let client: Arc<QueryClient<Vec<u32>>> = Arc::new(QueryClient::new());
    let key = query_key!["chat", "1"];
    let (release, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let pending_gate = Arc::clone(&gate);

    // The first call waits for the gate; later calls answer at once.
    let slow = fetcher(move |_| {
        let gate = pending_gate.lock().expect("gate lock").take();
        async move {
            match gate {
                Some(gate) => {
                    let _ = gate.await;
                    Ok::<_, std::io::Error>(vec![99])
                }
                None => Ok(vec![5]),
            }
        }
    });

    let reader = {
        let client = Arc::clone(&client);
        let key = key.clone();
        tokio::spawn(async move { client.ensure_fresh(&key, slow).await })
    };
    while gate.lock().expect("gate lock").is_some() {
        tokio::task::yield_now().await;
    }
    assert!(client.is_fetching(&key));

    client
        .mutate(
            &key,
            1,
            |_| async { Ok::<_, std::io::Error>(()) },
            push,
        )
        .await
        .expect("mutation");

    release.send(()).expect("fetch waiting");
    let late = reader.await.expect("task").expect("late response");
    assert_eq!(late, vec![99]);
    assert_eq!(client.data(&key), Some(vec![5]));
    assert_eq!(client.read(&key).status, EntryStatus::Success);
}

#[tokio::test]
async fn pages_accumulate_in_cursor_order() {
    let pagination: PaginationController<u32> =
        PaginationController::new(Arc::new(CacheStore::new()));
    let key = query_key!["feed", "all"];
    let cursors = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&cursors);
    let pages = page_fetcher(move |context: PageContext<u64>| {
        seen.lock().expect("cursor lock").push(context.page_param);
        let start = context.page_param as u32;
        async move {
            let next = (start < 6).then_some(u64::from(start) + 3);
            Ok::<_, std::io::Error>(Page::new(vec![start, start + 1, start + 2], next))
        }
    });

    while pagination.has_next_page(&key) {
        pagination
            .fetch_next(&key, Arc::clone(&pages))
            .await
            .expect("page");
    }

    let items: Vec<u32> = pagination
        .pages(&key)
        .expect("pages cached")
        .items()
        .copied()
        .collect();
    assert_eq!(items, (0..9).collect::<Vec<_>>());
    assert_eq!(*cursors.lock().expect("cursor lock"), vec![0, 3, 6]);
}
