// Integration tests for the query cache

use std::sync::{Arc, Mutex};

use folio::mock::MockFetcher;
use folio::{QueryClient, QueryConfig, QueryKey, QueryResult, QueryStatus};
use tokio::time::Duration;

type Seen<V> = Arc<Mutex<Vec<QueryResult<V>>>>;

fn recorder<V: Clone + Send + 'static>() -> (Seen<V>, impl Fn(&QueryResult<V>) + Send + Sync + 'static)
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |result: &QueryResult<V>| {
        sink.lock().unwrap().push(result.clone());
    })
}

fn last<V: Clone>(seen: &Seen<V>) -> QueryResult<V> {
    seen.lock().unwrap().last().cloned().unwrap()
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_concurrent_subscribers_share_one_fetch() {
    let client = QueryClient::new();
    let mock = MockFetcher::gated();
    mock.push_ok(vec!["Dune".to_string(), "Emma".to_string()]);

    let mut recorders = Vec::new();
    let mut subs = Vec::new();
    for _ in 0..3 {
        let (seen, on_change) = recorder::<Vec<String>>();
        recorders.push(seen);
        subs.push(client.subscribe("books", mock.fetcher(), on_change));
    }
    settle().await;

    assert_eq!(mock.calls(), 1);
    assert_eq!(client.subscriber_count(&"books".into()), 3);
    assert!(subs.iter().all(|sub| sub.state().is_loading()));

    mock.release(1);
    settle().await;

    assert_eq!(mock.calls(), 1);
    for seen in &recorders {
        let result = last(seen);
        assert_eq!(result.status, QueryStatus::Success);
        assert_eq!(result.data.map(|titles| titles.len()), Some(2));
    }
}

#[tokio::test]
async fn test_fetch_query_joins_in_flight_fetch() {
    let client = QueryClient::new();
    let mock = MockFetcher::gated();
    mock.push_ok(5_i32);

    let _sub = client.subscribe("numbers", mock.fetcher(), |_| {});
    let reader = {
        let client = client.clone();
        let fetcher = mock.fetcher();
        tokio::spawn(async move { client.fetch_query("numbers", fetcher).await })
    };
    settle().await;
    mock.release(1);

    assert_eq!(reader.await.unwrap().unwrap(), 5);
    assert_eq!(mock.calls(), 1);
}

#[tokio::test]
async fn test_stale_data_stays_visible_while_refetching() {
    let client = QueryClient::new();
    let mock = MockFetcher::gated();
    mock.push_ok(1_i32);
    mock.push_ok(2_i32);

    let (seen, on_change) = recorder::<i32>();
    let _sub = client.subscribe("numbers", mock.fetcher(), on_change);
    mock.release(1);
    settle().await;
    assert_eq!(last(&seen).data, Some(1));

    assert_eq!(client.invalidate(&"numbers".into()), 1);
    settle().await;

    let refreshing = last(&seen);
    assert_eq!(refreshing.status, QueryStatus::Fetching);
    assert_eq!(refreshing.data, Some(1));
    assert!(refreshing.is_stale());
    assert!(!refreshing.is_loading());

    mock.release(1);
    settle().await;

    let fresh = last(&seen);
    assert_eq!(fresh.status, QueryStatus::Success);
    assert_eq!(fresh.data, Some(2));
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_failed_fetch_keeps_previous_data() {
    let client = QueryClient::new();
    let mock = MockFetcher::new();
    mock.push_ok(1_i32);
    mock.push_err("offline");

    let (seen, on_change) = recorder::<i32>();
    let _sub = client.subscribe("numbers", mock.fetcher(), on_change);
    settle().await;

    client.invalidate(&"numbers".into());
    settle().await;

    let failed = last(&seen);
    assert_eq!(failed.status, QueryStatus::Error);
    assert_eq!(failed.data, Some(1));
    assert_eq!(failed.error().map(|e| e.message().to_string()), Some("offline".to_string()));
}

#[tokio::test]
async fn test_failed_entry_refetches_on_next_subscribe() {
    let client = QueryClient::with_config(QueryConfig::default().with_stale_time(Duration::from_secs(60)));
    let mock = MockFetcher::new();
    mock.push_err("offline");
    mock.push_ok(3_i32);

    let first = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    assert!(first.state().is_error());
    drop(first);

    let second = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    assert_eq!(second.state().data, Some(3));
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_matches_prefix_only() {
    let client = QueryClient::new();
    let books = MockFetcher::new();
    let publishers = MockFetcher::new();
    books.push_ok(1_i32);
    books.push_ok(1_i32);
    books.push_ok(2_i32);
    books.push_ok(2_i32);
    publishers.push_ok(1_i32);

    let filtered = QueryKey::new("books").with("filtered").with("dune");
    let _all = client.subscribe("books", books.fetcher(), |_| {});
    let _dune = client.subscribe(filtered.clone(), books.fetcher(), |_| {});
    let _publishers = client.subscribe("publishers", publishers.fetcher(), |_| {});
    settle().await;
    assert_eq!(books.calls(), 2);

    assert_eq!(client.invalidate(&"books".into()), 2);
    settle().await;

    assert_eq!(books.calls(), 4);
    assert_eq!(publishers.calls(), 1);
    assert_eq!(client.get_snapshot::<i32>(&filtered).unwrap().data(), Some(&2));
}

#[tokio::test]
async fn test_invalidate_without_subscribers_defers_refetch() {
    let client = QueryClient::with_config(QueryConfig::default().with_stale_time(Duration::from_secs(60)));
    let mock = MockFetcher::new();
    mock.push_ok(1_i32);
    mock.push_ok(2_i32);

    let sub = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    drop(sub);

    client.invalidate(&"numbers".into());
    settle().await;
    assert_eq!(mock.calls(), 1);
    assert!(client.get_snapshot::<i32>(&"numbers".into()).unwrap().result.is_stale());

    let (seen, on_change) = recorder::<i32>();
    let _sub = client.subscribe("numbers", mock.fetcher(), on_change);
    settle().await;

    assert_eq!(mock.calls(), 2);
    let statuses: Vec<_> = seen.lock().unwrap().iter().map(|r| (r.status, r.data)).collect();
    assert_eq!(
        statuses,
        vec![
            (QueryStatus::Success, Some(1)),
            (QueryStatus::Fetching, Some(1)),
            (QueryStatus::Success, Some(2)),
        ]
    );
}

#[tokio::test]
async fn test_invalidate_during_fetch_refetches_once_after_settle() {
    let client = QueryClient::new();
    let mock = MockFetcher::gated();
    mock.push_ok(1_i32);
    mock.push_ok(2_i32);

    let sub = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    assert_eq!(mock.calls(), 1);

    client.invalidate(&"numbers".into());
    client.invalidate(&"numbers".into());
    settle().await;
    assert_eq!(mock.calls(), 1);

    mock.release(1);
    settle().await;
    assert_eq!(mock.calls(), 2);
    assert_eq!(sub.state().data, Some(1));

    mock.release(1);
    settle().await;
    assert_eq!(sub.state().data, Some(2));
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_during_unobserved_fetch_is_not_lost() {
    let client = QueryClient::with_config(QueryConfig::default().with_stale_time(Duration::from_secs(60)));
    let mock = MockFetcher::gated();
    mock.push_ok(1_i32);
    mock.push_ok(2_i32);

    let reader = tokio::spawn({
        let client = client.clone();
        let fetcher = mock.fetcher();
        async move { client.fetch_query("numbers", fetcher).await }
    });
    settle().await;
    assert_eq!(mock.calls(), 1);

    // the fetch was issued before the write, so its result is already outdated
    assert_eq!(client.invalidate(&"numbers".into()), 1);
    mock.release(1);
    assert_eq!(reader.await.unwrap().unwrap(), 1);
    settle().await;

    let snapshot = client.get_snapshot::<i32>(&"numbers".into()).unwrap();
    assert!(!snapshot.is_fetching);
    assert!(snapshot.result.is_stale);
    assert_eq!(snapshot.result.data, Some(1));
    assert_eq!(mock.calls(), 1);

    let sub = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    assert_eq!(mock.calls(), 2);
    mock.release(1);
    settle().await;
    assert_eq!(sub.state().data, Some(2));
    assert!(!sub.state().is_stale);
}

#[tokio::test]
async fn test_fetch_for_removed_entry_does_not_settle_replacement() {
    let client = QueryClient::new();
    let mock = MockFetcher::gated();
    mock.push_ok(1_i32);
    mock.push_ok(2_i32);

    let _old = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    assert!(client.remove(&"numbers".into()));

    let (seen, on_change) = recorder::<i32>();
    let _new = client.subscribe("numbers", mock.fetcher(), on_change);
    settle().await;
    assert_eq!(mock.calls(), 2);

    // the permit goes to the first, orphaned fetch
    mock.release(1);
    settle().await;
    let snapshot = client.get_snapshot::<i32>(&"numbers".into()).unwrap();
    assert!(snapshot.is_fetching);
    assert_eq!(snapshot.result.data, None);
    assert!(seen.lock().unwrap().iter().all(|r| r.data.is_none()));

    // a later subscriber joins the replacement's fetch instead of starting one
    let _joined = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    assert_eq!(mock.calls(), 2);

    mock.release(1);
    settle().await;
    assert_eq!(last(&seen).data, Some(2));
    assert_eq!(last(&seen).status, QueryStatus::Success);
    assert_eq!(mock.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_waits_for_in_flight_fetch() {
    let client = QueryClient::with_config(QueryConfig::default().with_cache_time(Duration::from_secs(1)));
    let mock = MockFetcher::gated();
    mock.push_ok(1_i32);

    drop(client.subscribe("numbers", mock.fetcher(), |_| {}));
    settle().await;
    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(client.len(), 1);

    mock.release(1);
    settle().await;
    let snapshot = client.get_snapshot::<i32>(&"numbers".into()).unwrap();
    assert_eq!(snapshot.result.data, Some(1));

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    assert!(client.is_empty());
}

#[tokio::test]
async fn test_unsubscribed_listener_is_not_notified() {
    let client = QueryClient::new();
    let mock = MockFetcher::gated();
    mock.push_ok(1_i32);

    let (seen, on_change) = recorder::<i32>();
    let sub = client.subscribe("numbers", mock.fetcher(), on_change);
    let _other = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    let before = seen.lock().unwrap().len();

    client.unsubscribe(sub);
    mock.release(1);
    settle().await;

    assert_eq!(seen.lock().unwrap().len(), before);
    assert_eq!(client.subscriber_count(&"numbers".into()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_time_controls_refetch_on_subscribe() {
    for stale_secs in [0, 1, 30] {
        let stale_time = Duration::from_secs(stale_secs);
        let client = QueryClient::with_config(QueryConfig::default().with_stale_time(stale_time));
        let mock = MockFetcher::new();
        mock.push_ok(1_i32);
        mock.push_ok(2_i32);

        drop(client.subscribe("numbers", mock.fetcher(), |_| {}));
        settle().await;
        assert_eq!(mock.calls(), 1);

        // Just before the data turns stale.
        if stale_secs > 0 {
            tokio::time::advance(stale_time - Duration::from_millis(1)).await;
            drop(client.subscribe("numbers", mock.fetcher(), |_| {}));
            settle().await;
            assert_eq!(mock.calls(), 1, "stale_time = {stale_secs}s");
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        let sub = client.subscribe("numbers", mock.fetcher(), |_| {});
        settle().await;
        assert_eq!(mock.calls(), 2, "stale_time = {stale_secs}s");
        assert_eq!(sub.state().data, Some(2));
    }
}

#[tokio::test(start_paused = true)]
async fn test_unobserved_entry_is_evicted_after_cache_time() {
    for cache_secs in [1, 10, 300] {
        let cache_time = Duration::from_secs(cache_secs);
        let client = QueryClient::with_config(QueryConfig::default().with_cache_time(cache_time));
        let mock = MockFetcher::new();
        mock.push_ok(1_i32);

        let sub = client.subscribe("numbers", mock.fetcher(), |_| {});
        settle().await;
        drop(sub);

        tokio::time::advance(cache_time - Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(client.len(), 1, "cache_time = {cache_secs}s");

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(client.is_empty(), "cache_time = {cache_secs}s");
    }
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_postpones_eviction() {
    let client = QueryClient::with_config(QueryConfig::default().with_cache_time(Duration::from_secs(10)));
    let mock = MockFetcher::new();
    mock.push_ok(1_i32);
    mock.push_ok(1_i32);

    drop(client.subscribe("numbers", mock.fetcher(), |_| {}));
    settle().await;

    tokio::time::advance(Duration::from_secs(5)).await;
    let sub = client.subscribe("numbers", mock.fetcher(), |_| {});
    settle().await;
    tokio::time::advance(Duration::from_secs(1)).await;
    drop(sub);
    settle().await;

    // The first timer fires here but the entry was observed since.
    tokio::time::advance(Duration::from_secs(4)).await;
    settle().await;
    assert_eq!(client.len(), 1);

    tokio::time::advance(Duration::from_secs(6)).await;
    settle().await;
    assert!(client.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_gc_sweeps_idle_entries() {
    let client = QueryClient::with_config(QueryConfig::default().with_cache_time(Duration::from_secs(60)));
    client.set_query_data("seeded", 1_i32);
    let mock = MockFetcher::new();
    mock.push_ok(2_i32);
    let _sub = client.subscribe("observed", mock.fetcher(), |_| {});
    settle().await;

    assert_eq!(client.gc(), 0);
    tokio::time::advance(Duration::from_secs(60)).await;

    assert_eq!(client.gc(), 1);
    assert!(client.get_snapshot::<i32>(&"seeded".into()).is_none());
    assert!(client.get_snapshot::<i32>(&"observed".into()).is_some());
}
