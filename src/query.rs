//! Cached queries with request coalescing and stale-while-revalidate reads.
//!
//! This module provides the [`QueryClient`], the single source of truth for
//! remote-resource reads, similar to SWR or TanStack Query.
//!
//! # Design Pattern: Subscription-based State Management
//!
//! Consumers declare interest in a [`QueryKey`] and receive the entry's state
//! through a callback (or a stream, see [`QueryClient::watch`]). When you
//! subscribe:
//!
//! 1. The current state is delivered immediately, cached data included
//! 2. If data is stale or missing, a fetch is started in the background
//! 3. Every later change (fetch started, data landed, fetch failed) is delivered
//!    to every subscriber of the key
//!
//! Concurrent requesters of the same key share one in-flight fetch, so a
//! fetcher runs at most once at a time per key.
//!
//! # Example
//!
//! ```rust,no_run
//! use folio::{FetchError, QueryClient, QueryKey};
//! use futures::FutureExt;
//!
//! async fn fetch_titles() -> Result<Vec<String>, FetchError> {
//!     Ok(vec!["Dune".to_string()])
//! }
//!
//! # async fn run() {
//! let client = QueryClient::new();
//!
//! let subscription = client.subscribe(
//!     QueryKey::new("books"),
//!     || fetch_titles().boxed(),
//!     |result| println!("books: {:?} ({:?})", result.data, result.status),
//! );
//!
//! // Later, after a write:
//! client.invalidate(&QueryKey::new("books"));
//!
//! drop(subscription);
//! # }
//! ```

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::FutureExt;
use futures::Stream;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

use crate::cache::{AnyEntry, CacheEntry, Fetcher, InFlight, Listener, Refetch};
use crate::config::QueryConfig;
use crate::error::FetchError;
use crate::key::QueryKey;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Created but no fetch has started yet.
    Idle,
    /// A fetch is in flight. Previous data and error remain visible.
    Fetching,
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed. Previous data remains visible.
    Error,
}

/// The externally visible state of a query.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    /// The current status.
    pub status: QueryStatus,
    /// The last successfully fetched value, kept across refetches and failures.
    pub data: Option<T>,
    /// The last failure, cleared by the next success.
    pub error: Option<FetchError>,
    /// Whether the data is older than the stale time or was invalidated.
    pub is_stale: bool,
    /// When the data was last fetched successfully.
    pub updated_at: Option<Instant>,
}

impl<T> QueryResult<T> {
    /// A result for a key that has no cache entry.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_stale: false,
            updated_at: None,
        }
    }

    /// Returns the data if any fetch has succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Returns the last error, if the last fetch failed.
    pub const fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    /// Returns `true` if a fetch is running and there is no data to show yet.
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, QueryStatus::Fetching) && self.data.is_none()
    }

    /// Returns `true` if a fetch is running.
    pub const fn is_fetching(&self) -> bool {
        matches!(self.status, QueryStatus::Fetching)
    }

    /// Returns `true` if the last fetch succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success)
    }

    /// Returns `true` if the last fetch failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }

    /// Returns `true` if the data is stale.
    pub const fn is_stale(&self) -> bool {
        self.is_stale
    }
}

/// A synchronous read of a cache entry, see [`QueryClient::get_snapshot`].
#[derive(Debug, Clone)]
pub struct CacheSnapshot<T> {
    /// The entry's key.
    pub key: QueryKey,
    /// Number of active subscribers.
    pub subscriber_count: usize,
    /// Whether a fetch is in flight.
    pub is_fetching: bool,
    /// The entry's visible state.
    pub result: QueryResult<T>,
}

impl<T> CacheSnapshot<T> {
    /// Shorthand for `self.result.data()`.
    pub const fn data(&self) -> Option<&T> {
        self.result.data()
    }

    /// Shorthand for `self.result.error()`.
    pub const fn error(&self) -> Option<&FetchError> {
        self.result.error()
    }

    /// Shorthand for `self.result.status`.
    pub const fn status(&self) -> QueryStatus {
        self.result.status
    }
}

struct ClientInner {
    entries: DashMap<QueryKey, Box<dyn AnyEntry>>,
    config: QueryConfig,
    next_listener: AtomicU64,
    next_fetch: AtomicU64,
}

/// The query cache.
///
/// `QueryClient` owns the mapping from key to cached result, subscriber set,
/// and in-flight fetch. It handles:
/// - Caching fetch results per key
/// - Coalescing concurrent fetches of the same key
/// - Notifying subscribers when an entry changes
/// - Invalidation by key prefix and eviction of unobserved entries
///
/// Cloning is cheap and every clone refers to the same cache. Separate
/// clients created with [`QueryClient::new`] share nothing.
///
/// Subscribing, invalidating, and fetching spawn Tokio tasks and therefore
/// must happen inside a Tokio runtime.
///
/// # Example
///
/// ```rust
/// use folio::{QueryClient, QueryConfig};
/// use std::time::Duration;
///
/// let config = QueryConfig::new(
///     Duration::from_secs(30),  // stale_time
///     Duration::from_secs(300), // cache_time
/// );
///
/// let client = QueryClient::with_config(config);
/// assert!(client.is_empty());
/// ```
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.inner.entries.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl QueryClient {
    /// Creates a new query client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    /// Creates a new query client with the given configuration.
    #[must_use]
    pub fn with_config(config: QueryConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                entries: DashMap::new(),
                config,
                next_listener: AtomicU64::new(0),
                next_fetch: AtomicU64::new(0),
            }),
        }
    }

    /// Gets the query configuration.
    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.inner.config
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Registers interest in `key`.
    ///
    /// `on_change` is called once with the current state, then every time the
    /// entry's visible state changes, until the returned [`Subscription`] is
    /// dropped. If the entry is missing, stale, invalidated, or failed, a fetch
    /// starts in the background (or the in-flight one is joined) while any
    /// cached data is served as interim.
    ///
    /// `fetcher` replaces the fetcher previously registered for the key and is
    /// used for every later refetch, including ones triggered by invalidation.
    /// It is invoked lazily inside the fetch task.
    ///
    /// # Panics
    ///
    /// Panics if a fetch has to start and no Tokio runtime is running.
    pub fn subscribe<V, F, L>(
        &self,
        key: impl Into<QueryKey>,
        fetcher: F,
        on_change: L,
    ) -> Subscription<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<V, FetchError>> + Send + Sync + 'static,
        L: Fn(&QueryResult<V>) + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<V> = Arc::new(on_change);
        let stale_time = self.inner.config.stale_time;

        let (initial, needs_fetch) = self.with_entry::<V, _>(&key, |entry| {
            entry.fetcher = Some(Arc::new(fetcher));
            entry.add_listener(id, listener.clone());
            (entry.result(stale_time), entry.is_stale(stale_time))
        });
        trace!(%key, listener = id, needs_fetch, "subscribed");

        listener(&initial);
        if needs_fetch {
            self.refetch::<V>(&key);
        }

        Subscription {
            key,
            id,
            client: self.clone(),
            _value: PhantomData,
        }
    }

    /// Like [`subscribe`](Self::subscribe), delivering states as a stream.
    ///
    /// The first item is the state at subscription time. Dropping the stream
    /// unsubscribes.
    ///
    /// # Panics
    ///
    /// Panics if a fetch has to start and no Tokio runtime is running.
    pub fn watch<V, F>(&self, key: impl Into<QueryKey>, fetcher: F) -> QueryStream<V>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<V, FetchError>> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(key, fetcher, move |result: &QueryResult<V>| {
            let _ = tx.send(result.clone());
        });
        QueryStream {
            inner: UnboundedReceiverStream::new(rx),
            subscription,
        }
    }

    /// Removes a subscription. Equivalent to dropping it.
    pub fn unsubscribe<V>(&self, subscription: Subscription<V>) {
        drop(subscription);
    }

    /// Reads through the cache.
    ///
    /// Returns fresh cached data immediately. Otherwise joins the in-flight
    /// fetch for `key`, or starts one, and waits for it. A new fetch uses the
    /// fetcher registered for the key by [`subscribe`](Self::subscribe);
    /// `fetcher` is registered and used only if the key has none yet.
    ///
    /// # Errors
    ///
    /// Returns the fetch's error if it fails.
    ///
    /// # Panics
    ///
    /// Panics if a fetch has to start and no Tokio runtime is running.
    pub async fn fetch_query<V, F>(&self, key: impl Into<QueryKey>, fetcher: F) -> Result<V, FetchError>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn() -> BoxFuture<'static, Result<V, FetchError>> + Send + Sync + 'static,
    {
        let key = key.into();
        let stale_time = self.inner.config.stale_time;
        let fetcher: Fetcher<V> = Arc::new(fetcher);

        let cached = self.with_entry::<V, _>(&key, |entry| {
            if entry.fetcher.is_none() {
                entry.fetcher = Some(fetcher.clone());
            }
            if entry.is_stale(stale_time) {
                None
            } else {
                entry.data.clone()
            }
        });
        if let Some(data) = cached {
            trace!(%key, "served fresh data");
            return Ok(data);
        }

        match self.start_fetch::<V>(&key, Some(fetcher)) {
            Some(handle) => handle.await,
            None => Err(FetchError::new(format!("no cache entry for {key}"))),
        }
    }

    /// Marks every entry whose key equals or extends `prefix` as stale.
    ///
    /// Entries with subscribers refetch immediately; the rest refetch when
    /// next subscribed. Entries with a fetch in flight refetch once it settles.
    /// Returns the number of entries marked.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut marked = 0;
        let mut refetches: Vec<Refetch> = Vec::new();

        for mut slot in self.inner.entries.iter_mut() {
            if prefix.is_prefix_of(slot.key()) {
                marked += 1;
                if let Some(refetch) = slot.value_mut().invalidate() {
                    refetches.push(refetch);
                }
            }
        }

        debug!(%prefix, marked, refetching = refetches.len(), "invalidated queries");
        for refetch in refetches {
            refetch(self);
        }
        marked
    }

    /// Synchronous read of the entry for `key`, without subscribing.
    ///
    /// Returns `None` if there is no entry or it holds a different value type.
    #[must_use]
    pub fn get_snapshot<V>(&self, key: &QueryKey) -> Option<CacheSnapshot<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        let stale_time = self.inner.config.stale_time;
        let slot = self.inner.entries.get(key)?;
        let entry = slot.as_any().downcast_ref::<CacheEntry<V>>()?;
        Some(CacheSnapshot {
            key: key.clone(),
            subscriber_count: slot.subscriber_count(),
            is_fetching: slot.is_fetching(),
            result: entry.result(stale_time),
        })
    }

    /// Number of active subscribers for `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .entries
            .get(key)
            .map_or(0, |slot| slot.subscriber_count())
    }

    /// Seeds or overwrites the data for `key` as if a fetch had just succeeded.
    ///
    /// Subscribers are notified. A fetch already in flight is not cancelled and
    /// overwrites this value when it lands.
    pub fn set_query_data<V>(&self, key: impl Into<QueryKey>, data: V)
    where
        V: Clone + Send + Sync + 'static,
    {
        let key = key.into();
        let stale_time = self.inner.config.stale_time;
        let (result, listeners) = self.with_entry::<V, _>(&key, |entry| {
            if entry.in_flight.is_some() {
                entry.data = Some(data);
                entry.updated_at = Some(Instant::now());
            } else {
                entry.update(data);
            }
            (entry.result(stale_time), entry.listeners())
        });
        debug!(%key, "query data set");
        notify(&listeners, &result);
    }

    /// Drops the entry for `key`. Returns `true` if there was one.
    ///
    /// Existing subscriptions stay valid but see an idle state until they
    /// subscribe again.
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self.inner.entries.remove(key).is_some();
        if removed {
            debug!(%key, "removed query");
        }
        removed
    }

    /// Evicts every entry that has had no subscribers for at least `cache_time`.
    ///
    /// Eviction also happens automatically through per-entry timers; this
    /// sweep covers entries released outside a Tokio runtime.
    pub fn gc(&self) -> usize {
        let cache_time = self.inner.config.cache_time;
        let before = self.inner.entries.len();
        self.inner
            .entries
            .retain(|_, slot| !slot.should_gc(cache_time));
        let evicted = before.saturating_sub(self.inner.entries.len());
        if evicted > 0 {
            debug!(evicted, "evicted idle queries");
        }
        evicted
    }

    /// Starts a fetch for `key` using its registered fetcher, unless one is
    /// already in flight.
    pub(crate) fn refetch<V>(&self, key: &QueryKey)
    where
        V: Clone + Send + Sync + 'static,
    {
        let _ = self.start_fetch::<V>(key, None);
    }

    /// The fetch algorithm: join the in-flight handle, or create one, mark the
    /// entry fetching, notify subscribers, and spawn the task that settles it.
    fn start_fetch<V>(&self, key: &QueryKey, fallback: Option<Fetcher<V>>) -> Option<InFlight<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        let stale_time = self.inner.config.stale_time;
        let fetch_id = self.inner.next_fetch.fetch_add(1, Ordering::Relaxed);
        let started = self.with_existing::<V, _>(key, |entry| {
            if let Some(handle) = &entry.in_flight {
                return Some((handle.clone(), None));
            }
            let fetcher = entry.fetcher.clone().or(fallback)?;
            let handle: InFlight<V> = async move { fetcher().await }.boxed().shared();
            entry.begin_fetch(handle.clone(), fetch_id);
            Some((handle, Some((entry.result(stale_time), entry.listeners()))))
        })??;

        let (handle, fresh) = started;
        let Some((result, listeners)) = fresh else {
            debug!(%key, "joined in-flight fetch");
            return Some(handle);
        };

        debug!(%key, fetch = fetch_id, "fetch started");
        notify(&listeners, &result);

        let client = self.clone();
        let key = key.clone();
        let driver = handle.clone();
        tokio::spawn(async move {
            let outcome = driver.await;
            client.settle::<V>(&key, fetch_id, outcome);
        });
        Some(handle)
    }

    /// Applies a finished fetch to its entry and notifies subscribers.
    ///
    /// Outcomes of fetches that are no longer the entry's current one, e.g.
    /// because the entry was removed and recreated meanwhile, are dropped.
    fn settle<V>(&self, key: &QueryKey, fetch_id: u64, outcome: Result<V, FetchError>)
    where
        V: Clone + Send + Sync + 'static,
    {
        let stale_time = self.inner.config.stale_time;
        let settled = self.with_existing::<V, _>(key, |entry| {
            if !entry.is_current_fetch(fetch_id) {
                return None;
            }
            let refetch = match outcome {
                Ok(data) => {
                    debug!(%key, "fetch succeeded");
                    entry.update(data)
                }
                Err(error) => {
                    warn!(%key, %error, "fetch failed");
                    entry.fail(error)
                }
            };
            let subscribers = entry.subscriber_count();
            let idle_epoch = (subscribers == 0).then(|| entry.idle_epoch());
            Some((
                entry.result(stale_time),
                entry.listeners(),
                refetch && subscribers > 0,
                idle_epoch,
            ))
        });
        let Some((result, listeners, refetch, idle_epoch)) = settled.flatten() else {
            debug!(%key, fetch = fetch_id, "dropping result of a superseded fetch");
            return;
        };

        notify(&listeners, &result);
        if refetch {
            debug!(%key, "refetching after invalidation during fetch");
            self.refetch::<V>(key);
        } else if let Some(epoch) = idle_epoch {
            self.schedule_gc(key.clone(), epoch);
        }
    }

    /// Removes a listener and arms the eviction timer if it was the last one.
    fn release(&self, key: &QueryKey, listener_id: u64) {
        let epoch = self
            .inner
            .entries
            .get_mut(key)
            .and_then(|mut slot| slot.release(listener_id));
        trace!(%key, listener = listener_id, "unsubscribed");
        if let Some(epoch) = epoch {
            self.schedule_gc(key.clone(), epoch);
        }
    }

    /// Evicts `key` after `cache_time` unless it was resubscribed meanwhile.
    fn schedule_gc(&self, key: QueryKey, epoch: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            trace!(%key, "no runtime, leaving eviction to gc()");
            return;
        };
        let deadline = Instant::now() + self.inner.config.cache_time;
        let inner: Weak<ClientInner> = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let evicted = inner
                .entries
                .remove_if(&key, |_, slot| {
                    slot.idle_epoch() == epoch
                        && slot.subscriber_count() == 0
                        && !slot.is_fetching()
                })
                .is_some();
            if evicted {
                debug!(%key, "evicted idle query");
            }
        });
    }

    /// Runs `f` on the typed entry for `key`, creating it if missing.
    ///
    /// A key reused with a different value type gets a fresh entry; the old
    /// subscribers stop receiving updates.
    fn with_entry<V, R>(&self, key: &QueryKey, f: impl FnOnce(&mut CacheEntry<V>) -> R) -> R
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut slot = self
            .inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| -> Box<dyn AnyEntry> { Box::new(CacheEntry::<V>::new(key.clone())) });
        if let Some(entry) = slot.as_any_mut().downcast_mut::<CacheEntry<V>>() {
            return f(entry);
        }

        warn!(%key, "replacing cache entry holding a different value type");
        let mut entry = CacheEntry::<V>::new(key.clone());
        let out = f(&mut entry);
        *slot = Box::new(entry);
        out
    }

    /// Runs `f` on the typed entry for `key` if it exists.
    fn with_existing<V, R>(&self, key: &QueryKey, f: impl FnOnce(&mut CacheEntry<V>) -> R) -> Option<R>
    where
        V: Clone + Send + Sync + 'static,
    {
        let mut slot = self.inner.entries.get_mut(key)?;
        slot.as_any_mut().downcast_mut::<CacheEntry<V>>().map(f)
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

fn notify<V>(listeners: &[Listener<V>], result: &QueryResult<V>) {
    for listener in listeners {
        listener(result);
    }
}

/// One observer's interest in a key.
///
/// Dropping the subscription stops notifications. The cache entry is kept
/// for later subscribers until it is evicted.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription<V> {
    key: QueryKey,
    id: u64,
    client: QueryClient,
    _value: PhantomData<fn() -> V>,
}

impl<V> Subscription<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// The subscribed key.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// The current state of the subscribed entry.
    #[must_use]
    pub fn state(&self) -> QueryResult<V> {
        self.client
            .get_snapshot::<V>(&self.key)
            .map_or_else(QueryResult::idle, |snapshot| snapshot.result)
    }

    /// Stops observing. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<V> std::fmt::Debug for Subscription<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl<V> Drop for Subscription<V> {
    fn drop(&mut self) {
        self.client.release(&self.key, self.id);
    }
}

/// A stream of query states, see [`QueryClient::watch`].
pub struct QueryStream<V> {
    inner: UnboundedReceiverStream<QueryResult<V>>,
    subscription: Subscription<V>,
}

impl<V> QueryStream<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// The underlying subscription.
    pub fn subscription(&self) -> &Subscription<V> {
        &self.subscription
    }
}

impl<V> Stream for QueryStream<V> {
    type Item = QueryResult<V>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
