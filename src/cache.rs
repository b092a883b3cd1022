use std::any::Any;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use tokio::time::{Duration, Instant};

use crate::error::FetchError;
use crate::key::QueryKey;
use crate::query::{QueryClient, QueryResult, QueryStatus};

pub(crate) type Fetcher<V> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<V, FetchError>> + Send + Sync>;

/// The shared handle every requester of a key attaches to while a fetch runs.
pub(crate) type InFlight<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

pub(crate) type Listener<V> = Arc<dyn Fn(&QueryResult<V>) + Send + Sync>;

/// Deferred refetch produced by invalidation, run after the table lock is released.
pub(crate) type Refetch = Box<dyn FnOnce(&QueryClient) + Send>;

/// The cached state for one key.
pub(crate) struct CacheEntry<V> {
    pub key: QueryKey,
    pub status: QueryStatus,
    pub data: Option<V>,
    pub error: Option<FetchError>,
    pub updated_at: Option<Instant>,
    pub is_invalidated: bool,
    pub in_flight: Option<InFlight<V>>,
    pub fetcher: Option<Fetcher<V>>,
    fetch_id: u64,
    invalidated_during_fetch: bool,
    listeners: Vec<(u64, Listener<V>)>,
    idle_since: Option<Instant>,
    idle_epoch: u64,
}

impl<V: Clone> CacheEntry<V> {
    /// Creates an idle entry with no data and no subscribers.
    pub fn new(key: QueryKey) -> Self {
        Self {
            key,
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            is_invalidated: false,
            in_flight: None,
            fetcher: None,
            fetch_id: 0,
            invalidated_during_fetch: false,
            listeners: Vec::new(),
            idle_since: Some(Instant::now()),
            idle_epoch: 0,
        }
    }

    /// Checks whether the entry needs a refetch before it can be trusted.
    ///
    /// Never-fetched, invalidated, and failed entries are always stale.
    pub fn is_stale(&self, stale_time: Duration) -> bool {
        if self.is_invalidated || self.status == QueryStatus::Error {
            return true;
        }
        self.updated_at
            .is_none_or(|updated_at| updated_at.elapsed() >= stale_time)
    }

    /// Builds the externally visible state of this entry.
    pub fn result(&self, stale_time: Duration) -> QueryResult<V> {
        QueryResult {
            status: self.status,
            data: self.data.clone(),
            error: self.error.clone(),
            is_stale: self.data.is_some() && self.is_stale(stale_time),
            updated_at: self.updated_at,
        }
    }

    /// Records a newly started fetch. Data and error stay visible meanwhile.
    ///
    /// `fetch_id` must be unique per client so that a fetch started for an
    /// entry that was since removed and recreated cannot settle the new one.
    pub fn begin_fetch(&mut self, handle: InFlight<V>, fetch_id: u64) {
        self.status = QueryStatus::Fetching;
        self.in_flight = Some(handle);
        self.fetch_id = fetch_id;
    }

    /// Returns `true` if `fetch_id` is the fetch currently in flight.
    pub fn is_current_fetch(&self, fetch_id: u64) -> bool {
        self.in_flight.is_some() && self.fetch_id == fetch_id
    }

    /// Stores a successful result, resetting timestamp and staleness.
    ///
    /// Returns `true` if the entry was invalidated while the fetch ran and
    /// should be fetched again. Such an entry stays stale, so a later
    /// subscriber refetches even if nobody is subscribed now.
    pub fn update(&mut self, data: V) -> bool {
        self.data = Some(data);
        self.error = None;
        self.status = QueryStatus::Success;
        self.updated_at = Some(Instant::now());
        self.in_flight = None;
        self.is_invalidated = self.invalidated_during_fetch;
        std::mem::take(&mut self.invalidated_during_fetch)
    }

    /// Stores a failure, keeping the last successful data.
    ///
    /// Returns `true` if the entry was invalidated while the fetch ran.
    pub fn fail(&mut self, error: FetchError) -> bool {
        self.error = Some(error);
        self.status = QueryStatus::Error;
        self.in_flight = None;
        std::mem::take(&mut self.invalidated_during_fetch)
    }

    /// Marks this entry as stale.
    pub const fn mark_stale(&mut self) {
        self.is_invalidated = true;
    }

    pub fn add_listener(&mut self, id: u64, listener: Listener<V>) {
        self.listeners.push((id, listener));
        self.idle_since = None;
    }

    /// Snapshot of the current listeners, to be invoked outside the table lock.
    pub fn listeners(&self) -> Vec<Listener<V>> {
        self.listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Starts a new idle period and returns its epoch for the eviction timer.
    pub fn begin_idle(&mut self) -> u64 {
        self.idle_since = Some(Instant::now());
        self.idle_epoch += 1;
        self.idle_epoch
    }
}

/// Type-erased view of a [`CacheEntry`], so one table can hold every value type.
pub(crate) trait AnyEntry: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn subscriber_count(&self) -> usize;

    fn is_fetching(&self) -> bool;

    fn idle_epoch(&self) -> u64;

    /// Removes a listener. Returns the idle epoch if the entry lost its last subscriber.
    fn release(&mut self, listener_id: u64) -> Option<u64>;

    /// Checks if this entry should be evicted based on cache time.
    fn should_gc(&self, cache_time: Duration) -> bool;

    /// Marks the entry stale, returning a refetch to run if it has subscribers
    /// and no fetch in flight. An invalidation that lands during a fetch is
    /// remembered, so the entry stays stale once that fetch settles.
    fn invalidate(&mut self) -> Option<Refetch>;
}

impl<V> AnyEntry for CacheEntry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    fn idle_epoch(&self) -> u64 {
        self.idle_epoch
    }

    fn release(&mut self, listener_id: u64) -> Option<u64> {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != listener_id);
        if before != self.listeners.len() && self.listeners.is_empty() {
            Some(self.begin_idle())
        } else {
            None
        }
    }

    fn should_gc(&self, cache_time: Duration) -> bool {
        self.listeners.is_empty()
            && self.in_flight.is_none()
            && self
                .idle_since
                .is_some_and(|since| since.elapsed() >= cache_time)
    }

    fn invalidate(&mut self) -> Option<Refetch> {
        self.mark_stale();
        if self.in_flight.is_some() {
            self.invalidated_during_fetch = true;
            return None;
        }
        if self.listeners.is_empty() {
            return None;
        }
        let key = self.key.clone();
        Some(Box::new(move |client: &QueryClient| {
            client.refetch::<V>(&key);
        }))
    }
}
