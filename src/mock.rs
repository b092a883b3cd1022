//! Mock fetcher for testing.
//!
//! This module provides a controllable fetcher that returns scripted results
//! and counts how often it is invoked, enabling deterministic tests of
//! coalescing, stale retention, and refetch behavior without real I/O.
//!
//! # Basic Usage
//!
//! ```
//! use folio::{QueryClient, mock::MockFetcher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = QueryClient::new();
//! let mock = MockFetcher::new();
//! mock.push_ok(vec!["Dune".to_string()]);
//!
//! let titles = client.fetch_query("books", mock.fetcher()).await;
//! assert_eq!(titles.unwrap(), vec!["Dune".to_string()]);
//! assert_eq!(mock.calls(), 1);
//! # }
//! ```
//!
//! # Holding fetches in flight
//!
//! A gated mock keeps every fetch pending until [`MockFetcher::release`] is
//! called, which is how tests observe requests arriving while a fetch runs:
//!
//! ```
//! use folio::{QueryClient, QueryStatus, mock::MockFetcher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = QueryClient::new();
//! let mock = MockFetcher::gated();
//! mock.push_ok(1_i32);
//!
//! let first = client.subscribe("numbers", mock.fetcher(), |_| {});
//! let second = client.subscribe("numbers", mock.fetcher(), |_| {});
//! assert_eq!(first.state().status, QueryStatus::Fetching);
//!
//! mock.release(1);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::error::FetchError;

/// A scriptable fetcher.
///
/// Clones share the same script, call counter, and gate, so a test can keep
/// one clone while handing fetchers to the cache.
#[derive(Debug, Clone)]
pub struct MockFetcher<V> {
    responses: Arc<Mutex<VecDeque<Result<V, FetchError>>>>,
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl<V> MockFetcher<V>
where
    V: Clone + Send + 'static,
{
    /// Creates a mock whose fetches complete as soon as they are polled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    /// Creates a mock whose fetches wait for [`release`](Self::release).
    #[must_use]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// Queues a successful response.
    pub fn push_ok(&self, value: V) {
        self.push(Ok(value));
    }

    /// Queues a failed response.
    pub fn push_err(&self, message: impl Into<String>) {
        self.push(Err(FetchError::new(message)));
    }

    fn push(&self, response: Result<V, FetchError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Lets `n` gated fetches complete. Has no effect on ungated mocks.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of times a fetch has started.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns a fetcher suitable for [`QueryClient::subscribe`](crate::QueryClient::subscribe).
    ///
    /// Each invocation consumes the next scripted response. When the script
    /// is exhausted the fetch fails.
    pub fn fetcher(&self) -> impl Fn() -> BoxFuture<'static, Result<V, FetchError>> + Send + Sync + 'static
    where
        V: Sync,
    {
        let mock = self.clone();
        move || {
            let mock = mock.clone();
            async move {
                mock.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &mock.gate {
                    if let Ok(permit) = gate.acquire().await {
                        permit.forget();
                    }
                }
                let next = mock
                    .responses
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                next.unwrap_or_else(|| Err(FetchError::new("no scripted response")))
            }
            .boxed()
        }
    }
}

impl<V> Default for MockFetcher<V>
where
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
