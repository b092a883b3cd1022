//! Write operations that drive cache invalidation.
//!
//! This module provides the [`MutationCoordinator`] for running create,
//! update, and delete actions against a backend, similar to mutations in
//! TanStack Query.
//!
//! # Design Pattern: Transaction-based Operations
//!
//! Unlike queries, which are subscriptions over cached state, mutations are
//! one-off operations. Every call to [`MutationCoordinator::mutate`] runs its
//! action exactly once, even when an identical mutation is already running.
//! After a successful mutation, the keys listed in
//! [`MutationOptions::invalidates`] are invalidated so that their subscribers
//! refetch.
//!
//! Side effects are ordered: the `on_success` callback returns before any
//! invalidation-triggered refetch starts.
//!
//! # Example
//!
//! ```rust,no_run
//! use folio::{MutationCoordinator, MutationOptions, QueryClient, QueryKey};
//! use futures::FutureExt;
//!
//! # async fn run() {
//! let client = QueryClient::new();
//! let mutations = MutationCoordinator::new(client.clone());
//!
//! let handle = mutations.mutate(
//!     || async { Ok::<_, folio::MutationError>(7_i64) }.boxed(),
//!     MutationOptions::new()
//!         .on_success(|id| println!("deleted book {id}"))
//!         .invalidates(QueryKey::new("books")),
//! );
//!
//! let result = handle.settled().await;
//! assert!(result.is_success());
//! # }
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::MutationError;
use crate::key::QueryKey;
use crate::query::QueryClient;

/// The state of a mutation.
#[derive(Debug, Clone)]
pub enum MutationState<T> {
    /// Mutation is idle (not yet started).
    Idle,
    /// Mutation is in progress.
    Pending,
    /// Mutation succeeded with a result.
    Success(T),
    /// Mutation failed with an error.
    Error(MutationError),
}

/// A mutation result containing the current state.
#[derive(Debug, Clone)]
pub struct MutationResult<T> {
    /// The current state of the mutation.
    pub state: MutationState<T>,
}

impl<T> MutationResult<T> {
    /// Returns the result data if the mutation succeeded, otherwise `None`.
    pub const fn data(&self) -> Option<&T> {
        match &self.state {
            MutationState::Success(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the error if the mutation failed, otherwise `None`.
    pub const fn error(&self) -> Option<&MutationError> {
        match &self.state {
            MutationState::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` if the mutation has not started yet.
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, MutationState::Idle)
    }

    /// Returns `true` if the mutation is currently running.
    pub const fn is_pending(&self) -> bool {
        matches!(self.state, MutationState::Pending)
    }

    /// Returns `true` if the mutation succeeded.
    pub const fn is_success(&self) -> bool {
        matches!(self.state, MutationState::Success(_))
    }

    /// Returns `true` if the mutation failed.
    pub const fn is_error(&self) -> bool {
        matches!(self.state, MutationState::Error(_))
    }

    /// Returns `true` if the mutation reached a terminal state.
    pub const fn is_settled(&self) -> bool {
        self.is_success() || self.is_error()
    }
}

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send>;
type ErrorCallback = Box<dyn FnOnce(&MutationError) + Send>;

/// Callbacks and invalidation targets for one mutation.
pub struct MutationOptions<T> {
    on_success: Option<SuccessCallback<T>>,
    on_error: Option<ErrorCallback>,
    invalidates: Vec<QueryKey>,
}

impl<T> MutationOptions<T> {
    /// Options with no callbacks and nothing to invalidate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            on_success: None,
            on_error: None,
            invalidates: Vec::new(),
        }
    }

    /// Runs `f` with the result when the action succeeds, before invalidation.
    #[must_use]
    pub fn on_success(mut self, f: impl FnOnce(&T) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Runs `f` with the error when the action fails.
    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(&MutationError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Adds a key, or key prefix, to invalidate after success.
    #[must_use]
    pub fn invalidates(mut self, key: impl Into<QueryKey>) -> Self {
        self.invalidates.push(key.into());
        self
    }

    /// The keys invalidated after success.
    pub fn invalidated_keys(&self) -> &[QueryKey] {
        &self.invalidates
    }
}

impl<T> Default for MutationOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MutationOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOptions")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("invalidates", &self.invalidates)
            .finish()
    }
}

/// The caller's view of one running or finished mutation.
#[derive(Debug, Clone)]
pub struct MutationHandle<T> {
    id: u64,
    state: watch::Receiver<MutationResult<T>>,
    settled: watch::Receiver<bool>,
}

impl<T> MutationHandle<T>
where
    T: Clone,
{
    /// Identifier of this mutation, unique per coordinator.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> MutationResult<T> {
        self.state.borrow().clone()
    }

    /// Returns `true` once callbacks and invalidation have completed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Waits until the mutation's callbacks and invalidation have completed
    /// and returns the final state.
    pub async fn settled(&self) -> MutationResult<T> {
        let mut settled = self.settled.clone();
        // The sender only goes away early if the mutation task was torn down;
        // the last stored state is all there is to report then.
        let _ = settled.wait_for(|done| *done).await;
        self.state()
    }
}

/// Runs write actions and invalidates cached queries after they succeed.
///
/// Mutations are never coalesced: two identical calls run the action twice
/// and produce two independent handles.
#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    client: QueryClient,
    next_id: Arc<AtomicU64>,
}

impl MutationCoordinator {
    /// Creates a coordinator that invalidates entries of `client`.
    #[must_use]
    pub fn new(client: QueryClient) -> Self {
        Self {
            client,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The query client invalidated by this coordinator.
    #[must_use]
    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    /// Executes `action` once in a background task.
    ///
    /// The returned handle starts out `Idle` and moves to `Pending` when the
    /// task starts. On success the result is stored, `on_success` runs, and
    /// every key in `invalidates` is invalidated, in that order. On failure
    /// the error is stored and `on_error` runs; nothing is invalidated.
    ///
    /// A panicking callback is logged at `warn` and otherwise ignored, so
    /// invalidation and settling still happen.
    ///
    /// # Panics
    ///
    /// Panics if no Tokio runtime is running.
    pub fn mutate<T, F>(&self, action: F, options: MutationOptions<T>) -> MutationHandle<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> BoxFuture<'static, Result<T, MutationError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (state_tx, state_rx) = watch::channel(MutationResult {
            state: MutationState::Idle,
        });
        let (settled_tx, settled_rx) = watch::channel(false);
        let client = self.client.clone();

        tokio::spawn(async move {
            let MutationOptions {
                on_success,
                on_error,
                invalidates,
            } = options;

            state_tx.send_replace(MutationResult {
                state: MutationState::Pending,
            });
            debug!(mutation = id, "mutation started");

            match action().await {
                Ok(data) => {
                    debug!(mutation = id, invalidates = invalidates.len(), "mutation succeeded");
                    state_tx.send_replace(MutationResult {
                        state: MutationState::Success(data.clone()),
                    });
                    if let Some(callback) = on_success {
                        if panic::catch_unwind(AssertUnwindSafe(|| callback(&data))).is_err() {
                            warn!(mutation = id, "on_success callback panicked");
                        }
                    }
                    for key in &invalidates {
                        client.invalidate(key);
                    }
                }
                Err(error) => {
                    warn!(mutation = id, %error, "mutation failed");
                    state_tx.send_replace(MutationResult {
                        state: MutationState::Error(error.clone()),
                    });
                    if let Some(callback) = on_error {
                        if panic::catch_unwind(AssertUnwindSafe(|| callback(&error))).is_err() {
                            warn!(mutation = id, "on_error callback panicked");
                        }
                    }
                }
            }

            settled_tx.send_replace(true);
        });

        MutationHandle {
            id,
            state: state_rx,
            settled: settled_rx,
        }
    }
}
