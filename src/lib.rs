//! # Folio - Query Cache and Mutation Coordination
//!
//! Folio is a client-side data cache for remote resources. It deduplicates
//! concurrent fetches of the same resource, serves cached data while it
//! revalidates in the background, and refetches affected resources after
//! writes. It is independent of any UI framework: views observe it through
//! callbacks or streams.
//!
//! ## Architecture
//!
//! 1. **Keys**: every resource is named by a [`QueryKey`], a resource name plus
//!    typed segments (`books`, `book/42`, `books/filtered/dune/title`)
//! 2. **Queries**: the [`QueryClient`] owns one cache entry per key and runs at
//!    most one fetch per key at a time
//! 3. **Subscriptions**: consumers subscribe to a key and are notified whenever
//!    the entry's status, data, or error changes
//! 4. **Mutations**: writes run through the [`MutationCoordinator`], which
//!    invalidates the keys a successful write affects
//!
//! ## Core Components
//!
//! - [`QueryClient`](query::QueryClient): the cache and its fetch algorithm
//! - [`Subscription`](query::Subscription): a live interest in one key
//! - [`MutationCoordinator`](mutation::MutationCoordinator): runs writes
//! - [`Catalog`](catalog::Catalog): a book catalog client built on the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use folio::{FetchError, MutationCoordinator, MutationOptions, QueryClient, QueryKey};
//! use futures::FutureExt;
//!
//! async fn list_books() -> Result<Vec<String>, FetchError> {
//!     Ok(vec!["Dune".to_string(), "Emma".to_string()])
//! }
//!
//! # async fn run() {
//! let client = QueryClient::new();
//!
//! // Two views of the same list share one fetch.
//! let table = client.subscribe("books", || list_books().boxed(), |r| {
//!     println!("table: {:?}", r.data);
//! });
//! let counter = client.subscribe("books", || list_books().boxed(), |r| {
//!     println!("count: {:?}", r.data.as_ref().map(Vec::len));
//! });
//!
//! // A write refreshes both.
//! let mutations = MutationCoordinator::new(client.clone());
//! mutations
//!     .mutate(
//!         || async { Ok(()) }.boxed(),
//!         MutationOptions::new().invalidates(QueryKey::new("books")),
//!     )
//!     .settled()
//!     .await;
//! # drop((table, counter));
//! # }
//! ```
//!
//! ## Design Inspiration
//!
//! The query and mutation model follows
//! [TanStack Query](https://tanstack.com/query), adapted to explicit
//! subscriptions and Tokio tasks.

mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod key;
pub mod mock;
pub mod mutation;
pub mod prelude;
pub mod query;

pub use config::QueryConfig;
pub use error::{FetchError, MutationError};
pub use key::{KeySegment, QueryKey};
pub use mutation::{
    MutationCoordinator, MutationHandle, MutationOptions, MutationResult, MutationState,
};
pub use query::{CacheSnapshot, QueryClient, QueryResult, QueryStatus, QueryStream, Subscription};
