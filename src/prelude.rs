//! Prelude module for convenient imports.
//!
//! ```
//! use folio::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] - The query cache
//! - [`QueryKey`] - Keys naming cached resources
//! - [`QueryResult`] and [`QueryStatus`] - What subscribers observe
//! - [`MutationCoordinator`] and [`MutationOptions`] - For running writes
//! - [`FetchError`] and [`MutationError`] - Failures reported by the above

pub use crate::config::QueryConfig;
pub use crate::error::{FetchError, MutationError};
pub use crate::key::QueryKey;
pub use crate::mutation::{MutationCoordinator, MutationHandle, MutationOptions, MutationResult};
pub use crate::query::{QueryClient, QueryResult, QueryStatus, Subscription};
