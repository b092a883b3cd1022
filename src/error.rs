//! Error payloads recorded on cache entries and mutation handles.
//!
//! Both types are opaque to the cache: a message plus an optional source.
//! They are cheap to clone because a single failed fetch is delivered to
//! every subscriber of its key.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

type Source = Arc<dyn StdError + Send + Sync + 'static>;

/// A failure surfaced by a fetcher.
#[derive(Error, Debug, Clone)]
#[error("Fetch failed: {message}")]
pub struct FetchError {
    message: String,
    #[source]
    source: Option<Source>,
}

impl FetchError {
    /// Creates an error with the given message and no source.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping `source`, using its display text as the message.
    pub fn from_source<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A failure surfaced by a mutation action.
#[derive(Error, Debug, Clone)]
#[error("Mutation failed: {message}")]
pub struct MutationError {
    message: String,
    #[source]
    source: Option<Source>,
}

impl MutationError {
    /// Creates an error with the given message and no source.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping `source`, using its display text as the message.
    pub fn from_source<E>(source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
