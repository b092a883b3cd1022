use std::time::Duration;

/// Configuration for query caching behavior.
///
/// This controls when cached data is considered stale and how long entries
/// without subscribers are retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// How long data is considered fresh after a successful fetch.
    ///
    /// Fresh data is served to new subscribers without refetching. Once stale,
    /// subscribers still receive the cached data immediately while a refetch
    /// runs in the background.
    pub stale_time: Duration,

    /// How long an entry with no subscribers is retained before eviction.
    pub cache_time: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(0),      // immediately stale
            cache_time: Duration::from_secs(5 * 60), // 5 minutes
        }
    }
}

impl QueryConfig {
    /// Creates a new query configuration with the given stale and cache times.
    #[must_use]
    pub const fn new(stale_time: Duration, cache_time: Duration) -> Self {
        Self {
            stale_time,
            cache_time,
        }
    }

    /// Returns this configuration with a different stale time.
    #[must_use]
    pub const fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Returns this configuration with a different cache time.
    #[must_use]
    pub const fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }
}
