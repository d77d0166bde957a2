//! Per-query options.
//!
//! Defaults come from the `[queries]` section of `query-sync.toml` and can be
//! overridden for each call.

use std::time::Duration;

const DEFAULT_STALE_AFTER_MS: u64 = 0;
const DEFAULT_RETRY: u32 = 1;

/// Options controlling how a query is fetched and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long a successful result is served without refetching.
    /// Zero means the entry is always stale.
    pub stale_after: Duration,
    /// Extra attempts after the first failure within one logical fetch.
    pub retry: u32,
    /// Disabled queries never invoke their fetcher.
    pub enabled: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_millis(DEFAULT_STALE_AFTER_MS),
            retry: DEFAULT_RETRY,
            enabled: true,
        }
    }
}

impl QueryOptions {
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Total number of fetcher invocations allowed for one logical fetch.
    pub fn max_attempts(&self) -> u32 {
        self.retry.saturating_add(1)
    }
}
