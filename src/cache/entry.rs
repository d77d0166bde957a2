//! Cache entry state.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;

use super::error::CacheError;

/// Monotonic per-key counter identifying the latest fetch attempt.
pub type Generation = u64;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Idle => "idle",
            EntryStatus::Loading => "loading",
            EntryStatus::Success => "success",
            EntryStatus::Error => "error",
        }
    }
}

/// Stored state for one query key.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub status: EntryStatus,
    /// Last known value. Kept across failures so readers can show
    /// last-known-good data next to the error.
    pub data: Option<V>,
    /// Present only while `status` is [`EntryStatus::Error`].
    pub error: Option<CacheError>,
    /// Monotonic instant of the most recent successful fetch.
    pub last_updated_at: Option<Instant>,
    /// Wall-clock time of the most recent successful fetch.
    pub updated_at: Option<OffsetDateTime>,
    pub stale_after: Duration,
    pub generation: Generation,
    /// Set by an explicit invalidation; cleared by the next successful fetch.
    pub invalidated: bool,
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self {
            status: EntryStatus::Idle,
            data: None,
            error: None,
            last_updated_at: None,
            updated_at: None,
            stale_after: Duration::ZERO,
            generation: 0,
            invalidated: false,
        }
    }
}

impl<V> CacheEntry<V> {
    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == EntryStatus::Error
    }

    /// Returns true if the entry can be served at `now` without a fetch.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        if self.status != EntryStatus::Success || self.invalidated || self.data.is_none() {
            return false;
        }
        match self.last_updated_at {
            Some(updated) => now.saturating_duration_since(updated) < self.stale_after,
            None => false,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Instant::now())
    }
}

/// Partial update applied by [`CacheStore::set`](super::CacheStore::set).
///
/// Absent fields leave the entry untouched.
#[derive(Debug, Clone)]
pub struct EntryPatch<V> {
    pub status: Option<EntryStatus>,
    pub data: Option<Option<V>>,
    pub error: Option<Option<CacheError>>,
    pub stale_after: Option<Duration>,
}

impl<V> Default for EntryPatch<V> {
    fn default() -> Self {
        Self {
            status: None,
            data: None,
            error: None,
            stale_after: None,
        }
    }
}

impl<V> EntryPatch<V> {
    /// Patch that seeds the entry with a successful value.
    pub fn success(data: V) -> Self {
        Self {
            status: Some(EntryStatus::Success),
            data: Some(Some(data)),
            error: Some(None),
            stale_after: None,
        }
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn data(mut self, data: Option<V>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error(mut self, error: Option<CacheError>) -> Self {
        self.error = Some(error);
        self
    }

    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    pub(crate) fn apply(self, entry: &mut CacheEntry<V>) {
        let writes_success = self.status == Some(EntryStatus::Success) && self.data.is_some();
        if let Some(status) = self.status {
            entry.status = status;
        }
        if let Some(data) = self.data {
            entry.data = data;
        }
        if let Some(error) = self.error {
            entry.error = error;
        }
        if let Some(stale_after) = self.stale_after {
            entry.stale_after = stale_after;
        }
        if writes_success {
            entry.last_updated_at = Some(Instant::now());
            entry.updated_at = Some(OffsetDateTime::now_utc());
            entry.invalidated = false;
        }
        if entry.status != EntryStatus::Error {
            entry.error = None;
        }
    }
}
