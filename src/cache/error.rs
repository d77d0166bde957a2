//! Errors surfaced by the synchronization layer.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use super::keys::QueryKey;

/// Error type accepted from injected fetchers and remote operations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure recorded on a cache entry and returned to callers.
///
/// The type is `Clone` because one failure may be stored on the entry and
/// handed to every caller awaiting the same deduplicated fetch.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The injected fetcher or remote operation rejected.
    #[error("network failure: {message}")]
    NetworkFailure { message: Arc<str> },
    /// The query is disabled and nothing is cached for it.
    #[error("query {key} is disabled")]
    Disabled { key: QueryKey },
    /// No fetcher has been registered for the key, so it cannot be refetched.
    #[error("no fetcher registered for {key}")]
    Unregistered { key: QueryKey },
    /// The spawned fetch task panicked or was cancelled by the runtime.
    #[error("fetch task aborted: {message}")]
    Aborted { message: Arc<str> },
    /// A mutation failed and the entry was restored to its snapshot.
    #[error("mutation rolled back: {cause}")]
    RollbackApplied { cause: Box<CacheError> },
}

impl CacheError {
    /// Capture a rejected fetcher/remote error, flattening its source chain.
    pub fn network(error: &(dyn StdError + 'static)) -> Self {
        let mut message = error.to_string();
        let mut current = error.source();
        while let Some(inner) = current {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            current = inner.source();
        }
        Self::NetworkFailure {
            message: Arc::from(message),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: Arc::from(message.into()),
        }
    }

    pub fn rollback(cause: CacheError) -> Self {
        Self::RollbackApplied {
            cause: Box::new(cause),
        }
    }

    /// The underlying failure, looking through a rollback wrapper.
    pub fn root_cause(&self) -> &CacheError {
        match self {
            CacheError::RollbackApplied { cause } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_rollback(&self) -> bool {
        matches!(self, CacheError::RollbackApplied { .. })
    }
}

impl From<BoxError> for CacheError {
    fn from(error: BoxError) -> Self {
        CacheError::network(error.as_ref())
    }
}
