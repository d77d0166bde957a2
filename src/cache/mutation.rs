//! Optimistic mutations.
//!
//! A mutation snapshots the entry, applies a locally built value at once,
//! then calls the remote operation. On success the key is invalidated and
//! refetched so server data replaces the optimistic value wholesale; on
//! failure the snapshot is restored exactly.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument, warn};

use super::error::{BoxError, CacheError};
use super::fetch::FetchCoordinator;
use super::keys::QueryKey;

pub const METRIC_MUTATION_RECONCILED: &str = "query_sync_mutation_reconciled_total";
pub const METRIC_MUTATION_ROLLBACK: &str = "query_sync_mutation_rollback_total";

/// Progress of a single mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    OptimisticallyApplied,
    Reconciled,
    RolledBack,
}

impl MutationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationState::Idle => "idle",
            MutationState::OptimisticallyApplied => "optimistically_applied",
            MutationState::Reconciled => "reconciled",
            MutationState::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationState::Reconciled | MutationState::RolledBack)
    }

    pub fn can_transition_to(&self, next: MutationState) -> bool {
        matches!(
            (self, next),
            (MutationState::Idle, MutationState::OptimisticallyApplied)
                | (
                    MutationState::OptimisticallyApplied,
                    MutationState::Reconciled | MutationState::RolledBack
                )
        )
    }
}

struct Progress<'a> {
    key: &'a QueryKey,
    state: MutationState,
}

impl Progress<'_> {
    fn advance(&mut self, next: MutationState) {
        if !self.state.can_transition_to(next) {
            warn!(
                key = %self.key,
                from = self.state.as_str(),
                to = next.as_str(),
                "Ignored invalid mutation transition"
            );
            return;
        }
        debug!(
            key = %self.key,
            from = self.state.as_str(),
            to = next.as_str(),
            "Mutation transition"
        );
        self.state = next;
    }
}

/// Append `record` to list data, keeping the existing order.
pub fn append_optimistic<T: Clone>(current: Option<&Vec<T>>, record: T) -> Vec<T> {
    let mut next = current.cloned().unwrap_or_default();
    next.push(record);
    next
}

/// Runs optimistic writes against the entries of one fetch coordinator.
pub struct MutationCoordinator<V> {
    fetch: Arc<FetchCoordinator<V>>,
}

impl<V> MutationCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(fetch: Arc<FetchCoordinator<V>>) -> Self {
        Self { fetch }
    }

    /// Apply `optimistic` to `key`, then run `remote_op` with `payload`.
    ///
    /// In-flight reads of the key are superseded before the optimistic value
    /// is written, so a response that left before the mutation cannot
    /// overwrite it. A failed reconciliation refetch is logged and recorded
    /// on the entry; the mutation itself still succeeds.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn mutate<P, R, E, Op, Fut, B>(
        &self,
        key: &QueryKey,
        payload: P,
        remote_op: Op,
        optimistic: B,
    ) -> Result<R, CacheError>
    where
        Op: FnOnce(P) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Into<BoxError>,
        B: FnOnce(Option<&V>, &P) -> V,
    {
        let mut progress = Progress {
            key,
            state: MutationState::Idle,
        };

        let (generation, snapshot) = self.fetch.supersede_with(key, |store| {
            store.apply_optimistic(key, |current| optimistic(current, &payload))
        });
        progress.advance(MutationState::OptimisticallyApplied);
        debug!(key = %key, generation, "Optimistic value applied");

        match remote_op(payload).await {
            Ok(result) => {
                self.reconcile(key).await;
                progress.advance(MutationState::Reconciled);
                counter!(METRIC_MUTATION_RECONCILED).increment(1);
                Ok(result)
            }
            Err(error) => {
                let cause = CacheError::from(error.into());
                warn!(key = %key, error = %cause, "Mutation rejected; restoring snapshot");
                self.fetch
                    .store()
                    .rollback(key, snapshot, cause.clone())
                    .publish(self.fetch.store());
                progress.advance(MutationState::RolledBack);
                counter!(METRIC_MUTATION_ROLLBACK).increment(1);
                Err(CacheError::rollback(cause))
            }
        }
    }

    async fn reconcile(&self, key: &QueryKey) {
        self.fetch.store().invalidate(key);

        if !self.fetch.registry().contains(key) {
            warn!(key = %key, "No fetcher registered; entry left invalidated");
            return;
        }

        if let Err(error) = self.fetch.refetch(key).await {
            warn!(key = %key, error = %error, "Reconciliation refetch failed");
        }
    }
}
