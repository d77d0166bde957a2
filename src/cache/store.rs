//! Keyed entry table.
//!
//! All writes happen under a single write lock and emit exactly one change
//! event, which is published after the lock has been released. Coordinators
//! that need to combine a store write with their own bookkeeping use the
//! crate-private staged operations and publish once they are done.

use std::collections::HashMap;
use std::sync::RwLock;

use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use super::entry::{CacheEntry, EntryPatch, EntryStatus, Generation};
use super::error::CacheError;
use super::events::{CacheEvent, EventKind, Subscription, SubscriptionBus};
use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// A write that has been applied but not yet announced to subscribers.
#[must_use = "staged writes must be published"]
pub(crate) struct Staged<R, V> {
    value: R,
    event: Option<CacheEvent<V>>,
}

impl<R, V: Send + Sync + 'static> Staged<R, V> {
    pub(crate) fn value(&self) -> &R {
        &self.value
    }

    pub(crate) fn publish(self, store: &CacheStore<V>) -> R {
        if let Some(event) = self.event {
            store.bus.publish(&event);
        }
        self.value
    }
}

/// Process-local table of cache entries for one value type.
///
/// There is no global instance: construct a store (usually through
/// [`QueryClient`](super::QueryClient)) and pass it where it is needed.
pub struct CacheStore<V> {
    entries: RwLock<HashMap<QueryKey, CacheEntry<V>>>,
    bus: SubscriptionBus<V>,
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bus: SubscriptionBus::new(),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        rw_read(&self.entries, SOURCE, "get").get(key).cloned()
    }

    /// Snapshot of the entry, or an idle entry if the key was never written.
    pub fn read(&self, key: &QueryKey) -> CacheEntry<V> {
        self.get(key).unwrap_or_default()
    }

    pub fn data(&self, key: &QueryKey) -> Option<V> {
        rw_read(&self.entries, SOURCE, "data")
            .get(key)
            .and_then(|entry| entry.data.clone())
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        rw_read(&self.entries, SOURCE, "keys")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Public writes
    // ========================================================================

    /// Apply a partial update, creating the entry if needed.
    pub fn set(&self, key: &QueryKey, patch: EntryPatch<V>) -> CacheEntry<V> {
        self.stage(key, "set", |entry| {
            patch.apply(entry);
            (entry.clone(), Some(EventKind::Patched))
        })
        .publish(self)
    }

    /// Mark the entry stale without clearing its data.
    ///
    /// Returns false if the key has no entry.
    pub fn invalidate(&self, key: &QueryKey) -> bool {
        self.stage_existing(key, "invalidate", |entry| {
            entry.invalidated = true;
            ((), Some(EventKind::Invalidated))
        })
        .publish(self)
        .is_some()
    }

    /// Mark every entry whose key starts with `prefix` stale.
    pub fn invalidate_prefix(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let events: Vec<CacheEvent<V>> = {
            let mut entries = rw_write(&self.entries, SOURCE, "invalidate_prefix");
            entries
                .iter_mut()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, entry)| {
                    entry.invalidated = true;
                    CacheEvent::new(
                        key.clone(),
                        EventKind::Invalidated,
                        Some(entry.clone()),
                        self.bus.next_epoch(),
                    )
                })
                .collect()
        };

        debug!(prefix = %prefix, invalidated = events.len(), "Invalidated cache prefix");

        events
            .into_iter()
            .map(|event| {
                self.bus.publish(&event);
                event.key
            })
            .collect()
    }

    /// Remove the entry entirely. Used for full resets only.
    pub fn delete(&self, key: &QueryKey) -> Option<CacheEntry<V>> {
        let event = {
            let mut entries = rw_write(&self.entries, SOURCE, "delete");
            entries.remove(key).map(|removed| {
                let event =
                    CacheEvent::new(key.clone(), EventKind::Deleted, None, self.bus.next_epoch());
                (removed, event)
            })
        };

        event.map(|(removed, event)| {
            self.bus.publish(&event);
            removed
        })
    }

    pub fn subscribe<F>(&self, key: QueryKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        self.bus.subscribe(key, callback)
    }

    pub fn bus(&self) -> &SubscriptionBus<V> {
        &self.bus
    }

    // ========================================================================
    // Staged writes used by the coordinators
    // ========================================================================

    /// Start a fetch attempt: bump the generation and enter `Loading`.
    pub(crate) fn begin_fetch(
        &self,
        key: &QueryKey,
        stale_after: std::time::Duration,
    ) -> Staged<Generation, V> {
        self.stage(key, "begin_fetch", |entry| {
            entry.generation += 1;
            entry.status = EntryStatus::Loading;
            entry.error = None;
            entry.stale_after = stale_after;
            (entry.generation, Some(EventKind::FetchStarted))
        })
    }

    /// Apply a fetch result if `generation` is still current.
    ///
    /// `merge` receives the previous data and returns the new data, which is
    /// also handed back to the caller. When the response has been superseded
    /// nothing is written and `merge` is returned unused.
    pub(crate) fn commit_success<M>(
        &self,
        key: &QueryKey,
        generation: Generation,
        merge: M,
    ) -> Staged<Result<V, M>, V>
    where
        M: FnOnce(Option<V>) -> V,
    {
        let mut entries = rw_write(&self.entries, SOURCE, "commit_success");
        match entries.get_mut(key) {
            Some(entry) if entry.generation == generation => {
                let data = merge(entry.data.take());
                entry.data = Some(data.clone());
                entry.status = EntryStatus::Success;
                entry.error = None;
                entry.last_updated_at = Some(Instant::now());
                entry.updated_at = Some(OffsetDateTime::now_utc());
                entry.invalidated = false;
                let event = CacheEvent::new(
                    key.clone(),
                    EventKind::FetchSucceeded,
                    Some(entry.clone()),
                    self.bus.next_epoch(),
                );
                Staged {
                    value: Ok(data),
                    event: Some(event),
                }
            }
            _ => Staged {
                value: Err(merge),
                event: None,
            },
        }
    }

    /// Record a fetch failure if `generation` is still current. Data is kept.
    pub(crate) fn commit_failure(
        &self,
        key: &QueryKey,
        generation: Generation,
        error: CacheError,
    ) -> Staged<bool, V> {
        self.stage_current(key, generation, "commit_failure", |entry| {
            entry.status = EntryStatus::Error;
            entry.error = Some(error);
            EventKind::FetchFailed
        })
    }

    /// Supersede in-flight fetches without touching data.
    pub(crate) fn supersede(&self, key: &QueryKey) -> Staged<Generation, V> {
        self.stage(key, "supersede", |entry| {
            Self::bump_generation(entry);
            (entry.generation, Some(EventKind::Superseded))
        })
    }

    /// Supersede in-flight fetches, snapshot the data and replace it with
    /// the optimistic value, as one write.
    pub(crate) fn apply_optimistic(
        &self,
        key: &QueryKey,
        build: impl FnOnce(Option<&V>) -> V,
    ) -> Staged<(Generation, Option<V>), V> {
        self.stage(key, "apply_optimistic", |entry| {
            Self::bump_generation(entry);
            let snapshot = entry.data.clone();
            entry.data = Some(build(snapshot.as_ref()));
            (
                (entry.generation, snapshot),
                Some(EventKind::OptimisticApplied),
            )
        })
    }

    /// Clear the entry back to idle while keeping its generation moving
    /// forward, so responses started before the reset are discarded.
    pub(crate) fn reset(&self, key: &QueryKey) -> Staged<Generation, V> {
        self.stage(key, "reset", |entry| {
            let generation = entry.generation + 1;
            *entry = CacheEntry {
                generation,
                stale_after: entry.stale_after,
                ..CacheEntry::default()
            };
            (generation, Some(EventKind::Reset))
        })
    }

    /// Restore a mutation snapshot and record the failure.
    pub(crate) fn rollback(
        &self,
        key: &QueryKey,
        snapshot: Option<V>,
        error: CacheError,
    ) -> Staged<(), V> {
        self.stage(key, "rollback", |entry| {
            entry.data = snapshot;
            entry.status = EntryStatus::Error;
            entry.error = Some(error);
            ((), Some(EventKind::RolledBack))
        })
    }

    fn bump_generation(entry: &mut CacheEntry<V>) {
        entry.generation += 1;
        if entry.status == EntryStatus::Loading {
            entry.status = if entry.data.is_some() {
                EntryStatus::Success
            } else {
                EntryStatus::Idle
            };
        }
    }

    fn stage<R>(
        &self,
        key: &QueryKey,
        op: &'static str,
        write: impl FnOnce(&mut CacheEntry<V>) -> (R, Option<EventKind>),
    ) -> Staged<R, V> {
        let mut entries = rw_write(&self.entries, SOURCE, op);
        let entry = entries.entry(key.clone()).or_default();
        let (value, kind) = write(entry);
        let event = kind.map(|kind| {
            CacheEvent::new(key.clone(), kind, Some(entry.clone()), self.bus.next_epoch())
        });
        Staged { value, event }
    }

    fn stage_existing<R>(
        &self,
        key: &QueryKey,
        op: &'static str,
        write: impl FnOnce(&mut CacheEntry<V>) -> (R, Option<EventKind>),
    ) -> Staged<Option<R>, V> {
        let mut entries = rw_write(&self.entries, SOURCE, op);
        let Some(entry) = entries.get_mut(key) else {
            return Staged {
                value: None,
                event: None,
            };
        };
        let (value, kind) = write(entry);
        let event = kind.map(|kind| {
            CacheEvent::new(key.clone(), kind, Some(entry.clone()), self.bus.next_epoch())
        });
        Staged {
            value: Some(value),
            event,
        }
    }

    fn stage_current(
        &self,
        key: &QueryKey,
        generation: Generation,
        op: &'static str,
        write: impl FnOnce(&mut CacheEntry<V>) -> EventKind,
    ) -> Staged<bool, V> {
        let staged = self.stage_existing(key, op, |entry| {
            if entry.generation != generation {
                return (false, None);
            }
            (true, Some(write(entry)))
        });
        Staged {
            value: staged.value.unwrap_or(false),
            event: staged.event,
        }
    }
}

impl<V> Default for CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
