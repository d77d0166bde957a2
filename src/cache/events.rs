//! Change notifications.
//!
//! Every write to a cache entry produces one [`CacheEvent`]. Events are
//! published after the store lock is released, so subscriber callbacks may
//! read from or write to the cache again.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use time::OffsetDateTime;
use tracing::trace;

use super::entry::CacheEntry;
use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::events";

/// Monotonic epoch for ordering events.
///
/// Epochs are assigned while the store lock is held, so they reflect the
/// order in which writes were applied even when callbacks run out of order.
pub type Epoch = u64;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Direct patch through `CacheStore::set`.
    Patched,
    /// A fetch attempt started (status is now loading).
    FetchStarted,
    /// A fetch result replaced or extended the data.
    FetchSucceeded,
    /// A fetch failed; prior data is preserved.
    FetchFailed,
    /// In-flight fetches were superseded by a newer operation.
    Superseded,
    /// The entry was marked stale.
    Invalidated,
    /// A mutation applied its optimistic value.
    OptimisticApplied,
    /// A failed mutation restored its snapshot.
    RolledBack,
    /// The entry was cleared back to idle.
    Reset,
    /// The entry was removed.
    Deleted,
}

/// Notification delivered to subscribers.
#[derive(Debug, Clone)]
pub struct CacheEvent<V> {
    pub key: QueryKey,
    pub kind: EventKind,
    /// Entry state right after the write; `None` once deleted.
    pub entry: Option<CacheEntry<V>>,
    pub epoch: Epoch,
    pub timestamp: OffsetDateTime,
}

impl<V> CacheEvent<V> {
    pub fn new(key: QueryKey, kind: EventKind, entry: Option<CacheEntry<V>>, epoch: Epoch) -> Self {
        Self {
            key,
            kind,
            entry,
            epoch,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

type Callback<V> = Arc<dyn Fn(&CacheEvent<V>) + Send + Sync>;

struct Subscriber<V> {
    id: u64,
    callback: Callback<V>,
}

struct BusInner<V> {
    subscribers: RwLock<HashMap<QueryKey, Vec<Subscriber<V>>>>,
    next_id: AtomicU64,
    epoch_counter: AtomicU64,
}

impl<V> BusInner<V> {
    fn remove(&self, key: &QueryKey, id: u64) {
        let mut subscribers = rw_write(&self.subscribers, SOURCE, "unsubscribe");
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|subscriber| subscriber.id != id);
            if list.is_empty() {
                subscribers.remove(key);
            }
        }
    }
}

/// Fan-out of entry changes to external consumers.
pub struct SubscriptionBus<V> {
    inner: Arc<BusInner<V>>,
}

impl<V: Send + Sync + 'static> SubscriptionBus<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                epoch_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Get the next epoch number.
    pub fn next_epoch(&self) -> Epoch {
        self.inner.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Register `callback` for changes to `key`.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, key: QueryKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        rw_write(&self.inner.subscribers, SOURCE, "subscribe")
            .entry(key.clone())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });

        let weak: Weak<BusInner<V>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&key, id);
            }
        })
    }

    /// Deliver an event to every subscriber of its key.
    pub fn publish(&self, event: &CacheEvent<V>) {
        let callbacks: Vec<Callback<V>> = rw_read(&self.inner.subscribers, SOURCE, "publish")
            .get(&event.key)
            .map(|list| {
                list.iter()
                    .map(|subscriber| Arc::clone(&subscriber.callback))
                    .collect()
            })
            .unwrap_or_default();

        trace!(
            key = %event.key,
            event_kind = ?event.kind,
            event_epoch = event.epoch,
            subscribers = callbacks.len(),
            "Cache event published"
        );

        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of live subscriptions for `key`.
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        rw_read(&self.inner.subscribers, SOURCE, "subscriber_count")
            .get(key)
            .map_or(0, Vec::len)
    }
}

impl<V: Send + Sync + 'static> Default for SubscriptionBus<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
