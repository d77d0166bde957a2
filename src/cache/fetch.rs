//! Fetch coordination.
//!
//! Resolves a key to fresh data. Concurrent requests for the same key share
//! one in-flight fetch; results are applied only if no newer operation has
//! bumped the entry's generation in the meantime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::config::QueryOptions;
use super::entry::{CacheEntry, Generation};
use super::error::{BoxError, CacheError};
use super::keys::QueryKey;
use super::lock::mutex_lock;
use super::registry::FetcherRegistry;
use super::store::{CacheStore, Staged};

const SOURCE: &str = "cache::fetch";

pub const METRIC_FETCH_TOTAL: &str = "query_sync_fetch_total";
pub const METRIC_FETCH_HIT: &str = "query_sync_fetch_hit_total";
pub const METRIC_FETCH_DEDUP: &str = "query_sync_fetch_dedup_total";
pub const METRIC_FETCH_DISCARDED: &str = "query_sync_fetch_discarded_total";
pub const METRIC_FETCH_MS: &str = "query_sync_fetch_ms";

/// Passed to every fetcher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    pub key: QueryKey,
    /// Zero for the first attempt, incremented on each retry.
    pub attempt: u32,
}

/// Type-erased async fetcher.
pub type Fetcher<T> =
    Arc<dyn Fn(FetchContext) -> BoxFuture<'static, Result<T, CacheError>> + Send + Sync>;

/// Wrap an async closure as a [`Fetcher`].
///
/// Any error convertible into a boxed error is recorded as
/// [`CacheError::NetworkFailure`].
pub fn fetcher<T, F, Fut, E>(f: F) -> Fetcher<T>
where
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<BoxError>,
    T: 'static,
{
    Arc::new(move |context| {
        let pending = f(context);
        async move { pending.await.map_err(|error| CacheError::from(error.into())) }.boxed()
    })
}

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

struct InFlight<V> {
    generation: Generation,
    future: SharedFetch<V>,
}

type InFlightMap<V> = HashMap<QueryKey, InFlight<V>>;

/// Outcome of inspecting an entry before fetching.
pub(crate) enum Decision<V, T, M> {
    /// Serve this value without fetching.
    Serve(V),
    /// Nothing to do.
    Skip,
    /// Start a fetch with `fetcher`, folding its output into the entry with `merge`.
    Launch { fetcher: Fetcher<T>, merge: M },
}

/// Deduplicating, generation-aware fetcher front-end for one store.
pub struct FetchCoordinator<V> {
    store: Arc<CacheStore<V>>,
    registry: FetcherRegistry<V>,
    in_flight: Arc<Mutex<InFlightMap<V>>>,
}

impl<V> FetchCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<CacheStore<V>>) -> Self {
        Self {
            store,
            registry: FetcherRegistry::new(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<CacheStore<V>> {
        &self.store
    }

    pub fn registry(&self) -> &FetcherRegistry<V> {
        &self.registry
    }

    /// Returns true while a fetch for `key` is in flight.
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        mutex_lock(&self.in_flight, SOURCE, "is_fetching").contains_key(key)
    }

    /// Resolve `key` to data, fetching only when the cached entry is stale.
    ///
    /// Callers arriving while a fetch is in flight share its result. The
    /// fetcher is remembered so the key can later be refetched by
    /// [`refetch`](Self::refetch).
    #[instrument(skip_all, fields(key = %key))]
    pub async fn ensure_fresh(
        &self,
        key: &QueryKey,
        fetcher: Fetcher<V>,
        options: QueryOptions,
    ) -> Result<V, CacheError> {
        if !options.enabled {
            debug!("Query disabled; serving cached data only");
            return self
                .store
                .data(key)
                .ok_or_else(|| CacheError::Disabled { key: key.clone() });
        }

        self.registry
            .register(key.clone(), Arc::clone(&fetcher), options);

        let outcome = self
            .join_or_launch(key, options, |entry| {
                match entry.filter(CacheEntry::is_fresh).and_then(|entry| entry.data) {
                    Some(data) => Decision::Serve(data),
                    None => Decision::Launch {
                        fetcher,
                        merge: replace::<V>,
                    },
                }
            })
            .await;

        outcome.unwrap_or_else(|| {
            Err(CacheError::aborted(
                "fetch was skipped without a cached value",
            ))
        })
    }

    /// Force a new fetch of `key` with its registered fetcher.
    ///
    /// Any fetch already in flight is superseded: its response will be
    /// discarded when it arrives.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn refetch(&self, key: &QueryKey) -> Result<V, CacheError> {
        let registration = self
            .registry
            .get(key)
            .ok_or_else(|| CacheError::Unregistered { key: key.clone() })?;

        let (future, staged) = {
            let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "refetch");
            if in_flight.remove(key).is_some() {
                debug!("Superseding in-flight fetch");
            }
            self.launch(
                &mut in_flight,
                key,
                registration.options,
                registration.fetcher,
                replace::<V>,
            )
        };
        staged.publish(&self.store);
        future.await
    }

    /// Drop the in-flight slot for `key` and bump its generation so that a
    /// pending response is discarded. Returns the new generation.
    pub fn cancel_in_flight(&self, key: &QueryKey) -> Generation {
        self.supersede_with(key, |store| store.supersede(key))
    }

    /// Drop the in-flight slot for `key` and run `write` before any other
    /// fetch for the key can start. `write` is expected to bump the
    /// generation.
    pub(crate) fn supersede_with<R>(
        &self,
        key: &QueryKey,
        write: impl FnOnce(&CacheStore<V>) -> Staged<R, V>,
    ) -> R {
        let staged = {
            let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "supersede");
            if in_flight.remove(key).is_some() {
                debug!(key = %key, "Superseded in-flight fetch");
            }
            write(&self.store)
        };
        staged.publish(&self.store)
    }

    /// Join the in-flight fetch for `key`, or consult `decide` and act on
    /// its decision. Returns `None` when `decide` skipped the fetch.
    pub(crate) async fn join_or_launch<T, M, D>(
        &self,
        key: &QueryKey,
        options: QueryOptions,
        decide: D,
    ) -> Option<Result<V, CacheError>>
    where
        T: Send + 'static,
        M: FnOnce(Option<V>, T) -> V + Send + 'static,
        D: FnOnce(Option<CacheEntry<V>>) -> Decision<V, T, M>,
    {
        let (future, staged) = {
            let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "join_or_launch");

            if let Some(existing) = in_flight.get(key) {
                counter!(METRIC_FETCH_DEDUP).increment(1);
                debug!(
                    key = %key,
                    generation = existing.generation,
                    "Joined in-flight fetch"
                );
                (existing.future.clone(), None)
            } else {
                match decide(self.store.get(key)) {
                    Decision::Serve(data) => {
                        counter!(METRIC_FETCH_HIT).increment(1);
                        debug!(key = %key, "Served fresh cached data");
                        return Some(Ok(data));
                    }
                    Decision::Skip => return None,
                    Decision::Launch { fetcher, merge } => {
                        let (future, staged) =
                            self.launch(&mut in_flight, key, options, fetcher, merge);
                        (future, Some(staged))
                    }
                }
            }
        };

        if let Some(staged) = staged {
            staged.publish(&self.store);
        }
        Some(future.await)
    }

    /// Start a fetch while the in-flight map is locked.
    ///
    /// The fetch runs on its own task so it settles even if every caller
    /// stops waiting. The begin-fetch event is returned unpublished because
    /// the caller still holds the in-flight lock.
    fn launch<T, M>(
        &self,
        in_flight: &mut InFlightMap<V>,
        key: &QueryKey,
        options: QueryOptions,
        fetcher: Fetcher<T>,
        merge: M,
    ) -> (SharedFetch<V>, Staged<Generation, V>)
    where
        T: Send + 'static,
        M: FnOnce(Option<V>, T) -> V + Send + 'static,
    {
        let staged = self.store.begin_fetch(key, options.stale_after);
        let generation = *staged.value();
        counter!(METRIC_FETCH_TOTAL).increment(1);
        debug!(key = %key, generation, "Fetch started");

        let store = Arc::clone(&self.store);
        let slots = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let max_attempts = options.max_attempts();

        let task = async move {
            let started_at = Instant::now();
            let outcome = run_attempts(&task_key, max_attempts, &fetcher).await;
            histogram!(METRIC_FETCH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

            let result = match outcome {
                Ok(value) => {
                    let committed = store
                        .commit_success(&task_key, generation, move |previous| {
                            merge(previous, value)
                        })
                        .publish(&store);
                    match committed {
                        Ok(data) => Ok(data),
                        Err(merge) => {
                            discarded(&task_key, generation);
                            Ok(merge(None))
                        }
                    }
                }
                Err(error) => {
                    if !store
                        .commit_failure(&task_key, generation, error.clone())
                        .publish(&store)
                    {
                        discarded(&task_key, generation);
                    }
                    Err(error)
                }
            };

            release(&slots, &task_key, generation);
            result
        };

        let handle = tokio::spawn(task);
        let store = Arc::clone(&self.store);
        let slots = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(key = %task_key, generation, error = %join_error, "Fetch task aborted");
                    let error = CacheError::aborted(join_error.to_string());
                    let _ = store
                        .commit_failure(&task_key, generation, error.clone())
                        .publish(&store);
                    release(&slots, &task_key, generation);
                    Err(error)
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                future: future.clone(),
            },
        );

        (future, staged)
    }
}

fn replace<V>(_previous: Option<V>, fetched: V) -> V {
    fetched
}

async fn run_attempts<T>(
    key: &QueryKey,
    max_attempts: u32,
    fetcher: &Fetcher<T>,
) -> Result<T, CacheError> {
    let mut attempt = 0;
    loop {
        let context = FetchContext {
            key: key.clone(),
            attempt,
        };
        match fetcher(context).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt + 1 < max_attempts => {
                debug!(key = %key, attempt, error = %error, "Fetch attempt failed; retrying");
                attempt += 1;
            }
            Err(error) => {
                debug!(key = %key, attempt, error = %error, "Fetch failed");
                return Err(error);
            }
        }
    }
}

fn discarded(key: &QueryKey, generation: Generation) {
    counter!(METRIC_FETCH_DISCARDED).increment(1);
    debug!(key = %key, generation, "Discarded superseded fetch response");
}

fn release<V>(slots: &Mutex<InFlightMap<V>>, key: &QueryKey, generation: Generation) {
    let mut in_flight = mutex_lock(slots, SOURCE, "release");
    if in_flight
        .get(key)
        .is_some_and(|slot| slot.generation == generation)
    {
        in_flight.remove(key);
    }
}
