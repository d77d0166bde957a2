//! Query client facade.

use std::future::Future;
use std::sync::Arc;

use super::config::QueryOptions;
use super::entry::{CacheEntry, Generation};
use super::error::{BoxError, CacheError};
use super::events::{CacheEvent, Subscription};
use super::fetch::{FetchCoordinator, Fetcher};
use super::keys::QueryKey;
use super::mutation::MutationCoordinator;
use super::store::CacheStore;

/// Entry point for reading, fetching and mutating one family of values.
///
/// Clients are explicitly constructed; two clients never share state unless
/// they were built over the same store.
pub struct QueryClient<V> {
    fetch: Arc<FetchCoordinator<V>>,
    mutation: MutationCoordinator<V>,
    defaults: QueryOptions,
}

impl<V> QueryClient<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_store(Arc::new(CacheStore::new()))
    }

    pub fn with_store(store: Arc<CacheStore<V>>) -> Self {
        let fetch = Arc::new(FetchCoordinator::new(store));
        Self {
            mutation: MutationCoordinator::new(Arc::clone(&fetch)),
            fetch,
            defaults: QueryOptions::default(),
        }
    }

    /// Options used by [`ensure_fresh`](Self::ensure_fresh).
    pub fn with_defaults(mut self, defaults: QueryOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> QueryOptions {
        self.defaults
    }

    pub fn store(&self) -> &Arc<CacheStore<V>> {
        self.fetch.store()
    }

    pub fn read(&self, key: &QueryKey) -> CacheEntry<V> {
        self.store().read(key)
    }

    pub fn data(&self, key: &QueryKey) -> Option<V> {
        self.store().data(key)
    }

    pub fn subscribe<F>(&self, key: QueryKey, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent<V>) + Send + Sync + 'static,
    {
        self.store().subscribe(key, callback)
    }

    /// Remember `fetcher` for `key` without fetching, so a later mutation
    /// can reconcile the key even if it was never read.
    pub fn register(&self, key: QueryKey, fetcher: Fetcher<V>) {
        self.fetch.registry().register(key, fetcher, self.defaults);
    }

    pub async fn ensure_fresh(&self, key: &QueryKey, fetcher: Fetcher<V>) -> Result<V, CacheError> {
        self.fetch.ensure_fresh(key, fetcher, self.defaults).await
    }

    pub async fn ensure_fresh_with(
        &self,
        key: &QueryKey,
        fetcher: Fetcher<V>,
        options: QueryOptions,
    ) -> Result<V, CacheError> {
        self.fetch.ensure_fresh(key, fetcher, options).await
    }

    pub async fn refetch(&self, key: &QueryKey) -> Result<V, CacheError> {
        self.fetch.refetch(key).await
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.fetch.is_fetching(key)
    }

    pub fn cancel_in_flight(&self, key: &QueryKey) -> Generation {
        self.fetch.cancel_in_flight(key)
    }

    pub fn invalidate(&self, key: &QueryKey) -> bool {
        self.store().invalidate(key)
    }

    pub fn invalidate_prefix(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.store().invalidate_prefix(prefix)
    }

    /// See [`MutationCoordinator::mutate`].
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
        self.mutation
            .mutate(key, payload, remote_op, optimistic)
            .await
    }
}

impl<V> Default for QueryClient<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::cache::events::EventKind;
    use crate::cache::fetch::fetcher;
    use crate::query_key;

    #[tokio::test(start_paused = true)]
    async fn defaults_apply_to_ensure_fresh() {
        let client: QueryClient<u32> = QueryClient::new()
            .with_defaults(QueryOptions::default().with_stale_after(Duration::from_secs(30)));
        let key = query_key!["feed"];

        client
            .ensure_fresh(&key, fetcher(|_| async { Ok::<_, std::io::Error>(1) }))
            .await
            .expect("first fetch");
        let cached = client
            .ensure_fresh(&key, fetcher(|_| async { Ok::<_, std::io::Error>(2) }))
            .await
            .expect("served from cache");

        assert_eq!(cached, 1);
        assert_eq!(client.read(&key).stale_after, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn per_call_options_override_defaults() {
        let client: QueryClient<u32> = QueryClient::new();
        let key = query_key!["feed"];
        let disabled = QueryOptions::default().with_enabled(false);

        let error = client
            .ensure_fresh_with(&key, fetcher(|_| async { Ok::<_, std::io::Error>(1) }), disabled)
            .await
            .expect_err("nothing cached");
        assert!(matches!(error, CacheError::Disabled { .. }));

        client
            .ensure_fresh(&key, fetcher(|_| async { Ok::<_, std::io::Error>(2) }))
            .await
            .expect("enabled fetch");
        let cached = client
            .ensure_fresh_with(&key, fetcher(|_| async { Ok::<_, std::io::Error>(3) }), disabled)
            .await
            .expect("cached value served");
        assert_eq!(cached, 2);
    }

    #[tokio::test]
    async fn subscribers_observe_fetch_lifecycle() {
        let client: QueryClient<u32> = QueryClient::new();
        let key = query_key!["chat", "1"];
        let kinds = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&kinds);
        let subscription = client.subscribe(key.clone(), move |event| {
            sink.lock().expect("sink lock").push(event.kind);
        });

        client
            .ensure_fresh(&key, fetcher(|_| async { Ok::<_, std::io::Error>(1) }))
            .await
            .expect("fetch");
        client.invalidate(&key);
        drop(subscription);
        client.invalidate(&key);

        assert_eq!(
            *kinds.lock().expect("sink lock"),
            vec![
                EventKind::FetchStarted,
                EventKind::FetchSucceeded,
                EventKind::Invalidated
            ]
        );
    }

    #[tokio::test]
    async fn callbacks_may_read_the_client() {
        let client: Arc<QueryClient<u32>> = Arc::new(QueryClient::new());
        let key = query_key!["feed"];
        let observed = Arc::new(Mutex::new(Vec::new()));

        let reader = Arc::clone(&client);
        let sink = Arc::clone(&observed);
        let _subscription = client.subscribe(key.clone(), move |event| {
            let entry = reader.read(&event.key);
            sink.lock().expect("sink lock").push(entry.status);
        });

        client
            .ensure_fresh(&key, fetcher(|_| async { Ok::<_, std::io::Error>(3) }))
            .await
            .expect("fetch");

        assert_eq!(observed.lock().expect("sink lock").len(), 2);
    }
}
