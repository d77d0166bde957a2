//! Fetcher registry.
//!
//! Remembers the last fetcher and options used for each key so that a key
//! can be refetched later (after a mutation, or on manual refetch) without
//! the caller supplying the fetcher again.

use std::collections::HashMap;
use std::sync::RwLock;

use super::config::QueryOptions;
use super::fetch::Fetcher;
use super::keys::QueryKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// A fetcher together with the options it was registered with.
pub struct Registration<V> {
    pub fetcher: Fetcher<V>,
    pub options: QueryOptions,
}

impl<V> Clone for Registration<V> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            options: self.options,
        }
    }
}

/// Tracks key → fetcher mappings.
pub struct FetcherRegistry<V> {
    registrations: RwLock<HashMap<QueryKey, Registration<V>>>,
}

impl<V> FetcherRegistry<V> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the fetcher for `key`.
    pub fn register(&self, key: QueryKey, fetcher: Fetcher<V>, options: QueryOptions) {
        rw_write(&self.registrations, SOURCE, "register")
            .insert(key, Registration { fetcher, options });
    }

    pub fn get(&self, key: &QueryKey) -> Option<Registration<V>> {
        rw_read(&self.registrations, SOURCE, "get").get(key).cloned()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        rw_read(&self.registrations, SOURCE, "contains").contains_key(key)
    }

    /// Get the number of registered keys.
    pub fn len(&self) -> usize {
        rw_read(&self.registrations, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for FetcherRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::fetch::fetcher;
    use crate::query_key;

    #[test]
    fn register_and_lookup() {
        let registry: FetcherRegistry<u32> = FetcherRegistry::new();
        let key = query_key!["feed"];
        let options = QueryOptions::default().with_stale_after(Duration::from_secs(5));

        registry.register(key.clone(), fetcher(|_| async { Ok::<_, std::io::Error>(1) }), options);

        let registration = registry.get(&key).expect("registered fetcher");
        assert_eq!(registration.options, options);
        assert!(registry.contains(&key));
        assert!(!registry.contains(&query_key!["chat"]));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn register_replaces_previous_options() {
        let registry: FetcherRegistry<u32> = FetcherRegistry::new();
        let key = query_key!["feed"];

        registry.register(
            key.clone(),
            fetcher(|_| async { Ok::<_, std::io::Error>(1) }),
            QueryOptions::default(),
        );
        registry.register(
            key.clone(),
            fetcher(|_| async { Ok::<_, std::io::Error>(2) }),
            QueryOptions::default().with_retry(3),
        );

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&key).map(|r| r.options.retry), Some(3));
    }
}
