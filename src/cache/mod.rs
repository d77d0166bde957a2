//! Reactive query cache.
//!
//! - [`CacheStore`] keeps one entry per [`QueryKey`] and announces every
//!   write through a [`SubscriptionBus`].
//! - [`FetchCoordinator`] serves fresh data, deduplicating concurrent fetches.
//! - [`PaginationController`] accumulates pages under one key.
//! - [`MutationCoordinator`] applies optimistic writes and reconciles or
//!   rolls them back.
//! - [`QueryClient`] bundles the above for one value type.
//!
//! Defaults come from `[queries]` in the configuration file:
//!
//! ```toml
//! [queries]
//! stale_after_ms = 30000
//! retry = 1
//! enabled = true
//! ```

mod client;
mod config;
mod entry;
mod error;
mod events;
mod fetch;
mod keys;
mod lock;
mod mutation;
mod optimistic;
mod pagination;
mod registry;
mod store;

pub use client::QueryClient;
pub use config::QueryOptions;
pub use entry::{CacheEntry, EntryPatch, EntryStatus, Generation};
pub use error::{BoxError, CacheError};
pub use events::{CacheEvent, Epoch, EventKind, Subscription, SubscriptionBus};
pub use fetch::{FetchContext, FetchCoordinator, Fetcher, fetcher};
pub use keys::{KeyPart, QueryKey};
pub use mutation::{MutationCoordinator, MutationState, append_optimistic};
pub use optimistic::{OptimisticRecord, TEMP_ID_PREFIX, is_temp_id, temp_id};
pub use pagination::{Page, PageContext, PageFetcher, Pages, PaginationController, page_fetcher};
pub use registry::{FetcherRegistry, Registration};
pub use store::CacheStore;

/// Metric names recorded by this module.
pub mod metric_names {
    pub use super::fetch::{
        METRIC_FETCH_DEDUP as FETCH_DEDUP, METRIC_FETCH_DISCARDED as FETCH_DISCARDED,
        METRIC_FETCH_HIT as FETCH_HIT, METRIC_FETCH_MS as FETCH_MS,
        METRIC_FETCH_TOTAL as FETCH_TOTAL,
    };
    pub use super::mutation::{
        METRIC_MUTATION_RECONCILED as MUTATION_RECONCILED,
        METRIC_MUTATION_ROLLBACK as MUTATION_ROLLBACK,
    };
    pub use super::pagination::METRIC_PAGE_FETCH_TOTAL as PAGE_FETCH_TOTAL;
}
