//! Paginated content feeds.

use std::num::NonZeroU32;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::application::backends::FeedBackend;
use crate::cache::{
    CacheError, CacheStore, PageContext, PageFetcher, Pages, PaginationController, QueryKey,
    QueryOptions, page_fetcher,
};
use crate::config::FeedSettings;
use crate::query_key;

const FEED_SCOPE: &str = "feed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub author: String,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed scope must not be empty")]
    EmptyScope,
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Infinite-scroll feeds, one paginated entry per scope.
pub struct FeedService<B> {
    backend: Arc<B>,
    pagination: PaginationController<FeedItem, u64>,
    page_size: NonZeroU32,
}

impl<B> FeedService<B>
where
    B: FeedBackend + 'static,
{
    pub fn new(backend: Arc<B>, settings: &FeedSettings, options: QueryOptions) -> Self {
        Self {
            backend,
            pagination: PaginationController::new(Arc::new(CacheStore::new()))
                .with_options(options),
            page_size: settings.page_size,
        }
    }

    pub fn feed_key(scope: &str) -> QueryKey {
        query_key![FEED_SCOPE, scope]
    }

    pub fn store(&self) -> &Arc<CacheStore<Pages<FeedItem, u64>>> {
        self.pagination.store()
    }

    /// Fetch the next page of `scope`. Returns whether more pages remain.
    #[instrument(skip_all, fields(scope = %scope))]
    pub async fn load_more(&self, scope: &str) -> Result<bool, FeedError> {
        let key = Self::scoped_key(scope)?;
        self.pagination
            .fetch_next(&key, self.page_fetcher(scope))
            .await?;
        let has_more = self.pagination.has_next_page(&key);
        debug!(
            loaded = self.items(scope).len(),
            has_more, "Feed page loaded"
        );
        Ok(has_more)
    }

    /// Every loaded item of `scope`, in page order.
    pub fn items(&self, scope: &str) -> Vec<FeedItem> {
        self.pagination
            .pages(&Self::feed_key(scope))
            .map(|pages| pages.items().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_more(&self, scope: &str) -> bool {
        self.pagination.has_next_page(&Self::feed_key(scope))
    }

    /// Drop loaded pages and fetch the first page again.
    #[instrument(skip_all, fields(scope = %scope))]
    pub async fn refresh(&self, scope: &str) -> Result<bool, FeedError> {
        let key = Self::scoped_key(scope)?;
        self.pagination.reset(&key);
        self.load_more(scope).await
    }

    fn scoped_key(scope: &str) -> Result<QueryKey, FeedError> {
        if scope.trim().is_empty() {
            return Err(FeedError::EmptyScope);
        }
        Ok(Self::feed_key(scope))
    }

    fn page_fetcher(&self, scope: &str) -> PageFetcher<FeedItem, u64> {
        let backend = Arc::clone(&self.backend);
        let scope = scope.to_string();
        let limit = self.page_size.get();
        page_fetcher(move |context: PageContext<u64>| {
            let backend = Arc::clone(&backend);
            let scope = scope.clone();
            async move {
                backend
                    .list_items(&scope, context.page_param, limit)
                    .await
            }
        })
    }
}
