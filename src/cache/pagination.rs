//! Paginated queries.
//!
//! Pages accumulate under one key in fetch order. Advancement is forward
//! only: each call fetches the page after the last one, and stops once a
//! page arrives without a cursor.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use tracing::{debug, instrument};

use super::config::QueryOptions;
use super::entry::Generation;
use super::error::{BoxError, CacheError};
use super::fetch::{Decision, FetchContext, FetchCoordinator, Fetcher};
use super::keys::QueryKey;
use super::store::CacheStore;

pub const METRIC_PAGE_FETCH_TOTAL: &str = "query_sync_page_fetch_total";

/// One page as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<P, C> {
    pub items: Vec<P>,
    /// Cursor for the following page; `None` on the last page.
    pub next_cursor: Option<C>,
}

impl<P, C> Page<P, C> {
    pub fn new(items: Vec<P>, next_cursor: Option<C>) -> Self {
        Self { items, next_cursor }
    }

    pub fn last(items: Vec<P>) -> Self {
        Self::new(items, None)
    }
}

/// Accumulated pages plus the parameter each one was fetched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pages<P, C> {
    pub pages: Vec<Page<P, C>>,
    pub page_params: Vec<C>,
}

impl<P, C> Default for Pages<P, C> {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            page_params: Vec::new(),
        }
    }
}

impl<P, C: Clone + Default> Pages<P, C> {
    fn push(&mut self, param: C, page: Page<P, C>) {
        self.page_params.push(param);
        self.pages.push(page);
    }

    /// True once the most recent page carried no cursor.
    pub fn is_exhausted(&self) -> bool {
        self.pages
            .last()
            .is_some_and(|page| page.next_cursor.is_none())
    }

    /// Parameter for the next page, or `None` when exhausted.
    pub fn next_param(&self) -> Option<C> {
        match self.pages.last() {
            None => Some(C::default()),
            Some(page) => page.next_cursor.clone(),
        }
    }

    /// Items of every page, in fetch order.
    pub fn items(&self) -> impl Iterator<Item = &P> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Passed to every page fetcher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContext<C> {
    pub key: QueryKey,
    pub page_param: C,
    pub attempt: u32,
}

/// Type-erased async page fetcher.
pub type PageFetcher<P, C> = Arc<
    dyn Fn(PageContext<C>) -> BoxFuture<'static, Result<Page<P, C>, CacheError>> + Send + Sync,
>;

/// Wrap an async closure as a [`PageFetcher`].
pub fn page_fetcher<P, C, F, Fut, E>(f: F) -> PageFetcher<P, C>
where
    F: Fn(PageContext<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Page<P, C>, E>> + Send + 'static,
    E: Into<BoxError>,
    P: 'static,
    C: 'static,
{
    Arc::new(move |context| {
        let pending = f(context);
        async move { pending.await.map_err(|error| CacheError::from(error.into())) }.boxed()
    })
}

/// Forward-only page accumulation over a store of [`Pages`].
pub struct PaginationController<P, C = u64> {
    fetch: FetchCoordinator<Pages<P, C>>,
    options: QueryOptions,
}

impl<P, C> PaginationController<P, C>
where
    P: Clone + Send + Sync + 'static,
    C: Clone + Default + Send + Sync + 'static,
{
    pub fn new(store: Arc<CacheStore<Pages<P, C>>>) -> Self {
        Self {
            fetch: FetchCoordinator::new(store),
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore<Pages<P, C>>> {
        self.fetch.store()
    }

    /// Fetch and append the next page of `key`.
    ///
    /// Joins a page fetch already in flight for the key, and resolves at
    /// once without calling `fetcher` when the last page had no cursor.
    /// Disabled queries never fetch and fail if no page is cached.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn fetch_next(
        &self,
        key: &QueryKey,
        fetcher: PageFetcher<P, C>,
    ) -> Result<(), CacheError> {
        if !self.options.enabled {
            debug!("Paginated query disabled; serving cached pages only");
            return self
                .store()
                .data(key)
                .map(|_| ())
                .ok_or_else(|| CacheError::Disabled { key: key.clone() });
        }

        let outcome = self
            .fetch
            .join_or_launch(key, self.options, |entry| {
                let pages = entry.and_then(|entry| entry.data);
                let Some(param) = pages.as_ref().map_or(Some(C::default()), Pages::next_param)
                else {
                    debug!(key = %key, "Pagination exhausted; nothing to fetch");
                    return Decision::Skip;
                };

                counter!(METRIC_PAGE_FETCH_TOTAL).increment(1);
                debug!(
                    key = %key,
                    page = pages.as_ref().map_or(0, Pages::len),
                    "Fetching next page"
                );

                let page_param = param.clone();
                let page: Fetcher<Page<P, C>> = Arc::new(move |context: FetchContext| {
                    fetcher(PageContext {
                        key: context.key,
                        page_param: page_param.clone(),
                        attempt: context.attempt,
                    })
                });
                Decision::Launch {
                    fetcher: page,
                    merge: move |previous: Option<Pages<P, C>>, page: Page<P, C>| {
                        let mut pages = previous.unwrap_or_default();
                        pages.push(param, page);
                        pages
                    },
                }
            })
            .await;

        match outcome {
            Some(result) => result.map(|_| ()),
            None => Ok(()),
        }
    }

    pub fn pages(&self, key: &QueryKey) -> Option<Pages<P, C>> {
        self.store().data(key)
    }

    /// True until a page without a cursor has been appended.
    pub fn has_next_page(&self, key: &QueryKey) -> bool {
        self.pages(key).is_none_or(|pages| !pages.is_exhausted())
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.fetch.is_fetching(key)
    }

    /// Drop every accumulated page so the next call starts from the first.
    ///
    /// A page fetch still in flight is superseded and its response dropped.
    pub fn reset(&self, key: &QueryKey) -> Generation {
        debug!(key = %key, "Resetting paginated query");
        self.fetch.supersede_with(key, |store| store.reset(key))
    }
}
