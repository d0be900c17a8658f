//! Relational persistence layer.
//!
//! [`Repository`] is a thin handle over the PostgreSQL connection pool. Queries
//! live as free functions in [`sql_models`] and accept anything implementing
//! [`AsExec`], so the same query runs on a plain pooled connection ([`Cx`]) or
//! inside a transaction ([`Tx`]).
//!
//! Business logic that spans the relational store and other backends lives in
//! the [`facades`](self::FacadeNews) submodule.
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlx::postgres::PgPoolOptions;

use crate::types;

mod facades;
pub use facades::*;

mod sql_models;
pub use sql_models::*;

pub mod testing;

pub type Database = sqlx::Postgres;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("backend error :: {0}")]
    BackendError(#[from] sqlx::Error),
    #[error("migration error :: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("bad value in column `{column}` :: {source}")]
    BadValue {
        column: &'static str,
        source: types::Error,
    },
    #[error("news item {0} not found")]
    NotFound(i64),
}

/// Shared handle to the relational store, cheap to clone.
#[derive(Clone)]
pub struct Repository {
    pool: sqlx::Pool<Database>,
}

impl Repository {
    pub async fn try_new(database_url: &str, max_connections: u32) -> Result<Self, Error> {
        debug!("connecting to database (max connections: {max_connections})");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: sqlx::Pool<Database>) -> Self {
        Self { pool }
    }

    pub fn connection(&self) -> Cx<'_> {
        Cx { pool: &self.pool }
    }

    pub async fn transaction(&self) -> Result<Tx<'_>, Error> {
        Ok(Tx {
            inner: self.pool.begin().await?,
            _repo: PhantomData,
        })
    }

    /// Applies the embedded migrations.
    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Anything that can run a query.
pub trait AsExec {
    fn as_exec(&mut self) -> impl sqlx::PgExecutor<'_>;
}

/// Pooled connection, every query may run on a different physical connection.
pub struct Cx<'a> {
    pool: &'a sqlx::Pool<Database>,
}

impl AsExec for Cx<'_> {
    fn as_exec(&mut self) -> impl sqlx::PgExecutor<'_> {
        self.pool
    }
}

/// Open transaction, rolled back on drop unless [`Tx::commit`] is called.
pub struct Tx<'a> {
    inner: sqlx::Transaction<'static, Database>,
    _repo: PhantomData<&'a Repository>,
}

impl Tx<'_> {
    pub async fn commit(self) -> Result<(), Error> {
        self.inner.commit().await?;
        Ok(())
    }
}

impl AsExec for Tx<'_> {
    fn as_exec(&mut self) -> impl sqlx::PgExecutor<'_> {
        &mut *self.inner
    }
}

/// Filter applied when listing live news items.
#[derive(Debug, Clone, Default)]
pub struct ActiveFilter {
    pub source: Option<types::NewsSource>,
    pub category: Option<String>,
    pub breaking_only: bool,
    pub limit: Option<i64>,
}

impl ActiveFilter {
    pub fn effective_limit(&self) -> i64 {
        effective_limit(self.limit)
    }
}

/// Filter applied when listing every item regardless of its lifecycle, as the
/// editorial views do.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<types::NewsStatus>,
    pub source: Option<types::NewsSource>,
    pub category: Option<String>,
    /// `Some(false)` selects only the items without the breaking flag.
    pub breaking: Option<bool>,
    /// 1-based page number.
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListFilter {
    pub fn effective_limit(&self) -> i64 {
        effective_limit(self.limit)
    }

    /// Requested page, anything below the first page selects the first page.
    pub fn effective_page(&self) -> i64 {
        self.page.filter(|page| *page > 0).unwrap_or(1)
    }

    pub fn offset(&self) -> i64 {
        (self.effective_page() - 1) * self.effective_limit()
    }
}

/// Requested limit clamped to the accepted range, out of range values fall
/// back to the default.
fn effective_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(limit) if limit > 0 && limit <= crate::params::MAX_NEWS_LIMIT => limit,
        _ => crate::params::DEFAULT_NEWS_LIMIT,
    }
}

/// One page of a [`ListFilter`] listing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsPage {
    pub items: Vec<types::NewsItem>,
    pub page: i64,
    pub limit: i64,
    /// Number of items matching the filter across all pages.
    pub total: i64,
}

impl NewsPage {
    pub fn pages(&self) -> i64 {
        (self.total + self.limit - 1) / self.limit
    }
}

/// Persistence operations needed by [`FacadeNews`].
///
/// Implemented by [`Repository`] for PostgreSQL and by
/// [`testing::MemoryRepository`] for tests.
#[async_trait]
pub trait NewsRecords: Send + Sync {
    /// Inserts a new item, stamping creation time (and publication time for
    /// items created already published).
    async fn news_create(&self, item: &types::NewsItem) -> Result<types::NewsItem, Error>;

    async fn news_update(&self, item: &types::NewsItem) -> Result<types::NewsItem, Error>;

    async fn news_find(&self, id: i64) -> Result<types::NewsItem, Error>;

    /// Soft-deletes the item and returns its last state.
    async fn news_delete(&self, id: i64) -> Result<types::NewsItem, Error>;

    /// All items satisfying the liveness invariant at `now`.
    async fn news_live(&self, now: DateTime<Utc>) -> Result<Vec<types::NewsItem>, Error>;

    async fn news_active(
        &self,
        filter: &ActiveFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<types::NewsItem>, Error>;

    /// Every non deleted item matching `filter`, most recently created first.
    async fn news_list(&self, filter: &ListFilter) -> Result<NewsPage, Error>;

    /// Stores an item received from an upstream system. If an item with the same
    /// `(external_id, source)` exists, its upstream fields are refreshed,
    /// otherwise the item is inserted. The returned flag is `true` on insert.
    async fn news_save_external(
        &self,
        item: &types::NewsItem,
    ) -> Result<(types::NewsItem, bool), Error>;
}

#[async_trait]
impl NewsRecords for Repository {
    async fn news_create(&self, item: &types::NewsItem) -> Result<types::NewsItem, Error> {
        let mut item = item.clone();
        item.stamp_for_insert(Utc::now());
        news_create(&mut self.connection(), &item).await
    }

    async fn news_update(&self, item: &types::NewsItem) -> Result<types::NewsItem, Error> {
        news_update(&mut self.connection(), item, Utc::now()).await
    }

    async fn news_find(&self, id: i64) -> Result<types::NewsItem, Error> {
        news_find_by_id(&mut self.connection(), id).await
    }

    async fn news_delete(&self, id: i64) -> Result<types::NewsItem, Error> {
        news_soft_delete(&mut self.connection(), id, Utc::now()).await
    }

    async fn news_live(&self, now: DateTime<Utc>) -> Result<Vec<types::NewsItem>, Error> {
        news_find_live(&mut self.connection(), now).await
    }

    async fn news_active(
        &self,
        filter: &ActiveFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<types::NewsItem>, Error> {
        news_find_active(&mut self.connection(), filter, now).await
    }

    async fn news_list(&self, filter: &ListFilter) -> Result<NewsPage, Error> {
        let mut cx = self.connection();
        let total = news_count_all(&mut cx, filter).await?;
        let items = news_find_all(&mut cx, filter).await?;

        Ok(NewsPage {
            items,
            page: filter.effective_page(),
            limit: filter.effective_limit(),
            total,
        })
    }

    async fn news_save_external(
        &self,
        item: &types::NewsItem,
    ) -> Result<(types::NewsItem, bool), Error> {
        let now = Utc::now();
        let mut tx = self.transaction().await?;

        let existing = match &item.external_id {
            Some(external_id) => {
                news_find_by_external_id(&mut tx, external_id, item.source).await?
            }
            None => None,
        };

        let result = if let Some(mut existing) = existing {
            existing.title = item.title.clone();
            existing.content = item.content.clone();
            existing.external_data = item.external_data.clone();
            existing.last_sync_at = item.last_sync_at;
            (news_update(&mut tx, &existing, now).await?, false)
        } else {
            let mut item = item.clone();
            item.stamp_for_insert(now);
            (news_create(&mut tx, &item).await?, true)
        };

        tx.commit().await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_filter_paging() {
        let filter = ListFilter::default();
        assert_eq!(filter.effective_page(), 1);
        assert_eq!(filter.effective_limit(), 20);
        assert_eq!(filter.offset(), 0);

        let filter = ListFilter {
            page: Some(3),
            limit: Some(10),
            ..Default::default()
        };
        assert_eq!(filter.offset(), 20);

        let filter = ListFilter {
            page: Some(0),
            limit: Some(500),
            ..Default::default()
        };
        assert_eq!(filter.effective_page(), 1);
        assert_eq!(filter.effective_limit(), 20);
    }

    #[test]
    fn page_count() {
        let page = |total| NewsPage {
            items: Vec::new(),
            page: 1,
            limit: 20,
            total,
        };
        assert_eq!(page(0).pages(), 0);
        assert_eq!(page(20).pages(), 1);
        assert_eq!(page(21).pages(), 2);
    }
}
