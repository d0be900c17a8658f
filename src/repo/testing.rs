//! In-memory stand-in for the relational store, used by facade tests.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ActiveFilter, Error, ListFilter, NewsPage, NewsRecords};
use crate::types::NewsItem;

#[derive(Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, NewsItem>,
    deleted: BTreeMap<i64, NewsItem>,
}

/// Keeps rows in a map and mimics the PostgreSQL queries, including soft
/// deletes. Writes can be forced to fail to exercise error paths.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    table: Arc<Mutex<Table>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write returns a backend error without touching the data.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Row as currently stored, bypassing the facade.
    pub fn row(&self, id: i64) -> Option<NewsItem> {
        self.lock().rows.get(&id).cloned()
    }

    /// Overwrites a row, bypassing the facade.
    pub fn put_row(&self, item: NewsItem) {
        self.lock().rows.insert(item.id, item);
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::BackendError(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn insert(table: &mut Table, item: &NewsItem, now: DateTime<Utc>) -> NewsItem {
        table.next_id += 1;
        let mut item = item.clone();
        item.stamp_for_insert(now);
        item.id = table.next_id;
        table.rows.insert(item.id, item.clone());
        item
    }

    fn save(table: &mut Table, item: &NewsItem, now: DateTime<Utc>) -> Result<NewsItem, Error> {
        let row = table.rows.get_mut(&item.id).ok_or(Error::NotFound(item.id))?;
        let created_at = row.created_at;
        *row = item.clone();
        row.created_at = created_at;
        row.updated_at = now;
        Ok(row.clone())
    }
}

#[async_trait]
impl NewsRecords for MemoryRepository {
    async fn news_create(&self, item: &NewsItem) -> Result<NewsItem, Error> {
        self.check_writable()?;
        Ok(Self::insert(&mut self.lock(), item, Utc::now()))
    }

    async fn news_update(&self, item: &NewsItem) -> Result<NewsItem, Error> {
        self.check_writable()?;
        Self::save(&mut self.lock(), item, Utc::now())
    }

    async fn news_find(&self, id: i64) -> Result<NewsItem, Error> {
        self.lock().rows.get(&id).cloned().ok_or(Error::NotFound(id))
    }

    async fn news_delete(&self, id: i64) -> Result<NewsItem, Error> {
        self.check_writable()?;
        let mut table = self.lock();
        let item = table.rows.remove(&id).ok_or(Error::NotFound(id))?;
        table.deleted.insert(id, item.clone());
        Ok(item)
    }

    async fn news_live(&self, now: DateTime<Utc>) -> Result<Vec<NewsItem>, Error> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|item| item.is_live_at(now))
            .cloned()
            .collect())
    }

    async fn news_active(
        &self,
        filter: &ActiveFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<NewsItem>, Error> {
        let mut items: Vec<NewsItem> = self
            .lock()
            .rows
            .values()
            .filter(|item| item.is_live_at(now))
            .filter(|item| filter.source.is_none_or(|source| item.source == source))
            .filter(|item| {
                filter
                    .category
                    .as_ref()
                    .is_none_or(|category| item.category.as_ref() == Some(category))
            })
            .filter(|item| !filter.breaking_only || item.is_breaking)
            .cloned()
            .collect();

        // descending on `Option` puts missing publication dates last
        items.sort_by(|a, b| {
            b.is_breaking
                .cmp(&a.is_breaking)
                .then(b.priority.cmp(&a.priority))
                .then(b.published_at.cmp(&a.published_at))
        });
        items.truncate(filter.effective_limit() as usize);

        Ok(items)
    }

    async fn news_list(&self, filter: &ListFilter) -> Result<NewsPage, Error> {
        let mut items: Vec<NewsItem> = self
            .lock()
            .rows
            .values()
            .filter(|item| filter.status.is_none_or(|status| item.status == status))
            .filter(|item| filter.source.is_none_or(|source| item.source == source))
            .filter(|item| {
                filter
                    .category
                    .as_ref()
                    .is_none_or(|category| item.category.as_ref() == Some(category))
            })
            .filter(|item| filter.breaking.is_none_or(|breaking| item.is_breaking == breaking))
            .cloned()
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = items.len() as i64;
        let items = items
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.effective_limit() as usize)
            .collect();

        Ok(NewsPage {
            items,
            page: filter.effective_page(),
            limit: filter.effective_limit(),
            total,
        })
    }

    async fn news_save_external(&self, item: &NewsItem) -> Result<(NewsItem, bool), Error> {
        self.check_writable()?;
        let now = Utc::now();
        let mut table = self.lock();

        let existing = item.external_id.as_ref().and_then(|external_id| {
            table
                .rows
                .values()
                .find(|row| {
                    row.external_id.as_ref() == Some(external_id) && row.source == item.source
                })
                .cloned()
        });

        if let Some(mut existing) = existing {
            existing.title = item.title.clone();
            existing.content = item.content.clone();
            existing.external_data = item.external_data.clone();
            existing.last_sync_at = item.last_sync_at;
            Ok((Self::save(&mut table, &existing, now)?, false))
        } else {
            Ok((Self::insert(&mut table, item, now), true))
        }
    }
}
