use chrono::{DateTime, Utc};

use crate::{repo, types};

/// Row of the `news_items` table as stored in the database. Enumerations are
/// kept as their textual representation and validated on conversion.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NewsRecord {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub(super) source: String,
    pub source_name: Option<String>,
    pub source_url: Option<String>,
    pub category: Option<String>,
    pub priority: i32,
    pub(super) status: String,
    pub is_breaking: bool,
    pub is_active: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Soft delete marker, rows carrying a value are invisible to every query.
    pub(super) deleted_at: Option<DateTime<Utc>>,

    pub external_id: Option<String>,
    pub external_data: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl NewsRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl TryFrom<NewsRecord> for types::NewsItem {
    type Error = repo::Error;

    fn try_from(value: NewsRecord) -> Result<Self, Self::Error> {
        let status = value
            .status
            .parse()
            .map_err(|source| repo::Error::BadValue {
                column: "status",
                source,
            })?;
        let source = value
            .source
            .parse()
            .map_err(|source| repo::Error::BadValue {
                column: "source",
                source,
            })?;

        Ok(Self {
            id: value.id,
            title: value.title,
            content: value.content,
            source,
            source_name: value.source_name,
            source_url: value.source_url,
            category: value.category,
            priority: value.priority,
            status,
            is_breaking: value.is_breaking,
            is_active: value.is_active,
            published_at: value.published_at,
            expires_at: value.expires_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
            external_id: value.external_id,
            external_data: value.external_data,
            last_sync_at: value.last_sync_at,
        })
    }
}
