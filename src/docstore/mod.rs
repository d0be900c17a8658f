//! # Document store
//!
//! Secondary, schema-less store holding the public projection of live news
//! items. It is never the source of truth: every document can be rebuilt from
//! the relational rows at any time, so losing or skipping a write here only
//! delays the public view until the next synchronization.
//!
//! Documents live in a single flat collection, keyed by the decimal
//! representation of the relational id.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types;

mod firestore;
pub use firestore::*;

mod value;

pub mod testing;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http error :: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("document store replied with status {status} :: {body}")]
    BadStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed document `{id}` :: {msg}")]
    MalformedDocument { id: String, msg: String },
    #[error("authentication error :: {0}")]
    AuthError(#[from] gcp_auth::Error),
    #[error("configuration error :: {0}")]
    ConfigError(String),
    #[error("document store unavailable")]
    Unavailable,
}

pub type DocumentStoreRef = Arc<dyn DocumentStore>;

/// Operations required on the secondary store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates or fully replaces the document with id `doc.id`.
    async fn upsert(&self, doc: &NewsDocument) -> Result<(), Error>;

    /// Removes the document with the given id. Removing a missing document
    /// succeeds.
    async fn remove(&self, id: &str) -> Result<(), Error>;

    /// Writes all the documents atomically: either every document is stored or
    /// none is.
    async fn commit(&self, docs: &[NewsDocument]) -> Result<(), Error>;

    /// Reads back documents ordered by priority and then by publication time,
    /// most recent first.
    async fn query(&self, limit: usize, breaking_only: bool) -> Result<Vec<NewsDocument>, Error>;
}

/// Public projection of a [`types::NewsItem`].
///
/// The mapping is lossy: missing optional text becomes an empty string and
/// missing timestamps become the Unix epoch. Status, activity flag and
/// upstream data are not projected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub source_name: String,
    pub source_url: String,
    pub category: String,
    pub priority: i64,
    pub is_breaking: bool,
    pub published_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewsDocument {
    pub fn document_id(id: i64) -> String {
        id.to_string()
    }
}

impl From<&types::NewsItem> for NewsDocument {
    fn from(item: &types::NewsItem) -> Self {
        Self {
            id: Self::document_id(item.id),
            title: item.title.clone(),
            content: item.content.clone(),
            source: item.source.to_string(),
            source_name: item.source_name.clone().unwrap_or_default(),
            source_url: item.source_url.clone().unwrap_or_default(),
            category: item.category.clone().unwrap_or_default(),
            priority: item.priority.into(),
            is_breaking: item.is_breaking,
            published_at: item.published_at.unwrap_or_default(),
            expires_at: item.expires_at.unwrap_or_default(),
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection() {
        let mut item = types::NewsItem::new("Cocoa prices", "<p>up</p>")
            .with_source(types::NewsSource::Partner)
            .with_category("market");
        item.id = 42;
        item.source_url = Some("https://example.org/cocoa".to_owned());
        item.set_breaking(true);
        item.publish();

        let doc = NewsDocument::from(&item);
        assert_eq!(doc.id, "42");
        assert_eq!(doc.title, "Cocoa prices");
        assert_eq!(doc.source, "partner");
        assert_eq!(doc.source_url, "https://example.org/cocoa");
        assert_eq!(doc.category, "market");
        assert_eq!(doc.priority, types::BREAKING_PRIORITY as i64);
        assert!(doc.is_breaking);
        assert_eq!(Some(doc.published_at), item.published_at);
    }

    #[test]
    fn projection_fills_missing_values() {
        let item = types::NewsItem::new("title", "content");
        let doc = NewsDocument::from(&item);

        assert_eq!(doc.source_name, "");
        assert_eq!(doc.source_url, "");
        assert_eq!(doc.category, "");
        assert_eq!(doc.published_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(doc.expires_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn projection_json_field_names() {
        let doc = NewsDocument::from(&types::NewsItem::new("title", "content"));
        let json = serde_json::to_value(&doc).unwrap();

        for field in [
            "id",
            "title",
            "content",
            "source",
            "sourceName",
            "sourceUrl",
            "category",
            "priority",
            "isBreaking",
            "publishedAt",
            "expiresAt",
            "createdAt",
            "updatedAt",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }
}
