use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Error;

/// Priority assigned to an item when it is flagged as breaking news.
pub const BREAKING_PRIORITY: i32 = 10;

/// Identifier used for items that have not been persisted yet.
pub const UNREGISTERED: i64 = -1;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Copy, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub enum NewsStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl NewsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for NewsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NewsStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            _ => Err(Error::UnknownStatus(value.to_owned())),
        }
    }
}

/// Where a news item comes from.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Copy, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub enum NewsSource {
    /// Written by the editorial team through the CMS.
    #[default]
    Internal,
    Partner,
    External,
    Api,
    /// Items that came in from the secondary document feed.
    Firebase,
}

impl NewsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Partner => "partner",
            Self::External => "external",
            Self::Api => "api",
            Self::Firebase => "firebase",
        }
    }
}

impl std::fmt::Display for NewsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for NewsSource {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "internal" => Ok(Self::Internal),
            "partner" => Ok(Self::Partner),
            "external" => Ok(Self::External),
            "api" => Ok(Self::Api),
            "firebase" => Ok(Self::Firebase),
            _ => Err(Error::UnknownSource(value.to_owned())),
        }
    }
}

/// A news ticker entry. The relational row is the source of truth, every other
/// representation of an item is derived from this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub source: NewsSource,
    pub source_name: Option<String>,
    pub source_url: Option<String>,
    pub category: Option<String>,
    pub priority: i32,
    pub status: NewsStatus,
    pub is_breaking: bool,
    pub is_active: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub external_id: Option<String>,
    /// Raw JSON payload received from the upstream system.
    pub external_data: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl NewsItem {
    pub fn new(title: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: UNREGISTERED,
            title: title.to_owned(),
            content: content.to_owned(),
            source: NewsSource::default(),
            source_name: None,
            source_url: None,
            category: None,
            priority: 0,
            status: NewsStatus::Draft,
            is_breaking: false,
            is_active: true,
            published_at: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
            external_id: None,
            external_data: None,
            last_sync_at: None,
        }
    }

    pub fn with_source(mut self, source: NewsSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_owned());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: NewsStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_registered(&self) -> bool {
        self.id != UNREGISTERED
    }

    /// Returns `true` if the item should be visible to the public at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != NewsStatus::Published || !self.is_active {
            return false;
        }

        if self.published_at.is_some_and(|at| at > now) {
            return false;
        }

        if self.expires_at.is_some_and(|at| at <= now) {
            return false;
        }

        true
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }

    /// Marks the item as published. An already stamped publication time is
    /// never moved.
    pub fn publish(&mut self) {
        self.status = NewsStatus::Published;
        self.is_active = true;
        if self.published_at.is_none() {
            self.published_at = Some(Utc::now());
        }
    }

    pub fn unpublish(&mut self) {
        self.status = NewsStatus::Draft;
        self.is_active = false;
    }

    pub fn archive(&mut self) {
        self.status = NewsStatus::Archived;
        self.is_active = false;
    }

    /// Raising the flag bumps the priority to [`BREAKING_PRIORITY`], lowering it
    /// keeps whatever priority the item has.
    pub fn set_breaking(&mut self, is_breaking: bool) {
        self.is_breaking = is_breaking;
        if is_breaking {
            self.priority = BREAKING_PRIORITY;
        }
    }

    /// Called right before the first insert.
    pub(crate) fn stamp_for_insert(&mut self, now: DateTime<Utc>) {
        if self.status == NewsStatus::Published && self.published_at.is_none() {
            self.published_at = Some(now);
        }
        self.created_at = now;
        self.updated_at = now;
    }
}
