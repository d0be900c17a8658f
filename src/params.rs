//! Process-wide parameters.
//!
//! Values are read once from the environment (after `.env` has been loaded by
//! the binary) and then shared for the whole lifetime of the process.
use std::{env, fmt::Display, str::FromStr, sync::OnceLock};

use log::{trace, warn};

/// Default collection holding the public projection of news items.
pub const DEFAULT_FIRESTORE_COLLECTION: &str = "news_items";

pub const DEFAULT_FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Number of items returned by list operations when the caller does not ask
/// for a specific amount.
pub const DEFAULT_NEWS_LIMIT: i64 = 20;
pub const MAX_NEWS_LIMIT: i64 = 100;

pub mod ext {
    pub const JPEG: &str = "jpg";
    pub const PNG: &str = "png";
    pub const GIF: &str = "gif";
    pub const PDF: &str = "pdf";
    pub const DOC: &str = "doc";
    pub const DOCX: &str = "docx";
    pub const MP4: &str = "mp4";
    pub const WEBM: &str = "webm";
}

#[derive(Debug, Clone)]
pub struct Configurables {
    pub database_url: String,
    pub db_max_connections: u32,

    /// Location of the object store (`s3://bucket`, `file:///path` or `memory://`).
    pub store_url: String,
    /// Base URL used to build public links to stored objects. When missing it is
    /// derived from the store location.
    pub store_public_url: Option<String>,
    pub aws_region: String,
    pub presign_default_minutes: u32,

    pub firestore_project: String,
    pub firestore_collection: String,
    pub firestore_token: Option<String>,
    /// Path of a service-account key file, application default credentials
    /// are used when missing.
    pub firestore_credentials: Option<String>,
    pub firestore_emulator_host: Option<String>,

    pub http_timeout_secs: u64,
}

impl Configurables {
    fn from_env() -> Self {
        Self {
            database_url: var("NEWSD_DATABASE_URL")
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "postgres://localhost/newsd".to_owned()),
            db_max_connections: parse_or("NEWSD_DB_MAX_CONNECTIONS", 10),

            store_url: var("NEWSD_STORE_URL").unwrap_or_else(|| "memory://".to_owned()),
            store_public_url: var("NEWSD_STORE_PUBLIC_URL"),
            aws_region: var("AWS_REGION").unwrap_or_else(|| "eu-north-1".to_owned()),
            presign_default_minutes: parse_or("NEWSD_PRESIGN_DEFAULT_MINUTES", 60),

            firestore_project: var("NEWSD_FIRESTORE_PROJECT").unwrap_or_default(),
            firestore_collection: var("NEWSD_FIRESTORE_COLLECTION")
                .unwrap_or_else(|| DEFAULT_FIRESTORE_COLLECTION.to_owned()),
            firestore_token: var("NEWSD_FIRESTORE_TOKEN"),
            firestore_credentials: var("NEWSD_FIRESTORE_CREDENTIALS"),
            firestore_emulator_host: var("FIRESTORE_EMULATOR_HOST"),

            http_timeout_secs: parse_or("NEWSD_HTTP_TIMEOUT_SECS", 10),
        }
    }
}

static CONFIGURABLES: OnceLock<Configurables> = OnceLock::new();

pub fn configurables() -> &'static Configurables {
    CONFIGURABLES.get_or_init(Configurables::from_env)
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        Some(value) => value.parse().unwrap_or_else(|e| {
            warn!("invalid {key} value `{value}` ({e}), using default {default}");
            default
        }),
        None => {
            trace!("{key} not set, using default {default}");
            default
        }
    }
}
