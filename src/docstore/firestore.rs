//! Cloud Firestore client speaking the REST v1 API.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use log::{debug, info, trace, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::value::{self, Fields, RawFields};
use super::{DocumentStore, Error, NewsDocument};
use crate::params;

/// Bearer token accepted by the Firestore emulator, it bypasses security rules.
const EMULATOR_TOKEN: &str = "owner";

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// Taken from the credentials when empty.
    pub project_id: String,
    pub collection: String,
    /// OAuth2 access token, sent as is. It is never refreshed.
    pub access_token: Option<String>,
    /// Service-account key file used to mint access tokens.
    pub credentials_file: Option<PathBuf>,
    /// `host:port` of a local emulator, replaces the public endpoint.
    pub emulator_host: Option<String>,
    pub timeout: Duration,
}

impl FirestoreConfig {
    pub fn from_configurables(conf: &params::Configurables) -> Self {
        Self {
            project_id: conf.firestore_project.clone(),
            collection: conf.firestore_collection.clone(),
            access_token: conf.firestore_token.clone(),
            credentials_file: conf.firestore_credentials.as_ref().map(PathBuf::from),
            emulator_host: conf.firestore_emulator_host.clone(),
            timeout: Duration::from_secs(conf.http_timeout_secs),
        }
    }

    fn base_url(&self) -> String {
        match &self.emulator_host {
            Some(host) => format!("http://{host}/v1"),
            None => params::DEFAULT_FIRESTORE_BASE_URL.to_owned(),
        }
    }

    /// Resource name of the database documents root, as used inside payloads.
    fn documents_name(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }
}

/// How requests are authorized.
#[derive(Clone)]
enum Auth {
    Bearer(String),
    /// Tokens are cached by the provider and refreshed before they expire.
    Provider(Arc<dyn TokenProvider>),
}

impl Auth {
    async fn resolve(config: &FirestoreConfig) -> Result<Self, Error> {
        if let Some(token) = &config.access_token {
            debug!("firestore authenticates with a static access token");
            return Ok(Self::Bearer(token.clone()));
        }
        if config.emulator_host.is_some() {
            return Ok(Self::Bearer(EMULATOR_TOKEN.to_owned()));
        }
        if let Some(path) = &config.credentials_file {
            debug!("firestore authenticates with service account `{}`", path.display());
            return Ok(Self::Provider(Arc::new(CustomServiceAccount::from_file(path)?)));
        }

        debug!("firestore authenticates with application default credentials");
        Ok(Self::Provider(gcp_auth::provider().await?))
    }
}

/// Document as sent on writes.
#[derive(Debug, Serialize)]
struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    fields: Fields,
}

/// Document as returned by reads. Field values are kept raw, see
/// [`value::decode`].
#[derive(Debug, Deserialize)]
struct StoredDocument {
    #[serde(default)]
    name: String,
    #[serde(default)]
    fields: RawFields,
}

#[derive(Debug, Serialize)]
struct Write {
    update: Document,
}

#[derive(Debug, Serialize)]
struct CommitRequest {
    writes: Vec<Write>,
}

#[derive(Debug, Deserialize)]
struct RunQueryResponseItem {
    document: Option<StoredDocument>,
}

/// Handle to a Firestore collection. Cloning shares the underlying HTTP
/// connection pool and the token cache.
#[derive(Clone)]
pub struct Firestore {
    client: Client,
    config: FirestoreConfig,
    base_url: String,
    auth: Auth,
}

impl Firestore {
    pub async fn open(mut config: FirestoreConfig) -> Result<Self, Error> {
        if config.collection.is_empty() {
            return Err(Error::ConfigError("missing firestore collection".to_owned()));
        }

        let auth = Auth::resolve(&config).await?;
        if config.project_id.is_empty() {
            match &auth {
                Auth::Provider(provider) => {
                    config.project_id = provider.project_id().await?.to_string();
                }
                Auth::Bearer(_) => {
                    return Err(Error::ConfigError("missing firestore project id".to_owned()));
                }
            }
        }

        let client = Client::builder().timeout(config.timeout).build()?;
        let base_url = config.base_url();

        info!(
            "firestore client ready (project: {}, collection: {}, endpoint: {})",
            config.project_id, config.collection, base_url
        );

        Ok(Self {
            client,
            config,
            base_url,
            auth,
        })
    }

    /// Releases the client. Requests still in flight on clones are not affected.
    pub fn close(self) {
        debug!("closing firestore client for project {}", self.config.project_id);
    }

    fn document_name(&self, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.documents_name(),
            self.config.collection,
            id
        )
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, self.document_name(id))
    }

    fn documents_url(&self, method: &str) -> String {
        format!("{}/{}:{}", self.base_url, self.config.documents_name(), method)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, Error> {
        match &self.auth {
            Auth::Bearer(token) => Ok(request.bearer_auth(token)),
            Auth::Provider(provider) => {
                let token = provider.token(&[DATASTORE_SCOPE]).await?;
                Ok(request.bearer_auth(token.as_str()))
            }
        }
    }
}

async fn check_status(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::BadStatus { status, body })
}

fn id_from_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[async_trait]
impl DocumentStore for Firestore {
    async fn upsert(&self, doc: &NewsDocument) -> Result<(), Error> {
        trace!("upserting document `{}`", doc.id);

        let body = Document {
            name: None,
            fields: value::encode(doc),
        };

        let response = self
            .authorize(self.client.patch(self.document_url(&doc.id)))
            .await?
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;

        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), Error> {
        trace!("removing document `{id}`");

        let response = self
            .authorize(self.client.delete(self.document_url(id)))
            .await?
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("document `{id}` already absent");
            return Ok(());
        }
        check_status(response).await?;

        Ok(())
    }

    async fn commit(&self, docs: &[NewsDocument]) -> Result<(), Error> {
        if docs.is_empty() {
            trace!("nothing to commit");
            return Ok(());
        }

        let request = CommitRequest {
            writes: docs
                .iter()
                .map(|doc| Write {
                    update: Document {
                        name: Some(self.document_name(&doc.id)),
                        fields: value::encode(doc),
                    },
                })
                .collect(),
        };

        let response = self
            .authorize(self.client.post(self.documents_url("commit")))
            .await?
            .json(&request)
            .send()
            .await?;
        check_status(response).await?;

        debug!("committed {} documents", docs.len());
        Ok(())
    }

    async fn query(&self, limit: usize, breaking_only: bool) -> Result<Vec<NewsDocument>, Error> {
        let mut structured_query = json!({
            "from": [{ "collectionId": self.config.collection }],
            "orderBy": [
                { "field": { "fieldPath": "priority" }, "direction": "DESCENDING" },
                { "field": { "fieldPath": "publishedAt" }, "direction": "DESCENDING" },
            ],
            "limit": limit,
        });
        if breaking_only {
            structured_query["where"] = json!({
                "fieldFilter": {
                    "field": { "fieldPath": "isBreaking" },
                    "op": "EQUAL",
                    "value": { "booleanValue": true },
                }
            });
        }

        let response = self
            .authorize(self.client.post(self.documents_url("runQuery")))
            .await?
            .json(&json!({ "structuredQuery": structured_query }))
            .send()
            .await?;
        let items: Vec<RunQueryResponseItem> = check_status(response).await?.json().await?;

        let mut docs = Vec::with_capacity(items.len());
        for document in items.into_iter().filter_map(|item| item.document) {
            let id = id_from_name(&document.name);
            match value::decode(id, &document.fields) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!("skipping document `{id}`: {e}"),
            }
        }

        Ok(docs)
    }
}
