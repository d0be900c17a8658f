//! Object storage for uploaded media.
//!
//! [`Store`] wraps an [`ObjectStore`] backend (S3 in production, local
//! filesystem or memory otherwise) and adds the operations needed by upload
//! handlers: content typed writes, public links and presigned links.
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use log::{debug, info, trace};
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload,
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, signer::Signer,
};
use url::Url;

use crate::params;

pub mod testing;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("object store error :: {0}")]
    ObjectStoreError(#[from] object_store::Error),
    #[error("invalid object key :: {0}")]
    BadKey(#[from] object_store::path::Error),
    #[error("invalid url :: {0}")]
    BadUrl(#[from] url::ParseError),
    #[error("unsupported store scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("operation not supported by this backend :: {0}")]
    Unsupported(&'static str),
    #[error("io error :: {0}")]
    IoError(#[from] std::io::Error),
}

pub type StoreRef = Arc<Store>;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct Store {
    inner: Arc<dyn ObjectStore>,
    /// Present only for backends able to produce presigned links.
    signer: Option<Arc<dyn Signer>>,
    /// Base of public links, always ends with `/`.
    public_base: Url,
    /// Whether the backend keeps object attributes (content type).
    keeps_attributes: bool,
    presign_default: Duration,
}

impl Store {
    /// Builds a store from a location url:
    /// * `s3://<bucket>`, credentials and region read from the `AWS_*` environment
    /// * `file:///<path>`, the directory is created if missing
    /// * `memory://`
    pub fn try_from_url(location: &str, conf: &params::Configurables) -> Result<Self, Error> {
        let url = Url::parse(location)?;
        let presign_default = Duration::from_secs(u64::from(conf.presign_default_minutes) * 60);

        let mut store = match url.scheme() {
            "s3" => {
                let bucket = url.host_str().unwrap_or_default().to_owned();
                let s3 = Arc::new(
                    AmazonS3Builder::from_env()
                        .with_bucket_name(&bucket)
                        .with_region(&conf.aws_region)
                        .build()?,
                );
                let public_base = Url::parse(&format!(
                    "https://{bucket}.s3.{}.amazonaws.com/",
                    conf.aws_region
                ))?;
                info!("using s3 bucket `{bucket}` ({})", conf.aws_region);

                Self {
                    inner: s3.clone(),
                    signer: Some(s3),
                    public_base,
                    keeps_attributes: true,
                    presign_default,
                }
            }
            "file" => {
                let root = url.path();
                std::fs::create_dir_all(root)?;
                info!("using local store at `{root}`");

                Self {
                    inner: Arc::new(LocalFileSystem::new_with_prefix(root)?),
                    signer: None,
                    public_base: with_trailing_slash(url.clone()),
                    keeps_attributes: false,
                    presign_default,
                }
            }
            "memory" => {
                info!("using in-memory store");
                Self::in_memory()
            }
            scheme => return Err(Error::UnsupportedScheme(scheme.to_owned())),
        };

        if let Some(public) = &conf.store_public_url {
            store.public_base = with_trailing_slash(Url::parse(public)?);
        }

        Ok(store)
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            signer: None,
            public_base: Url::parse("memory:///").expect("static url"),
            keeps_attributes: true,
            presign_default: Duration::from_secs(60 * 60),
        }
    }

    pub fn with_public_base(mut self, base: &str) -> Result<Self, Error> {
        self.public_base = with_trailing_slash(Url::parse(base)?);
        Ok(self)
    }

    /// Stores `data` under a generated key inside `folder` and returns its
    /// public link.
    pub async fn write(
        &self,
        data: Bytes,
        content_type: &str,
        folder: &str,
    ) -> Result<Url, Error> {
        let extension = extension_for_content_type(content_type)
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let name = format!(
            "{}_{}{}",
            Utc::now().timestamp(),
            uuid::Uuid::new_v4().simple(),
            extension
        );

        let folder = folder.trim_matches('/');
        let key = if folder.is_empty() {
            name
        } else {
            format!("{folder}/{name}")
        };

        self.write_at(&key, data, content_type).await
    }

    /// Stores `data` under `key`, replacing any previous object.
    pub async fn write_at(&self, key: &str, data: Bytes, content_type: &str) -> Result<Url, Error> {
        let path = Path::parse(key)?;
        trace!(
            "writing {} bytes to `{}` ({})",
            data.len(),
            path,
            content_type
        );

        let mut attributes = Attributes::new();
        if self.keeps_attributes {
            attributes.insert(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_owned()),
            );
        }
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.inner
            .put_opts(&path, PutPayload::from_bytes(data), opts)
            .await?;

        debug!("stored object `{path}`");
        self.public_url(path.as_ref())
    }

    /// Returns the object content together with its content type.
    pub async fn read(&self, key: &str) -> Result<(Bytes, String), Error> {
        let path = Path::parse(key)?;
        let result = self.inner.get(&path).await?;

        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|v| v.to_string())
            .unwrap_or_else(|| content_type_for_key(key).to_owned());
        let data = result.bytes().await?;

        trace!("read {} bytes from `{path}` ({content_type})", data.len());
        Ok((data, content_type))
    }

    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        let path = Path::parse(key)?;
        self.inner.delete(&path).await?;
        debug!("deleted object `{path}`");
        Ok(())
    }

    /// Keys of every object below `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let prefix = prefix.trim_matches('/');
        let prefix = if prefix.is_empty() {
            None
        } else {
            Some(Path::parse(prefix)?)
        };

        let mut keys: Vec<String> = self
            .inner
            .list(prefix.as_ref())
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();

        Ok(keys)
    }

    pub fn public_url(&self, key: &str) -> Result<Url, Error> {
        Ok(self.public_base.join(key.trim_start_matches('/'))?)
    }

    /// Time limited GET link. A missing or zero `expires_in` uses the
    /// configured default.
    pub async fn presigned_url(&self, key: &str, expires_in: Option<Duration>) -> Result<Url, Error> {
        let signer = self
            .signer
            .as_ref()
            .ok_or(Error::Unsupported("presigned urls"))?;

        let expires_in = expires_in
            .filter(|d| !d.is_zero())
            .unwrap_or(self.presign_default);
        let path = Path::parse(key)?;

        let url = signer
            .signed_url(reqwest::Method::GET, &path, expires_in)
            .await?;
        debug!(
            "generated presigned url for `{path}` (expires in {}s)",
            expires_in.as_secs()
        );

        Ok(url)
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Content type guessed from the key extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        params::ext::PNG => "image/png",
        params::ext::GIF => "image/gif",
        params::ext::PDF => "application/pdf",
        params::ext::DOC => "application/msword",
        params::ext::DOCX => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        params::ext::MP4 => "video/mp4",
        params::ext::WEBM => "video/webm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" => Some(params::ext::JPEG),
        "image/png" => Some(params::ext::PNG),
        "image/gif" => Some(params::ext::GIF),
        "application/pdf" => Some(params::ext::PDF),
        "application/msword" => Some(params::ext::DOC),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(params::ext::DOCX)
        }
        "video/mp4" => Some(params::ext::MP4),
        "video/webm" => Some(params::ext::WEBM),
        _ => None,
    }
}
