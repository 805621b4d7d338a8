//! Optional shared cache tier: object storage plus a metadata record per key.
//!
//! Metadata and objects are written separately and can drift apart, so a
//! lookup only trusts a metadata record after confirming its object exists.

use super::key::CacheKey;
use crate::tts::AudioFormat;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Metadata stored alongside each remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub key: String,
    pub object_path: String,
    pub voice: String,
    pub model: String,
    pub speed: f32,
    pub format: AudioFormat,
    pub size_bytes: u64,
    pub created_at_ms: u64,
}

#[async_trait]
pub trait RemoteCacheTier: Send + Sync {
    /// Public URL of the cached audio, or `None` on a miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<String>>;
    /// Upload audio and its metadata record, returning the public URL.
    async fn put(&self, key: &CacheKey, bytes: Bytes, metadata: RemoteMetadata) -> Result<String>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn get(&self, path: &str) -> Result<Option<Bytes>>;
    async fn delete(&self, path: &str) -> Result<()>;
    fn public_url(&self, path: &str) -> String;
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RemoteMetadata>>;
    async fn put(&self, record: &RemoteMetadata) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Remote tier built from an object store and a metadata store.
pub struct ObjectStoreCache<O, M> {
    objects: O,
    metadata: M,
    prefix: String,
}

impl<O: ObjectStore, M: MetadataStore> ObjectStoreCache<O, M> {
    pub fn new(objects: O, metadata: M) -> Self {
        Self {
            objects,
            metadata,
            prefix: "tts-audio".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    fn object_path(&self, key: &CacheKey, format: AudioFormat) -> String {
        format!("{}/{}.{}", self.prefix, key.as_str(), format.extension())
    }
}

#[async_trait]
impl<O: ObjectStore, M: MetadataStore> RemoteCacheTier for ObjectStoreCache<O, M> {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>> {
        let Some(record) = self.metadata.get(key.as_str()).await? else {
            return Ok(None);
        };
        if !self.objects.exists(&record.object_path).await? {
            debug!(cache_key = %key, path = %record.object_path, "remote metadata without object, dropping record");
            self.metadata.delete(key.as_str()).await?;
            return Ok(None);
        }
        Ok(Some(self.objects.public_url(&record.object_path)))
    }

    async fn put(&self, key: &CacheKey, bytes: Bytes, mut metadata: RemoteMetadata) -> Result<String> {
        let path = self.object_path(key, metadata.format);
        self.objects
            .put(&path, bytes, metadata.format.mime_type())
            .await?;
        metadata.key = key.hash.clone();
        metadata.object_path = path.clone();
        self.metadata.put(&metadata).await?;
        Ok(self.objects.public_url(&path))
    }

    fn name(&self) -> &'static str {
        "object_store"
    }
}

/// Object store speaking plain HTTP (`PUT`/`HEAD`/`GET`/`DELETE`) against a
/// bucket base URL, as exposed by most S3-compatible gateways.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: url::Url,
    public_base_url: url::Url,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = parse_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            public_base_url: base_url.clone(),
            base_url,
            token,
        })
    }

    /// Serve public URLs from a different host (e.g. a CDN in front of the bucket).
    pub fn with_public_base_url(mut self, url: &str) -> Result<Self> {
        self.public_base_url = parse_base_url(url)?;
        Ok(self)
    }

    fn url(&self, path: &str) -> Result<url::Url> {
        self.base_url.join(path.trim_start_matches('/')).map_err(|e| {
            Error::validation_with_context(
                format!("invalid object path: {}", e),
                ErrorContext::new().with_details(path.to_string()).with_source("http_object_store"),
            )
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.authorized(req).send().await.map_err(|e| {
            Error::network_with_context(
                format!("object store request failed: {}", e),
                ErrorContext::new().with_source("http_object_store"),
            )
        })
    }
}

fn parse_base_url(raw: &str) -> Result<url::Url> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    url::Url::parse(&normalized)
        .map_err(|e| Error::configuration(format!("invalid object store URL '{}': {}", raw, e)))
}

async fn error_for(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Error::from_status(status, body, None, None)
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        let req = self
            .client
            .put(self.url(path)?)
            .header("content-type", content_type)
            .body(bytes);
        let resp = self.send(req).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(error_for(resp).await)
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resp = self.send(self.client.head(self.url(path)?)).await?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(error_for(resp).await),
        }
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        let resp = self.send(self.client.get(self.url(path)?)).await?;
        match resp.status().as_u16() {
            200..=299 => resp.bytes().await.map(Some).map_err(|e| {
                Error::network(format!("failed to read object body: {}", e))
            }),
            404 => Ok(None),
            _ => Err(error_for(resp).await),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self.send(self.client.delete(self.url(path)?)).await?;
        match resp.status().as_u16() {
            200..=299 | 404 => Ok(()),
            _ => Err(error_for(resp).await),
        }
    }

    fn public_url(&self, path: &str) -> String {
        self.public_base_url
            .join(path.trim_start_matches('/'))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.public_base_url, path))
    }
}

/// Stores metadata records as JSON objects under `meta/<key>.json` in an
/// object store.
pub struct ObjectMetadataStore<O> {
    objects: O,
}

impl<O: ObjectStore> ObjectMetadataStore<O> {
    pub fn new(objects: O) -> Self {
        Self { objects }
    }

    fn path(key: &str) -> String {
        format!("meta/{}.json", key)
    }
}

#[async_trait]
impl<O: ObjectStore> MetadataStore for ObjectMetadataStore<O> {
    async fn get(&self, key: &str) -> Result<Option<RemoteMetadata>> {
        match self.objects.get(&Self::path(key)).await? {
            Some(raw) => match serde_json::from_slice(&raw) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    debug!(cache_key = key, error = %e, "unreadable remote metadata, treating as miss");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn put(&self, record: &RemoteMetadata) -> Result<()> {
        let body = serde_json::to_vec(record)?;
        self.objects
            .put(&Self::path(&record.key), Bytes::from(body), "application/json")
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.delete(&Self::path(key)).await
    }
}

/// In-process object store, useful for tests and single-device setups.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
    base_url: String,
}

impl MemoryObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(source: &str) -> Error {
    Error::runtime_with_context("lock poisoned", ErrorContext::new().with_source(source))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, bytes: Bytes, _content_type: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned("memory_object_store"))?
            .insert(path.to_string(), bytes);
        Ok(())
    }
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .map_err(|_| poisoned("memory_object_store"))?
            .contains_key(path))
    }
    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self
            .objects
            .read()
            .map_err(|_| poisoned("memory_object_store"))?
            .get(path)
            .cloned())
    }
    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned("memory_object_store"))?
            .remove(path);
        Ok(())
    }
    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        (**self).put(path, bytes, content_type).await
    }
    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }
    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        (**self).get(path).await
    }
    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }
    fn public_url(&self, path: &str) -> String {
        (**self).public_url(path)
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    records: RwLock<HashMap<String, RemoteMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteMetadata>> {
        Ok(self
            .records
            .read()
            .map_err(|_| poisoned("memory_metadata_store"))?
            .get(key)
            .cloned())
    }
    async fn put(&self, record: &RemoteMetadata) -> Result<()> {
        self.records
            .write()
            .map_err(|_| poisoned("memory_metadata_store"))?
            .insert(record.key.clone(), record.clone());
        Ok(())
    }
    async fn delete(&self, key: &str) -> Result<()> {
        self.records
            .write()
            .map_err(|_| poisoned("memory_metadata_store"))?
            .remove(key);
        Ok(())
    }
}

#[async_trait]
impl<T: MetadataStore + ?Sized> MetadataStore for std::sync::Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<RemoteMetadata>> {
        (**self).get(key).await
    }
    async fn put(&self, record: &RemoteMetadata) -> Result<()> {
        (**self).put(record).await
    }
    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}
