//! Blob storage for raw uploads
//!
//! Objects live at `documents/{ownerId}/{documentId}/{fileName}`. The path is
//! reconstructed from the document record, never stored. Clients move bytes
//! through time-limited signed URLs served by the gateway's `/storage` route.

use crate::config::{StorageBackend, StorageConfig};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Object path of a document's raw upload
pub fn blob_path(owner_id: &str, document_id: Uuid, file_name: &str) -> String {
    format!("documents/{}/{}/{}", owner_id, document_id, file_name)
}

fn file_name_pattern() -> Option<&'static regex_lite::Regex> {
    static PATTERN: OnceLock<Option<regex_lite::Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| regex_lite::Regex::new(r"^[^/\\\x00-\x1f]{1,255}$").ok())
        .as_ref()
}

/// A file name must be a single path segment
pub fn is_valid_file_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && file_name_pattern().map_or(false, |re| re.is_match(name))
}

fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UrlMethod {
    Put,
    Get,
}

impl UrlMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlMethod::Put => "PUT",
            UrlMethod::Get => "GET",
        }
    }
}

/// A time-limited capability for one object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub method: UrlMethod,
    pub expires_at: DateTime<Utc>,
}

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies storage URLs with HMAC-SHA256 over a shared secret
#[derive(Clone)]
pub struct UrlSigner {
    key: HmacSha256,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: &str, base_url: &str) -> Result<Self> {
        let key = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| AppError::Configuration {
            message: format!("invalid URL signing secret: {}", e),
        })?;
        Ok(Self {
            key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// MAC over `METHOD\npath\nexpires`
    fn mac(&self, method: UrlMethod, path: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.key.clone();
        mac.update(format!("{}\n{}\n{}", method.as_str(), path, expires).as_bytes());
        mac
    }

    fn digest(&self, method: UrlMethod, path: &str, expires: i64) -> String {
        hex::encode(self.mac(method, path, expires).finalize().into_bytes())
    }

    pub fn sign(&self, method: UrlMethod, path: &str, ttl: Duration) -> SignedUrl {
        let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);
        let expires = expires_at.timestamp();
        let signature = self.digest(method, path, expires);
        let encoded: Vec<String> = path.split('/').map(encode_segment).collect();
        SignedUrl {
            url: format!(
                "{}/storage/{}?method={}&expires={}&signature={}",
                self.base_url,
                encoded.join("/"),
                method.as_str(),
                expires,
                signature
            ),
            method,
            expires_at,
        }
    }

    /// Check a presented signature for `path`, already percent-decoded
    pub fn verify(&self, method: UrlMethod, path: &str, expires: i64, signature: &str) -> Result<()> {
        if expires < Utc::now().timestamp() {
            return Err(AppError::InvalidSignature);
        }
        let presented = hex::decode(signature).map_err(|_| AppError::InvalidSignature)?;
        self.mac(method, path, expires)
            .verify_slice(&presented)
            .map_err(|_| AppError::InvalidSignature)
    }
}

fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Fails with `OBJECT_NOT_FOUND` when absent
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Returns false when the object was already absent
    async fn delete(&self, path: &str) -> Result<bool>;

    async fn exists(&self, path: &str) -> Result<bool>;

    fn signer(&self) -> &UrlSigner;

    fn upload_url(&self, path: &str, ttl: Duration) -> SignedUrl {
        self.signer().sign(UrlMethod::Put, path, ttl)
    }

    fn download_url(&self, path: &str, ttl: Duration) -> SignedUrl {
        self.signer().sign(UrlMethod::Get, path, ttl)
    }
}

/// Filesystem-backed blob store
pub struct FsBlobStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if !is_safe_path(path) {
            return Err(AppError::ObjectNotFound {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        tracing::debug!(path = %path, "Blob written");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::ObjectNotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}

/// In-memory blob store for tests and demos
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    signer: UrlSigner,
}

impl MemoryBlobStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            signer,
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<()> {
        if !is_safe_path(path) {
            return Err(AppError::ObjectNotFound {
                path: path.to_string(),
            });
        }
        self.objects.write().await.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::ObjectNotFound {
                path: path.to_string(),
            })
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.objects.write().await.remove(path).is_some())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(path))
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}

/// Create a blob store based on configuration
pub fn create_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    let signer = UrlSigner::new(&config.signing_secret, &config.public_base_url)?;
    Ok(match config.backend {
        StorageBackend::Fs => {
            tracing::info!(root = %config.root, "Using filesystem blob store");
            Arc::new(FsBlobStore::new(&config.root, signer))
        }
        StorageBackend::Memory => {
            tracing::info!("Using in-memory blob store");
            Arc::new(MemoryBlobStore::new(signer))
        }
    })
}
