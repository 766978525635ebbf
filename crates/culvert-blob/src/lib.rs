//! # culvert-blob
//!
//! Time-limited signed URLs for the robot's photo bucket, plus `gs://`
//! locator parsing. The [`BlobStore`] trait is the seam the enrichment
//! pipeline and the storage glue consume; [`UrlSigner`] is the default
//! implementation issuing expiring query-signed URLs.

#![deny(unsafe_code)]

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from locator parsing or URL issuance.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid gcs uri: {0}")]
    InvalidUri(String),
    #[error("no signing key configured")]
    MissingKey,
}

/// A parsed `gs://bucket/object` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsUri {
    pub bucket: String,
    pub object: String,
}

impl GsUri {
    /// Split `gs://bucket/path/to/object` into bucket and object.
    pub fn parse(uri: &str) -> Result<Self, BlobError> {
        let rest = uri
            .strip_prefix("gs://")
            .ok_or_else(|| BlobError::InvalidUri(uri.to_string()))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| BlobError::InvalidUri(uri.to_string()))?;
        if bucket.is_empty() || object.is_empty() {
            return Err(BlobError::InvalidUri(uri.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }
}

impl fmt::Display for GsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.object)
    }
}

/// Issues time-limited signed URLs against the photo bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Signed GET URL valid for `ttl`.
    async fn signed_download_url(
        &self,
        bucket: &str,
        object: &str,
        ttl: Duration,
    ) -> Result<String, BlobError>;

    /// Signed PUT URL valid for `ttl`, bound to a content type.
    async fn signed_upload_url(
        &self,
        bucket: &str,
        object: &str,
        ttl: Duration,
        content_type: &str,
    ) -> Result<String, BlobError>;
}

/// Query-signed URL issuer.
///
/// Signs `method|bucket|object|expiry` with a deployment key. The storage
/// fronting layer validates the same digest; the exact signature scheme is
/// its contract, not this crate's.
pub struct UrlSigner {
    key: Vec<u8>,
    host: String,
}

impl UrlSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            host: "https://storage.googleapis.com".to_string(),
        }
    }

    /// Override the storage host (tests, regional endpoints).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn sign(&self, method: &str, bucket: &str, object: &str, expires_at: i64) -> Result<String, BlobError> {
        if self.key.is_empty() {
            return Err(BlobError::MissingKey);
        }
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update(method.as_bytes());
        hasher.update(b"|");
        hasher.update(bucket.as_bytes());
        hasher.update(b"|");
        hasher.update(object.as_bytes());
        hasher.update(b"|");
        hasher.update(expires_at.to_string().as_bytes());
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize()))
    }

    fn build(&self, method: &str, bucket: &str, object: &str, ttl: Duration) -> Result<String, BlobError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = chrono::Utc::now().timestamp().saturating_add(ttl_secs);
        let signature = self.sign(method, bucket, object, expires_at)?;
        Ok(format!(
            "{}/{}/{}?X-Goog-Expires={}&X-Goog-Signature={}",
            self.host,
            bucket,
            object,
            expires_at,
            signature
        ))
    }
}

#[async_trait]
impl BlobStore for UrlSigner {
    async fn signed_download_url(
        &self,
        bucket: &str,
        object: &str,
        ttl: Duration,
    ) -> Result<String, BlobError> {
        self.build("GET", bucket, object, ttl)
    }

    async fn signed_upload_url(
        &self,
        bucket: &str,
        object: &str,
        ttl: Duration,
        content_type: &str,
    ) -> Result<String, BlobError> {
        let url = self.build("PUT", bucket, object, ttl)?;
        Ok(format!("{url}&X-Goog-Content-Type={content_type}"))
    }
}
