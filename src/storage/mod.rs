//! Object storage behind signed upload URLs
//!
//! [`HttpObjectStore`] performs the real PUT. [`MemoryBucket`] is an
//! in-process bucket that also issues the signed URLs it accepts, so the
//! whole initiate -> transfer -> complete sequence can run without a cloud
//! account.

use crate::error::{RecordError, TransferError};
use async_trait::async_trait;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Writes object bytes to a signed upload URL
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Single all-or-nothing PUT of `body` to `url`
    async fn put(&self, url: &str, body: Vec<u8>, content_type: &str) -> Result<(), TransferError>;
}

/// Issues time-limited write URLs and resolves public read locations
pub trait SignedUrlIssuer: Send + Sync {
    fn signed_put_url(
        &self,
        object_path: &str,
        content_type: &str,
        valid_for: Duration,
    ) -> Result<String, RecordError>;

    /// Public read location: `{public_base}/{bucket}/{object_path}`
    fn public_url(&self, object_path: &str) -> String;
}

/// Signed-URL PUT over HTTP
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, url: &str, body: Vec<u8>, content_type: &str) -> Result<(), TransferError> {
        let url = Url::parse(url).map_err(|e| TransferError::InvalidSlot(e.to_string()))?;
        let size = body.len();

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| TransferError::Transport(e.to_string()))?;

        let status = response.status();
        // Body is kept for diagnostics either way
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(status = status.as_u16(), bytes = size, "Transfer accepted");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Grant {
    object_path: String,
    content_type: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// In-process bucket with its own signed URL scheme
///
/// Signed URLs look like `memory://{bucket}/{path}?token={uuid}` and stay
/// valid until they expire; objects are readable through
/// [`SignedUrlIssuer::public_url`].
#[derive(Debug)]
pub struct MemoryBucket {
    name: String,
    public_base: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    grants: Mutex<HashMap<String, Grant>>,
}

impl MemoryBucket {
    pub fn new(name: impl Into<String>, public_base: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
            grants: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Object stored under `object_path`
    pub fn object(&self, object_path: &str) -> Option<StoredObject> {
        self.objects.lock().ok()?.get(object_path).cloned()
    }

    /// Read back an object through its public URL
    pub fn get(&self, public_url: &str) -> Option<Vec<u8>> {
        let prefix = format!("{}/{}/", self.public_base, self.name);
        let object_path = public_url.strip_prefix(&prefix)?;
        self.object(object_path).map(|object| object.bytes)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|objects| objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forbidden(reason: &str) -> TransferError {
        TransferError::Status {
            status: 403,
            body: reason.to_string(),
        }
    }
}

impl SignedUrlIssuer for MemoryBucket {
    fn signed_put_url(
        &self,
        object_path: &str,
        content_type: &str,
        valid_for: Duration,
    ) -> Result<String, RecordError> {
        let token = uuid::Uuid::new_v4().to_string();
        let grant = Grant {
            object_path: object_path.to_string(),
            content_type: content_type.to_string(),
            expires_at: Instant::now() + valid_for,
        };

        self.grants
            .lock()
            .map_err(|_| RecordError::Unavailable("bucket grants poisoned".to_string()))?
            .insert(token.clone(), grant);

        Ok(format!("memory://{}/{}?token={}", self.name, object_path, token))
    }

    fn public_url(&self, object_path: &str) -> String {
        format!("{}/{}/{}", self.public_base, self.name, object_path)
    }
}

#[async_trait]
impl ObjectStore for MemoryBucket {
    async fn put(&self, url: &str, body: Vec<u8>, content_type: &str) -> Result<(), TransferError> {
        let url = Url::parse(url).map_err(|e| TransferError::InvalidSlot(e.to_string()))?;
        if url.scheme() != "memory" || url.host_str() != Some(self.name.as_str()) {
            return Err(TransferError::InvalidSlot(format!(
                "not a URL for bucket '{}'",
                self.name
            )));
        }

        let token = url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| Self::forbidden("MissingToken"))?;

        let grant = self
            .grants
            .lock()
            .map_err(|_| TransferError::Transport("bucket grants poisoned".to_string()))?
            .get(&token)
            .cloned()
            .ok_or_else(|| Self::forbidden("InvalidToken"))?;

        if Instant::now() >= grant.expires_at {
            return Err(Self::forbidden("ExpiredToken"));
        }
        if grant.content_type != content_type {
            return Err(Self::forbidden("SignatureDoesNotMatch"));
        }
        if url.path().trim_start_matches('/') != grant.object_path {
            return Err(Self::forbidden("SignatureDoesNotMatch"));
        }

        self.objects
            .lock()
            .map_err(|_| TransferError::Transport("bucket objects poisoned".to_string()))?
            .insert(
                grant.object_path,
                StoredObject {
                    bytes: body,
                    content_type: content_type.to_string(),
                },
            );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OCTET: &str = "application/octet-stream";

    #[tokio::test]
    async fn test_put_and_read_back() {
        let bucket = MemoryBucket::new("agreements", "https://storage.example");
        let url = bucket
            .signed_put_url("eulas/1-abc", OCTET, Duration::from_secs(3600))
            .unwrap();
        assert!(url.starts_with("memory://agreements/eulas/1-abc?token="));

        bucket.put(&url, b"terms".to_vec(), OCTET).await.unwrap();

        let public = bucket.public_url("eulas/1-abc");
        assert_eq!(public, "https://storage.example/agreements/eulas/1-abc");
        assert_eq!(bucket.get(&public).unwrap(), b"terms");
        assert_eq!(bucket.object("eulas/1-abc").unwrap().content_type, OCTET);
    }

    #[tokio::test]
    async fn test_signed_url_is_reusable_until_expiry() {
        let bucket = MemoryBucket::new("agreements", "https://storage.example");
        let url = bucket
            .signed_put_url("eulas/1-abc", OCTET, Duration::from_secs(3600))
            .unwrap();

        bucket.put(&url, b"first".to_vec(), OCTET).await.unwrap();
        bucket.put(&url, b"second".to_vec(), OCTET).await.unwrap();
        assert_eq!(bucket.object("eulas/1-abc").unwrap().bytes, b"second");
        assert_eq!(bucket.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_url_is_forbidden() {
        let bucket = MemoryBucket::new("agreements", "https://storage.example");
        let url = bucket
            .signed_put_url("eulas/1-abc", OCTET, Duration::ZERO)
            .unwrap();

        let err = bucket.put(&url, b"x".to_vec(), OCTET).await.unwrap_err();
        assert_eq!(
            err,
            TransferError::Status {
                status: 403,
                body: "ExpiredToken".to_string()
            }
        );
        assert!(bucket.is_empty());
    }

    #[tokio::test]
    async fn test_content_type_must_match_grant() {
        let bucket = MemoryBucket::new("agreements", "https://storage.example");
        let url = bucket
            .signed_put_url("eulas/1-abc", OCTET, Duration::from_secs(60))
            .unwrap();

        let err = bucket.put(&url, b"x".to_vec(), "text/plain").await.unwrap_err();
        assert!(matches!(err, TransferError::Status { status: 403, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unknown_token_and_foreign_bucket() {
        let bucket = MemoryBucket::new("agreements", "https://storage.example");

        let err = bucket
            .put("memory://agreements/eulas/1?token=nope", vec![], OCTET)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Status { status: 403, .. }));

        let err = bucket
            .put("memory://other/eulas/1?token=nope", vec![], OCTET)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidSlot(_)));

        let err = bucket.put("not a url", vec![], OCTET).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidSlot(_)));
    }

    #[test]
    fn test_get_rejects_foreign_url() {
        let bucket = MemoryBucket::new("agreements", "https://storage.example/");
        assert!(bucket.get("https://elsewhere.example/agreements/x").is_none());
        assert_eq!(
            bucket.public_url("x"),
            "https://storage.example/agreements/x"
        );
    }
}
