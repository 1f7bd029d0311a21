//! In-memory [`ObjectStore`] for tests and local development.
//!
//! Pre-signed URLs have the form
//! `memory://<bucket>/<key>?method=<METHOD>&expires=<unix>` and can be
//! redeemed with [`InMemoryObjectStore::upload`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SdaError};

use super::{ObjectStore, PresignMethod};

/// In-memory object store; buckets map keys to bytes.
pub struct InMemoryObjectStore {
    buckets: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
    unavailable: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SdaError::StoreUnavailable("object store is unreachable".into()));
        }
        Ok(())
    }

    /// Store `bytes` directly. The bucket must exist.
    pub fn put_object(&self, bucket: &str, object_name: &str, bytes: &[u8]) -> Result<()> {
        self.check_available()?;
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| SdaError::not_found("bucket", bucket))?;
        objects.insert(object_name.to_string(), bytes.to_vec());
        Ok(())
    }

    pub fn get_object(&self, bucket: &str, object_name: &str) -> Option<Vec<u8>> {
        let buckets = self.buckets.read().ok()?;
        buckets.get(bucket)?.get(object_name).cloned()
    }

    /// Redeem a pre-signed PUT URL, the way an HTTP client would.
    pub fn upload(&self, url: &str, bytes: &[u8]) -> Result<()> {
        let (method, bucket, key, expires) = parse_memory_url(url)?;
        if method != "PUT" {
            return Err(SdaError::Forbidden(format!("URL authorizes {method}, not PUT")));
        }
        if chrono::Utc::now().timestamp() > expires {
            return Err(SdaError::Forbidden("pre-signed URL expired".into()));
        }
        self.put_object(&bucket, &key, bytes)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> SdaError {
    SdaError::Internal("object store lock poisoned".into())
}

fn parse_memory_url(url: &str) -> Result<(String, String, String, i64)> {
    let bad = || SdaError::InvalidArgument(format!("not an in-memory URL: {url}"));
    let rest = url.strip_prefix("memory://").ok_or_else(bad)?;
    let (path, query) = rest.split_once('?').ok_or_else(bad)?;
    let (bucket, key) = path.split_once('/').ok_or_else(bad)?;
    let mut method = None;
    let mut expires = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("method", m)) => method = Some(m.to_string()),
            Some(("expires", e)) => expires = e.parse::<i64>().ok(),
            _ => {}
        }
    }
    Ok((
        method.ok_or_else(bad)?,
        bucket.to_string(),
        key.to_string(),
        expires.ok_or_else(bad)?,
    ))
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.check_available()?;
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.check_available()?;
        let mut buckets = self.buckets.write().map_err(poisoned)?;
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, object_name: &str) -> Result<bool> {
        self.check_available()?;
        let buckets = self.buckets.read().map_err(poisoned)?;
        Ok(buckets
            .get(bucket)
            .map(|objects| objects.contains_key(object_name))
            .unwrap_or(false))
    }

    fn presign(
        &self,
        method: PresignMethod,
        bucket: &str,
        object_name: &str,
        ttl: Duration,
    ) -> Result<String> {
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!(
            "memory://{}/{}?method={}&expires={}",
            bucket,
            object_name,
            method.as_str(),
            expires
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn presigned_put_round_trip() {
        let store = InMemoryObjectStore::new();
        store.create_bucket("alice").await.unwrap();
        let url = store
            .presign(PresignMethod::Put, "alice", "docs/a.txt", Duration::from_secs(60))
            .unwrap();
        store.upload(&url, b"hello").unwrap();
        assert!(store.object_exists("alice", "docs/a.txt").await.unwrap());
        assert_eq!(store.get_object("alice", "docs/a.txt").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_url_cannot_upload() {
        let store = InMemoryObjectStore::new();
        store.create_bucket("alice").await.unwrap();
        let url = store
            .presign(PresignMethod::Get, "alice", "a", Duration::from_secs(60))
            .unwrap();
        assert!(store.upload(&url, b"x").is_err());
    }

    #[tokio::test]
    async fn create_bucket_is_idempotent() {
        let store = InMemoryObjectStore::new();
        store.create_bucket("b").await.unwrap();
        store.put_object("b", "k", b"1").unwrap();
        store.create_bucket("b").await.unwrap();
        assert!(store.object_exists("b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryObjectStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.bucket_exists("b").await,
            Err(SdaError::StoreUnavailable(_))
        ));
    }
}
