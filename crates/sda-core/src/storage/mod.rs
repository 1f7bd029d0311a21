//! Object-store abstraction.
//!
//! The [`ObjectStore`] trait is the seam between the blob gateway and a
//! concrete backend (S3 over HTTP in the server crate, in-memory here).
//! Implementations never stream file bytes on behalf of a caller: uploads
//! and downloads go through the pre-signed URLs they issue.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// HTTP method a pre-signed URL authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresignMethod {
    Get,
    Put,
    Head,
}

impl PresignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresignMethod::Get => "GET",
            PresignMethod::Put => "PUT",
            PresignMethod::Head => "HEAD",
        }
    }
}

/// A bucket/key store reachable over the network.
///
/// All methods may suspend on I/O; failures to reach the backend are
/// reported as `StoreUnavailable`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create `bucket`. Creating a bucket that already exists succeeds.
    async fn create_bucket(&self, bucket: &str) -> Result<()>;

    async fn object_exists(&self, bucket: &str, object_name: &str) -> Result<bool>;

    /// Build a URL authorizing one `method` request on the key for `ttl`.
    /// Pure computation; no request is made.
    fn presign(
        &self,
        method: PresignMethod,
        bucket: &str,
        object_name: &str,
        ttl: Duration,
    ) -> Result<String>;
}
