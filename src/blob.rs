//! Blob store gateway.
//!
//! Wraps an [`ObjectStore`] with the addressing rules of the service: one
//! bucket per client, object name equal to the relative path, S3 only.
//! Issues pre-signed URLs with the configured TTL and never moves bytes.
//!
//! A `PUT` URL creates the client's bucket on demand; a `GET` URL never
//! does, so asking to download from a bucket that does not exist yet is a
//! plain `NotFound`.

use std::sync::Arc;
use std::time::Duration;

use sda_core::lfn::Lfn;
use sda_core::models::Protocol;
use sda_core::naming::{self, ObjectLocation};
use sda_core::storage::{ObjectStore, PresignMethod};
use sda_core::{Result, SdaError};

#[derive(Clone)]
pub struct BlobGateway {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
}

impl BlobGateway {
    pub fn new(store: Arc<dyn ObjectStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn object_for(
        &self,
        client_sub: &str,
        protocol: Protocol,
        relative_path: &str,
    ) -> Result<ObjectLocation> {
        naming::object_for(client_sub, protocol, relative_path)
    }

    pub fn lfn_to_object(&self, client_sub: &str, lfn: &Lfn) -> Result<ObjectLocation> {
        naming::lfn_to_object(client_sub, lfn)
    }

    /// Create `bucket` unless it already exists.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        if self.store.bucket_exists(bucket).await? {
            return Ok(());
        }
        tracing::debug!(bucket, "creating bucket");
        self.store.create_bucket(bucket).await
    }

    /// URL authorizing one PUT to `location` for the configured TTL.
    pub async fn presign_put(&self, location: &ObjectLocation) -> Result<String> {
        self.ensure_bucket(&location.bucket).await?;
        let url = self.store.presign(
            PresignMethod::Put,
            &location.bucket,
            &location.object_name,
            self.ttl,
        )?;
        tracing::debug!(
            bucket = %location.bucket,
            object = %location.object_name,
            "issued upload URL"
        );
        Ok(url)
    }

    /// URL authorizing one GET of `location`. The object must exist.
    pub async fn presign_get(&self, location: &ObjectLocation) -> Result<String> {
        if !self.store.bucket_exists(&location.bucket).await? {
            return Err(SdaError::not_found("bucket", &location.bucket));
        }
        if !self.object_exists(location).await? {
            return Err(SdaError::not_found("object", &location.object_name));
        }
        let url = self.store.presign(
            PresignMethod::Get,
            &location.bucket,
            &location.object_name,
            self.ttl,
        )?;
        tracing::debug!(
            bucket = %location.bucket,
            object = %location.object_name,
            "issued download URL"
        );
        Ok(url)
    }

    pub async fn object_exists(&self, location: &ObjectLocation) -> Result<bool> {
        self.store
            .object_exists(&location.bucket, &location.object_name)
            .await
    }
}
