//! Source data service.
//!
//! Uploads are a side channel: [`SourceDataService::prepare_upload`] hands out
//! a pre-signed PUT URL and writes nothing. The metadata row appears only when
//! the client calls [`SourceDataService::register`] after the bytes landed,
//! so every registered S3 row starts out `AVAILABLE`.
//!
//! Object-store round-trips happen outside metadata transactions; only the
//! final insert or update holds the write gate.

use serde::Serialize;

use sda_core::lfn::parse_lfn;
use sda_core::models::{Protocol, SourceData, SourceDataStatus};
use sda_core::validate::{
    populate_type, sanitize_relative_path, validate_protocol, validate_relative_path,
    validate_sub, validate_title,
};
use sda_core::{Result, SdaError};

use crate::blob::BlobGateway;
use crate::store::{MetadataStore, NewSourceData};

/// Result of [`SourceDataService::prepare_upload`].
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    pub signed_url: String,
    /// The path the blob will live under; pass it to `register` afterwards.
    pub relative_path: String,
}

#[derive(Clone)]
pub struct SourceDataService {
    store: MetadataStore,
    blob: BlobGateway,
}

impl SourceDataService {
    pub fn new(store: MetadataStore, blob: BlobGateway) -> Self {
        Self { store, blob }
    }

    /// Issue an upload URL under a freshly minted path. Creates the client's
    /// bucket if needed.
    pub async fn prepare_upload(
        &self,
        client_sub: &str,
        protocol: &str,
        relative_path: &str,
    ) -> Result<UploadTicket> {
        let client_sub = validate_sub(client_sub)?;
        let protocol = validate_protocol(protocol)?;
        let relative_path = validate_relative_path(relative_path)?;

        {
            let mut session = self.store.read().await?;
            session.get_client_by_sub(client_sub).await?;
        }

        let location = self.blob.object_for(client_sub, protocol, &relative_path)?;
        let signed_url = self.blob.presign_put(&location).await?;
        Ok(UploadTicket {
            signed_url,
            relative_path,
        })
    }

    /// Register a blob that has already been uploaded.
    pub async fn register(
        &self,
        client_sub: &str,
        name: &str,
        protocol: &str,
        relative_path: &str,
    ) -> Result<SourceData> {
        let client_sub = validate_sub(client_sub)?;
        let name = validate_title("name", name)?;
        let protocol = validate_protocol(protocol)?;
        let relative_path = sanitize_relative_path(relative_path)?;

        let client = {
            let mut session = self.store.read().await?;
            session.get_client_by_sub(client_sub).await?
        };

        let location = self.blob.object_for(client_sub, protocol, &relative_path)?;
        if !self.blob.object_exists(&location).await? {
            return Err(SdaError::FileNotFound(relative_path));
        }

        let new = NewSourceData {
            client_id: client.id,
            name: name.to_string(),
            protocol,
            data_type: populate_type(&relative_path),
            relative_path,
            status: SourceDataStatus::Available,
        };
        let mut session = self.store.write().await?;
        let source_data = session.insert_source_data(&new).await?;
        session.commit().await?;

        tracing::info!(
            client_id = client.id,
            source_data_id = source_data.id,
            "source data registered"
        );
        Ok(source_data)
    }

    /// Register source data addressed by a Logical File Name.
    ///
    /// Unlike [`Self::register`] the blob may still be in flight: the row is
    /// `AVAILABLE` when the object exists and `CREATED` otherwise (always
    /// `CREATED` for protocols the object store does not back).
    pub async fn register_lfn(
        &self,
        client_sub: &str,
        name: &str,
        lfn_json: &str,
    ) -> Result<SourceData> {
        let client_sub = validate_sub(client_sub)?;
        let name = validate_title("name", name)?;
        let lfn = parse_lfn(lfn_json)?;

        let client = {
            let mut session = self.store.read().await?;
            session.get_client_by_sub(client_sub).await?
        };

        let status = match self.blob.lfn_to_object(client_sub, &lfn) {
            Ok(location) => {
                if self.blob.object_exists(&location).await? {
                    SourceDataStatus::Available
                } else {
                    SourceDataStatus::Created
                }
            }
            Err(SdaError::UnsupportedProtocol(_)) => SourceDataStatus::Created,
            Err(e) => return Err(e),
        };

        let new = NewSourceData {
            client_id: client.id,
            name: name.to_string(),
            protocol: lfn.protocol,
            data_type: populate_type(&lfn.relative_path),
            relative_path: lfn.relative_path.clone(),
            status,
        };
        let mut session = self.store.write().await?;
        let source_data = session.insert_source_data(&new).await?;
        session.commit().await?;

        tracing::info!(
            client_id = client.id,
            source_data_id = source_data.id,
            status = status.as_str(),
            "source data registered from LFN"
        );
        Ok(source_data)
    }

    /// Re-check the blob behind a not-yet-available row and promote it to
    /// `AVAILABLE` if it has arrived. Other transitions never happen here.
    pub async fn refresh_status(&self, client_sub: &str, id: i64) -> Result<SourceData> {
        let client_sub = validate_sub(client_sub)?;
        let source_data = {
            let mut session = self.store.read().await?;
            let client = session.get_client_by_sub(client_sub).await?;
            let source_data = session.get_source_data(id).await?;
            if source_data.client_id != client.id {
                return Err(SdaError::Forbidden(format!(
                    "source data {id} belongs to another client"
                )));
            }
            source_data
        };

        if source_data.status == SourceDataStatus::Available {
            return Ok(source_data);
        }

        let location =
            self.blob
                .object_for(client_sub, source_data.protocol, &source_data.relative_path)?;
        if !self.blob.object_exists(&location).await? {
            return Ok(source_data);
        }

        let mut session = self.store.write().await?;
        // Re-read under the gate; a concurrent refresh may have won.
        let current = session.get_source_data(id).await?;
        if !current.status.can_transition_to(SourceDataStatus::Available) {
            return Ok(current);
        }
        let updated = session
            .update_source_data_status(id, SourceDataStatus::Available)
            .await?;
        session.commit().await?;
        tracing::info!(source_data_id = id, "source data became available");
        Ok(updated)
    }

    /// Issue a download URL for one of `client_id`'s registered files.
    ///
    /// The lookup is scoped to the client, so a triple registered by someone
    /// else is indistinguishable from one that does not exist.
    pub async fn prepare_download(
        &self,
        client_id: i64,
        protocol: &str,
        relative_path: &str,
    ) -> Result<String> {
        let protocol = validate_protocol(protocol)?;
        let relative_path = sanitize_relative_path(relative_path)?;

        let (client, source_data) = {
            let mut session = self.store.read().await?;
            let client = session.get_client_by_id(client_id).await?;
            let source_data = session
                .get_source_data_by_composite_index(client.id, protocol, &relative_path)
                .await?;
            (client, source_data)
        };

        if source_data.protocol != Protocol::S3 {
            return Err(SdaError::UnsupportedProtocol(source_data.protocol.to_string()));
        }
        let location =
            self.blob
                .object_for(&client.sub, source_data.protocol, &source_data.relative_path)?;
        self.blob.presign_get(&location).await
    }

    pub async fn list_for_client(&self, client_id: i64) -> Result<Vec<SourceData>> {
        let mut session = self.store.read().await?;
        let client = session.get_client_by_id(client_id).await?;
        session.list_source_data(client.id).await
    }

    /// Soft-delete a source data row. The blob is left in place.
    pub async fn delete(&self, client_sub: &str, id: i64) -> Result<()> {
        let client_sub = validate_sub(client_sub)?;
        let mut session = self.store.write().await?;
        let client = session.get_client_by_sub(client_sub).await?;
        let source_data = session.get_source_data(id).await?;
        if source_data.client_id != client.id {
            return Err(SdaError::Forbidden(format!(
                "source data {id} belongs to another client"
            )));
        }
        session.soft_delete_source_data(id).await?;
        session.commit().await?;
        tracing::info!(source_data_id = id, "source data deleted");
        Ok(())
    }
}
