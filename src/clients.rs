//! Client registry.
//!
//! Clients are created explicitly (`POST /client`, `sda client add`) and
//! looked up by their external `sub` everywhere else.

use sda_core::models::Client;
use sda_core::validate::validate_sub;
use sda_core::Result;

use crate::store::MetadataStore;

#[derive(Clone)]
pub struct ClientService {
    store: MetadataStore,
}

impl ClientService {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// Create the client for `sub`, or return it if it is already known.
    pub async fn register(&self, sub: &str) -> Result<Client> {
        let sub = validate_sub(sub)?;
        let mut session = self.store.write().await?;
        if let Some(existing) = session.find_client_by_sub(sub).await? {
            return Ok(existing);
        }
        let client = session.insert_client(sub).await?;
        session.commit().await?;
        tracing::info!(client_id = client.id, "client registered");
        Ok(client)
    }

    pub async fn resolve(&self, sub: &str) -> Result<Client> {
        let sub = validate_sub(sub)?;
        let mut session = self.store.read().await?;
        session.get_client_by_sub(sub).await
    }
}
