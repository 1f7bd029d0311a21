//! Service wiring.
//!
//! [`App`] bundles the services that share one metadata store and one blob
//! gateway. It is cheap to clone and is the router's state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;

use sda_core::storage::ObjectStore;

use crate::blob::BlobGateway;
use crate::clients::ClientService;
use crate::config::{Config, LimitsConfig};
use crate::conversation::ConversationService;
use crate::db;
use crate::migrate;
use crate::object_store_s3::S3ObjectStore;
use crate::research_context::ResearchContextService;
use crate::source_data::SourceDataService;
use crate::store::MetadataStore;

#[derive(Clone)]
pub struct App {
    pub clients: ClientService,
    pub source_data: SourceDataService,
    pub research_contexts: ResearchContextService,
    pub conversations: ConversationService,
    pub limits: LimitsConfig,
    pub request_timeout: Duration,
}

impl App {
    /// Wire services over an already migrated pool and a chosen object store.
    pub fn new(pool: SqlitePool, object_store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        Self::with_store(MetadataStore::new(pool), object_store, config)
    }

    /// Like [`App::new`], sharing an existing store and its write gate.
    pub fn with_store(
        store: MetadataStore,
        object_store: Arc<dyn ObjectStore>,
        config: &Config,
    ) -> Self {
        let blob = BlobGateway::new(object_store, config.storage.presign_ttl());
        Self {
            clients: ClientService::new(store.clone()),
            source_data: SourceDataService::new(store.clone(), blob),
            research_contexts: ResearchContextService::new(store.clone()),
            conversations: ConversationService::new(store),
            limits: config.limits.clone(),
            request_timeout: config.server.request_timeout(),
        }
    }

    /// Connect, migrate, seed the catalog and build the S3 backend.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        migrate::seed_catalog(&pool, config).await?;
        let object_store = S3ObjectStore::from_config(&config.storage)
            .context("failed to configure object store")?;
        Ok(Self::new(pool, Arc::new(object_store), config))
    }
}
