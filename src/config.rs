//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/sda.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! request_timeout_secs = 30
//!
//! [storage]
//! region = "us-east-1"
//! endpoint_url = "http://localhost:9000"   # MinIO
//! presign_ttl_secs = 3600
//!
//! [limits]
//! max_message_parts = 64
//! max_content_bytes = 65536
//!
//! [[llms]]
//! name = "gpt-4o"
//!
//! [[embedding_models]]
//! name = "text-embedding-3-small"
//! ```
//!
//! Object-store credentials are not part of the file; see
//! [`crate::object_store_s3::AwsCredentials`].

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub llms: Vec<CatalogEntry>,
    #[serde(default)]
    pub embedding_models: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Address buckets as `<endpoint>/<bucket>/<key>`. Defaults to `true`
    /// when `endpoint_url` is set.
    #[serde(default)]
    pub force_path_style: Option<bool>,
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: None,
            presign_ttl_secs: default_presign_ttl_secs(),
            timeout_secs: default_storage_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_presign_ttl_secs() -> u64 {
    60 * 60
}
fn default_storage_timeout_secs() -> u64 {
    10
}

impl StorageConfig {
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_secs)
    }

    pub fn path_style(&self) -> bool {
        self.force_path_style
            .unwrap_or(self.endpoint_url.is_some())
    }
}

/// Caps applied to message bodies at the HTTP edge.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_message_parts")]
    pub max_message_parts: usize,
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_parts: default_max_message_parts(),
            max_content_bytes: default_max_content_bytes(),
        }
    }
}

fn default_max_message_parts() -> usize {
    64
}
fn default_max_content_bytes() -> usize {
    64 * 1024
}

/// One seeded catalog row (LLM or embedding model).
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogEntry {
    pub name: String,
}

impl Config {
    /// A config pointing at `db_path` with every other setting defaulted.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
                max_connections: default_max_connections(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
                request_timeout_secs: default_request_timeout_secs(),
            },
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            llms: Vec::new(),
            embedding_models: Vec::new(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    if config.server.request_timeout_secs == 0 {
        anyhow::bail!("server.request_timeout_secs must be > 0");
    }

    // SigV4 caps pre-signed URL lifetime at seven days.
    if !(1..=604_800).contains(&config.storage.presign_ttl_secs) {
        anyhow::bail!("storage.presign_ttl_secs must be in [1, 604800]");
    }

    if config.storage.region.trim().is_empty() {
        anyhow::bail!("storage.region must not be empty");
    }

    if config.limits.max_message_parts == 0 || config.limits.max_content_bytes == 0 {
        anyhow::bail!("limits.max_message_parts and limits.max_content_bytes must be > 0");
    }

    for entry in config.llms.iter().chain(config.embedding_models.iter()) {
        if entry.name.trim().is_empty() {
            anyhow::bail!("catalog entries must have a non-empty name");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/sda.sqlite"
            [server]
            bind = "127.0.0.1:0"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.presign_ttl(), Duration::from_secs(3600));
        assert_eq!(config.limits.max_message_parts, 64);
        assert_eq!(config.limits.max_content_bytes, 65536);
        assert!(!config.storage.path_style());
    }

    #[test]
    fn custom_endpoint_implies_path_style() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/sda.sqlite"
            [server]
            bind = "127.0.0.1:0"
            [storage]
            endpoint_url = "http://localhost:9000"
            "#,
        )
        .unwrap();
        assert!(config.storage.path_style());
    }

    #[test]
    fn ttl_beyond_seven_days_is_rejected() {
        let err = parse(
            r#"
            [db]
            path = "/tmp/sda.sqlite"
            [server]
            bind = "127.0.0.1:0"
            [storage]
            presign_ttl_secs = 700000
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("presign_ttl_secs"));
    }

    #[test]
    fn catalogs_are_read() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/sda.sqlite"
            [server]
            bind = "127.0.0.1:0"
            [[llms]]
            name = "gpt-4o"
            [[llms]]
            name = "claude"
            [[embedding_models]]
            name = "e5"
            "#,
        )
        .unwrap();
        assert_eq!(config.llms.len(), 2);
        assert_eq!(config.embedding_models[0].name, "e5");
    }
}
