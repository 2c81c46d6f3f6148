//! Service configuration
//!
//! ```toml
//! listen = "127.0.0.1:5000"
//! bucket = "registry"
//! read-only = false
//!
//! [storage]
//! local = { path = "/var/lib/registry" }
//!
//! [rename-lease]
//! enabled = true
//! timeout-ms = 250
//! store = { storage = { bucket = "leases" } }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lease::{LeaseStore, MemoryLeaseStore, StorageLeaseStore};
use serde::Deserialize;
use storage::{StorageConfig, StorageError};

use crate::api::{DEFAULT_MAX_CHUNK_SIZE, RegistryBuilder};
use crate::gate::DEFAULT_LEASE_TIMEOUT;

/// Errors loading configuration or constructing what it describes.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("reading {path}: {source}")]
    Read {
        /// File that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for this schema.
    #[error("parsing configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The storage backend could not be constructed.
    #[error("storage backend: {0}")]
    Storage(#[from] StorageError),
}

/// Top-level registry configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RegistryConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Bucket holding blobs, manifests and upload scratch data.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Refuse every write.
    #[serde(default)]
    pub read_only: bool,

    /// Request body limit in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Storage backend.
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    /// Rename lease admission.
    #[serde(default)]
    pub rename_lease: RenameLeaseConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            bucket: default_bucket(),
            read_only: false,
            max_chunk_size: default_max_chunk_size(),
            storage: default_storage(),
            rename_lease: RenameLeaseConfig::default(),
        }
    }
}

/// Rename lease settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RenameLeaseConfig {
    /// Consult the lease store before writes.
    #[serde(default)]
    pub enabled: bool,

    /// Bound on a single lookup, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Where leases are kept.
    #[serde(default)]
    pub store: LeaseStoreConfig,
}

impl Default for RenameLeaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: default_timeout_ms(),
            store: LeaseStoreConfig::default(),
        }
    }
}

/// Lease store selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseStoreConfig {
    /// Process-local leases; only useful when the orchestrator runs in-process.
    #[default]
    Memory,

    /// JSON leases in a bucket of the registry's storage backend.
    Storage {
        /// Bucket holding `leases/<project>.json`.
        bucket: String,
    },
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_bucket() -> String {
    "registry".to_string()
}

fn default_max_chunk_size() -> usize {
    DEFAULT_MAX_CHUNK_SIZE
}

fn default_storage() -> StorageConfig {
    StorageConfig::Memory {
        bucket: default_bucket(),
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_LEASE_TIMEOUT.as_millis() as u64
}

impl RegistryConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a configuration file.
    pub async fn load(path: &camino::Utf8Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        Self::from_toml(&text)
    }

    /// Construct the storage backend and lease store, and configure a builder.
    #[tracing::instrument(skip(self))]
    pub async fn builder(self) -> Result<RegistryBuilder, ConfigError> {
        let storage = self.storage.build().await?;

        let mut builder = RegistryBuilder::new(storage.clone())
            .bucket(self.bucket)
            .read_only(self.read_only)
            .max_chunk_size(self.max_chunk_size);

        let lease = self.rename_lease;
        if lease.enabled {
            let store: Arc<dyn LeaseStore> = match lease.store {
                LeaseStoreConfig::Memory => Arc::new(MemoryLeaseStore::new()),
                LeaseStoreConfig::Storage { bucket } => {
                    Arc::new(StorageLeaseStore::new(storage.bucket(bucket)))
                }
            };
            tracing::info!(store = store.name(), timeout_ms = lease.timeout_ms, "rename lease gate enabled");
            builder = builder
                .lease_store(store)
                .lease_timeout(Duration::from_millis(lease.timeout_ms));
        }

        Ok(builder)
    }
}
