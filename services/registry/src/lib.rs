//! # OCI Container Registry
//!
//! The write path of a content-addressable container registry, served with
//! axum over the pluggable backends of the `storage` crate.
//!
//! ## Features
//!
//! - Resumable, chunked blob uploads. Each chunk must start exactly where the
//!   previous one ended, and the content is hashed as it arrives.
//! - Digest-verified, idempotent commits into `blobs/<algorithm>/<hex>`
//! - Manifest, tag and catalog operations
//! - Rename lease admission: writes under a project being relocated are
//!   refused with `RENAME_IN_PROGRESS` while reads continue. Lease lookups
//!   that fail or time out admit the write.
//! - Read-only mode
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let leases = Arc::new(lease::MemoryLeaseStore::new());
//! let registry = RegistryBuilder::new(storage.into())
//!     .bucket("registry")
//!     .lease_store(leases)
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, registry).await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod config;
pub mod digest;
mod error;
pub mod gate;
mod manifest;
pub mod route;
mod storage;
pub mod upload;

pub use api::{DEFAULT_MAX_CHUNK_SIZE, RegistryBuilder, RegistryState, router};
pub use config::{ConfigError, LeaseStoreConfig, RegistryConfig, RenameLeaseConfig};
pub use error::{RegistryError, RegistryResult};
pub use crate::storage::{BlobDescriptor, Commit, RegistryStorage};
