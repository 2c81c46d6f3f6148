//! # Storage backends
//!
//! Configuration and unification for the storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;
#[cfg(feature = "tmp")]
pub(crate) mod temp;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Backend selection, made once when a service is constructed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// Process-local storage, lost on restart.
    Memory {
        /// Bucket created up front.
        bucket: String,
    },

    /// Files under a directory on the local filesystem.
    #[cfg(feature = "local")]
    Local {
        /// Root directory; buckets are subdirectories.
        path: Utf8PathBuf,
    },

    /// Files under a temporary directory, removed on drop.
    #[cfg(feature = "tmp")]
    Temp,
}

impl StorageConfig {
    /// Construct the configured driver.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            #[cfg(feature = "tmp")]
            StorageConfig::Temp => LocalDriver::temporary()
                .map_err(|err| StorageError::from_io("temp", err))?
                .into(),
        };
        Ok(client)
    }
}

use tokio::io;

/// A shared handle to a storage driver.
///
/// Cloning is cheap. All object access goes through a [`StorageBucket`].
#[derive(Debug, Clone)]
pub struct Storage {
    driver: Arc<dyn Driver + Send + Sync>,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver in a shared handle.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle which operates on a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }
}

/// A storage handle bound to one bucket.
///
/// Every operation is traced with the driver and bucket, so spans from the
/// registry's upload and commit paths show where bytes actually went.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket every operation targets.
    pub bucket: String,
    driver: Arc<dyn Driver + Send + Sync>,
}

impl StorageBucket {
    /// Size and creation time of an object.
    #[tracing::instrument(level = "trace", skip(self), fields(driver = self.driver.name(), bucket = %self.bucket))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, remote).await
    }

    /// Stream an object into `writer`.
    #[tracing::instrument(level = "trace", skip(self, writer), fields(driver = self.driver.name(), bucket = %self.bucket))]
    pub async fn download<W>(&self, remote: &Utf8Path, writer: &mut W) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync,
    {
        self.driver.download(&self.bucket, remote, writer).await
    }

    /// Replace an object with the contents of `reader`.
    #[tracing::instrument(level = "trace", skip(self, reader), fields(driver = self.driver.name(), bucket = %self.bucket))]
    pub async fn upload<R>(&self, remote: &Utf8Path, reader: &mut R) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync,
    {
        self.driver.upload(&self.bucket, remote, reader).await
    }

    /// Extend an object with the contents of `reader`.
    #[tracing::instrument(level = "trace", skip(self, reader), fields(driver = self.driver.name(), bucket = %self.bucket))]
    pub async fn append<R>(&self, remote: &Utf8Path, reader: &mut R) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync,
    {
        self.driver.append(&self.bucket, remote, reader).await
    }

    /// Move an object, replacing anything at `to`.
    #[tracing::instrument(level = "trace", skip(self), fields(driver = self.driver.name(), bucket = %self.bucket))]
    pub async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), StorageError> {
        self.driver.rename(&self.bucket, from, to).await
    }

    /// Paths of every object under `prefix`.
    #[tracing::instrument(level = "trace", skip(self), fields(driver = self.driver.name(), bucket = %self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    /// Remove an object.
    #[tracing::instrument(level = "trace", skip(self), fields(driver = self.driver.name(), bucket = %self.bucket))]
    pub async fn delete(&self, remote: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, remote).await
    }
}
