use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use storage::StorageBucket;
use uuid::Uuid;

use crate::{project_key, LeaseError, LeaseStore, RenameLease};

/// Lease store backed by JSON objects in a storage bucket.
///
/// Any number of registry processes pointed at the same bucket observe the
/// same leases. Expiry is evaluated against the wall clock of the reader.
#[derive(Debug, Clone)]
pub struct StorageLeaseStore {
    bucket: StorageBucket,
}

impl StorageLeaseStore {
    /// Keep leases in the given bucket.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    fn lease_path(key: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("leases/{key}.json"))
    }

    async fn read(&self, key: &str) -> Result<Option<RenameLease>, LeaseError> {
        let mut data = Vec::new();
        match self.bucket.download(&Self::lease_path(key), &mut data).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error.into()),
        }

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| LeaseError::Malformed {
                project: key.to_owned(),
                source,
            })
    }

    /// Take the lease for the project containing `path`.
    ///
    /// Any lease already stored for that project is overwritten.
    pub async fn acquire(&self, path: &str, ttl: Duration) -> Result<RenameLease, LeaseError> {
        let lease = RenameLease::new(path, ttl);
        self.put(&lease).await?;
        Ok(lease)
    }

    /// Store a lease as-is.
    pub async fn put(&self, lease: &RenameLease) -> Result<(), LeaseError> {
        let data = serde_json::to_vec(lease).map_err(LeaseError::Encode)?;
        self.bucket
            .upload(&Self::lease_path(&lease.project_path), &mut data.as_slice())
            .await?;
        tracing::debug!(project = %lease.project_path, token = %lease.token, "stored rename lease");
        Ok(())
    }

    /// Give up a lease. Returns `false` if `token` no longer holds it.
    ///
    /// The read and the delete are separate operations, so a lease stored
    /// between them by another holder can be removed.
    pub async fn release(&self, path: &str, token: Uuid) -> Result<bool, LeaseError> {
        let key = project_key(path);
        match self.read(key).await? {
            Some(lease) if lease.token == token => {
                match self.bucket.delete(&Self::lease_path(key)).await {
                    Ok(()) => Ok(true),
                    Err(error) if error.is_not_found() => Ok(false),
                    Err(error) => Err(error.into()),
                }
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl LeaseStore for StorageLeaseStore {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn get(&self, project: &str) -> Result<Option<RenameLease>, LeaseError> {
        let key = project_key(project);
        Ok(self
            .read(key)
            .await?
            .filter(|lease| !lease.is_expired_at(Utc::now())))
    }
}
