//! Storage layer for the registry
//!
//! Object layout within the bucket:
//!
//! | Path | Contents |
//! |---|---|
//! | `blobs/<algorithm>/<hex>` | committed blob bytes |
//! | `_uploads/<id>/data` | scratch bytes of an in-progress upload |
//! | `manifests/<repository>/<digest>` | manifest bytes |
//! | `tags/<repository>/<tag>` | digest string of the tagged manifest |

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use storage::{Storage, StorageBucket, StorageError};

use crate::digest::{Algorithm, Digest, DigestVerifier};
use crate::error::{RegistryError, RegistryResult};
use crate::upload::UploadId;

/// Media type reported for every blob.
pub const BLOB_MEDIA_TYPE: &str = "application/octet-stream";

/// What the registry knows about a committed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    /// Content address.
    pub digest: Digest,
    /// Size in bytes.
    pub size: u64,
    /// Media type served with the blob.
    pub media_type: &'static str,
}

/// Outcome of committing an upload's scratch object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The scratch object became the blob.
    Created,
    /// A blob with this digest was already stored; the scratch object was discarded.
    AlreadyExists,
}

/// Registry storage backend
#[derive(Clone, Debug)]
pub struct RegistryStorage {
    bucket: StorageBucket,
}

impl RegistryStorage {
    /// Create a new registry storage
    pub fn new(storage: Storage, bucket: String) -> Self {
        Self {
            bucket: storage.bucket(bucket),
        }
    }

    fn blob_path(digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("blobs/{}/{}", digest.algorithm(), digest.hex()))
    }

    pub(crate) fn upload_path(id: &UploadId) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("_uploads/{id}/data"))
    }

    fn manifest_path(repository: &str, digest: &Digest) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("manifests/{repository}/{digest}"))
    }

    fn tag_path(repository: &str, tag: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("tags/{repository}/{tag}"))
    }

    async fn read(&self, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let mut data = Vec::new();
        self.bucket.download(path, &mut data).await?;
        Ok(data)
    }

    /// Size and media type of a committed blob.
    pub async fn blob_descriptor(&self, digest: &Digest) -> RegistryResult<BlobDescriptor> {
        match self.bucket.metadata(&Self::blob_path(digest)).await {
            Ok(metadata) => Ok(BlobDescriptor {
                digest: digest.clone(),
                size: metadata.size,
                media_type: BLOB_MEDIA_TYPE,
            }),
            Err(error) if error.is_not_found() => {
                Err(RegistryError::BlobNotFound(digest.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Check if a blob exists
    pub async fn blob_exists(&self, digest: &Digest) -> RegistryResult<bool> {
        match self.blob_descriptor(digest).await {
            Ok(_) => Ok(true),
            Err(RegistryError::BlobNotFound(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Get a blob
    pub async fn get_blob(&self, digest: &Digest) -> RegistryResult<Vec<u8>> {
        self.read(&Self::blob_path(digest)).await.map_err(|e| {
            if e.is_not_found() {
                RegistryError::BlobNotFound(digest.to_string())
            } else {
                e.into()
            }
        })
    }

    /// Delete a blob
    pub async fn delete_blob(&self, digest: &Digest) -> RegistryResult<()> {
        self.bucket
            .delete(&Self::blob_path(digest))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    RegistryError::BlobNotFound(digest.to_string())
                } else {
                    e.into()
                }
            })
    }

    /// Create the empty scratch object for a new upload.
    pub async fn create_upload(&self, id: &UploadId) -> RegistryResult<()> {
        self.bucket
            .upload(&Self::upload_path(id), &mut &b""[..])
            .await?;
        Ok(())
    }

    /// Append bytes to an upload's scratch object.
    pub async fn append_upload(&self, id: &UploadId, data: &[u8]) -> RegistryResult<()> {
        let mut reader = data;
        self.bucket
            .append(&Self::upload_path(id), &mut reader)
            .await?;
        Ok(())
    }

    /// Cut an upload's scratch object back to its first `len` bytes.
    ///
    /// Used after a failed append, which may have left part of a chunk
    /// behind. Fails if fewer than `len` bytes survive.
    pub async fn truncate_upload(&self, id: &UploadId, len: u64) -> RegistryResult<()> {
        let path = Self::upload_path(id);
        let mut data = self.read(&path).await?;
        match (data.len() as u64).cmp(&len) {
            std::cmp::Ordering::Equal => return Ok(()),
            std::cmp::Ordering::Less => {
                return Err(RegistryError::BlobUploadInvalid(format!(
                    "scratch data for {id} holds {} of {len} accepted bytes",
                    data.len()
                )));
            }
            std::cmp::Ordering::Greater => {}
        }

        data.truncate(len as usize);
        self.bucket.upload(&path, &mut data.as_slice()).await?;
        Ok(())
    }

    /// Hash an upload's scratch object from the start.
    pub async fn hash_upload(&self, id: &UploadId, algorithm: Algorithm) -> RegistryResult<Digest> {
        let data = self.read(&Self::upload_path(id)).await?;
        let mut verifier = DigestVerifier::new(algorithm);
        verifier.update(&data);
        Ok(verifier.digest())
    }

    /// Remove an upload's scratch object. A missing object is not an error.
    pub async fn delete_upload(&self, id: &UploadId) -> RegistryResult<()> {
        match self.bucket.delete(&Self::upload_path(id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.is_not_found() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Move an upload's scratch object to its content address.
    ///
    /// Committing a digest that is already stored discards the scratch
    /// object and still succeeds.
    pub async fn commit_upload(&self, id: &UploadId, digest: &Digest) -> RegistryResult<Commit> {
        let scratch = Self::upload_path(id);

        if self.blob_exists(digest).await? {
            if let Err(error) = self.bucket.delete(&scratch).await {
                tracing::warn!(upload = %id, %error, "failed to discard duplicate upload data");
            }
            return Ok(Commit::AlreadyExists);
        }

        self.bucket.rename(&scratch, &Self::blob_path(digest)).await?;
        Ok(Commit::Created)
    }

    /// Store a blob in one step, verifying its digest first.
    pub async fn put_blob(&self, digest: &Digest, data: &[u8]) -> RegistryResult<Commit> {
        let computed = Digest::of(digest.algorithm(), data);
        if computed != *digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.to_string(),
                actual: computed.to_string(),
            });
        }

        if self.blob_exists(digest).await? {
            return Ok(Commit::AlreadyExists);
        }

        let mut reader = data;
        self.bucket
            .upload(&Self::blob_path(digest), &mut reader)
            .await?;
        Ok(Commit::Created)
    }

    /// Resolve a tag to the digest of the manifest it points at.
    pub async fn resolve_tag(&self, repository: &str, tag: &str) -> RegistryResult<Digest> {
        let data = self
            .read(&Self::tag_path(repository, tag))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    RegistryError::ManifestNotFound(format!("{repository}:{tag}"))
                } else {
                    e.into()
                }
            })?;

        let digest = String::from_utf8_lossy(&data);
        digest
            .trim()
            .parse()
            .map_err(|_| RegistryError::InvalidManifest(format!("corrupt tag {repository}:{tag}")))
    }

    /// Get a manifest by digest
    pub async fn get_manifest(&self, repository: &str, digest: &Digest) -> RegistryResult<Vec<u8>> {
        self.read(&Self::manifest_path(repository, digest))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    RegistryError::ManifestNotFound(format!("{repository}@{digest}"))
                } else {
                    e.into()
                }
            })
    }

    /// Store a manifest, and point `tag` at it when given.
    ///
    /// Returns the canonical digest of `data`.
    pub async fn put_manifest(
        &self,
        repository: &str,
        tag: Option<&str>,
        data: &[u8],
    ) -> RegistryResult<Digest> {
        let digest = Digest::of(Algorithm::CANONICAL, data);

        let mut reader = data;
        self.bucket
            .upload(&Self::manifest_path(repository, &digest), &mut reader)
            .await?;

        if let Some(tag) = tag {
            let target = digest.to_string();
            let mut reader = target.as_bytes();
            self.bucket
                .upload(&Self::tag_path(repository, tag), &mut reader)
                .await?;
        }

        Ok(digest)
    }

    /// Delete a manifest and every tag pointing at it.
    pub async fn delete_manifest(&self, repository: &str, digest: &Digest) -> RegistryResult<()> {
        self.bucket
            .delete(&Self::manifest_path(repository, digest))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    RegistryError::ManifestNotFound(format!("{repository}@{digest}"))
                } else {
                    RegistryError::from(e)
                }
            })?;

        for tag in self.list_tags(repository).await? {
            match self.resolve_tag(repository, &tag).await {
                Ok(target) if target == *digest => self.delete_tag(repository, &tag).await?,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%repository, %tag, %error, "skipping unreadable tag")
                }
            }
        }

        Ok(())
    }

    /// Delete a tag, leaving the manifest it pointed at in place.
    pub async fn delete_tag(&self, repository: &str, tag: &str) -> RegistryResult<()> {
        self.bucket
            .delete(&Self::tag_path(repository, tag))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    RegistryError::ManifestNotFound(format!("{repository}:{tag}"))
                } else {
                    e.into()
                }
            })
    }

    /// List tags for a repository, sorted.
    ///
    /// Only direct children count; tags of nested repositories are excluded.
    pub async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        let prefix = Utf8PathBuf::from(format!("tags/{repository}"));
        let files = self.bucket.list(Some(&prefix)).await?;

        let tags: BTreeSet<String> = files
            .iter()
            .filter_map(|f| {
                let rest = Utf8Path::new(f).strip_prefix(&prefix).ok()?;
                let mut parts = rest.components();
                let tag = parts.next()?.as_str();
                parts.next().is_none().then(|| tag.to_owned())
            })
            .collect();

        Ok(tags.into_iter().collect())
    }

    /// List every repository holding at least one manifest, sorted.
    pub async fn list_repositories(&self) -> RegistryResult<Vec<String>> {
        let prefix = Utf8Path::new("manifests");
        let files = self.bucket.list(Some(prefix)).await?;

        let repositories: BTreeSet<String> = files
            .iter()
            .filter_map(|f| {
                let rest = Utf8Path::new(f).strip_prefix(prefix).ok()?;
                rest.parent()
                    .map(|p| p.as_str())
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
            })
            .collect();

        Ok(repositories.into_iter().collect())
    }
}
