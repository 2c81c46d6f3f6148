use chrono::Utc;

use super::{ChunkRange, UploadId, UploadManager, UploadState};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::storage::Commit;

/// A committed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Digest the content was committed under.
    pub digest: Digest,
    /// Total bytes in the blob.
    pub size: u64,
    /// Whether the blob was new or already stored.
    pub commit: Commit,
}

impl UploadManager {
    /// Verify and commit an upload.
    ///
    /// A trailing chunk, when given, is applied first under the usual
    /// contiguity rule. On a digest mismatch nothing is committed and the
    /// session stays active, so the client may retry or cancel.
    #[tracing::instrument(skip(self, expected, trailing), fields(%expected))]
    pub async fn finalize(
        &self,
        repository: &str,
        id: &UploadId,
        expected: &Digest,
        trailing: Option<(Option<ChunkRange>, &[u8])>,
    ) -> RegistryResult<Finalized> {
        let mut session = self.lock(repository, id).await?;

        if let Some((range, payload)) = trailing {
            self.apply_chunk(&mut session, range, payload).await?;
        }

        let actual = if expected.algorithm() == session.verifier.algorithm() {
            session.verifier.digest()
        } else {
            tracing::debug!(algorithm = %expected.algorithm(), "rehashing upload");
            self.storage.hash_upload(id, expected.algorithm()).await?
        };

        if actual != *expected {
            tracing::debug!(%actual, offset = session.offset(), "digest mismatch, session kept");
            return Err(RegistryError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }

        let commit = self.storage.commit_upload(id, expected).await?;
        self.close(&mut session, UploadState::Committed);

        let elapsed = Utc::now() - session.started_at;
        tracing::info!(
            upload = %id,
            digest = %expected,
            size = session.offset(),
            ?commit,
            elapsed_ms = elapsed.num_milliseconds(),
            "upload committed"
        );

        Ok(Finalized {
            digest: expected.clone(),
            size: session.offset(),
            commit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::manager;
    use super::*;
    use crate::digest::Algorithm;

    #[tokio::test]
    async fn digest_of_chunks_in_order() {
        let uploads = manager();
        let id = uploads.start("foo").await.unwrap();
        let mut all = Vec::new();
        for chunk in [&b"alpha "[..], &b"beta "[..], &b"gamma"[..]] {
            uploads.append("foo", &id, None, chunk).await.unwrap();
            all.extend_from_slice(chunk);
        }

        let digest = Digest::of(Algorithm::Sha256, &all);
        let done = uploads.finalize("foo", &id, &digest, None).await.unwrap();
        assert_eq!(done.digest, digest);
        assert_eq!(done.size, all.len() as u64);
        assert_eq!(done.commit, Commit::Created);
        assert_eq!(uploads.storage.get_blob(&digest).await.unwrap(), all);
        assert_eq!(uploads.active(), 0);
    }

    #[tokio::test]
    async fn mismatch_keeps_session() {
        let uploads = manager();
        let id = uploads.start("foo").await.unwrap();
        uploads.append("foo", &id, None, b"payload").await.unwrap();

        let wrong = Digest::of(Algorithm::Sha256, b"something else");
        let result = uploads.finalize("foo", &id, &wrong, None).await;
        assert!(matches!(result, Err(RegistryError::DigestMismatch { .. })));
        assert!(!uploads.storage.blob_exists(&wrong).await.unwrap());
        assert_eq!(uploads.status("foo", &id).await.unwrap(), 7);

        let right = Digest::of(Algorithm::Sha256, b"payload");
        uploads.finalize("foo", &id, &right, None).await.unwrap();
    }

    #[tokio::test]
    async fn trailing_chunk_is_applied_first() {
        let uploads = manager();
        let id = uploads.start("foo").await.unwrap();
        uploads.append("foo", &id, None, b"head").await.unwrap();

        let digest = Digest::of(Algorithm::Sha256, b"headtail");
        let range = "4-7".parse().ok();
        let done = uploads
            .finalize("foo", &id, &digest, Some((range, &b"tail"[..])))
            .await
            .unwrap();
        assert_eq!(done.size, 8);
    }

    #[tokio::test]
    async fn empty_upload_commits_empty_digest() {
        let uploads = manager();
        let id = uploads.start("foo").await.unwrap();

        let done = uploads
            .finalize("foo", &id, &Digest::empty(), None)
            .await
            .unwrap();
        assert_eq!(done.size, 0);
        let descriptor = uploads
            .storage
            .blob_descriptor(&Digest::empty())
            .await
            .unwrap();
        assert_eq!(descriptor.size, 0);
    }

    #[tokio::test]
    async fn sha512_is_verified_by_rehashing() {
        let uploads = manager();
        let id = uploads.start("foo").await.unwrap();
        uploads.append("foo", &id, None, b"wide").await.unwrap();

        let digest = Digest::of(Algorithm::Sha512, b"wide");
        let done = uploads.finalize("foo", &id, &digest, None).await.unwrap();
        assert_eq!(done.digest.algorithm(), Algorithm::Sha512);
        assert_eq!(uploads.storage.get_blob(&digest).await.unwrap(), b"wide");
    }

    #[tokio::test]
    async fn duplicate_content_commits_once() {
        let uploads = manager();
        let digest = Digest::of(Algorithm::Sha256, b"same bytes");

        let mut commits = Vec::new();
        for _ in 0..2 {
            let id = uploads.start("foo").await.unwrap();
            uploads.append("foo", &id, None, b"same bytes").await.unwrap();
            commits.push(
                uploads
                    .finalize("foo", &id, &digest, None)
                    .await
                    .unwrap()
                    .commit,
            );
        }

        assert_eq!(commits, vec![Commit::Created, Commit::AlreadyExists]);
        assert_eq!(
            uploads.storage.get_blob(&digest).await.unwrap(),
            b"same bytes"
        );
    }

    #[tokio::test]
    async fn finalized_session_is_unknown() {
        let uploads = manager();
        let id = uploads.start("foo").await.unwrap();
        uploads
            .finalize("foo", &id, &Digest::empty(), None)
            .await
            .unwrap();

        assert!(matches!(
            uploads.finalize("foo", &id, &Digest::empty(), None).await,
            Err(RegistryError::BlobUploadUnknown(_))
        ));
    }
}
