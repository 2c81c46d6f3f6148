//! Resumable blob uploads
//!
//! Sessions live in a table keyed by [`UploadId`]. Each session sits behind
//! its own async mutex, which is the critical section for applying chunks and
//! finalizing: two requests against the same session run one after the
//! other, requests against different sessions never wait on each other.
//! Sessions are removed from the table as soon as they are committed or
//! cancelled, so every later request sees an unknown session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{RegistryError, RegistryResult};
use crate::storage::RegistryStorage;

mod chunk;
mod finalize;
mod session;

pub use chunk::ChunkRange;
pub(crate) use chunk::range_header;
pub use finalize::Finalized;
pub use session::{UploadId, UploadSession, UploadState};

type SessionHandle = Arc<Mutex<UploadSession>>;

/// Owns every in-progress upload session.
#[derive(Debug)]
pub struct UploadManager {
    sessions: DashMap<UploadId, SessionHandle>,
    storage: RegistryStorage,
}

impl UploadManager {
    /// Create a manager which keeps scratch data in `storage`.
    pub fn new(storage: RegistryStorage) -> Self {
        Self {
            sessions: DashMap::new(),
            storage,
        }
    }

    /// Number of sessions still in progress.
    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Open a new session for `repository`, at offset 0.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, repository: &str) -> RegistryResult<UploadId> {
        let id = UploadId::new();
        self.storage.create_upload(&id).await?;

        let session = UploadSession::new(id, repository);
        self.sessions.insert(id, Arc::new(Mutex::new(session)));

        tracing::debug!(upload = %id, "upload started");
        Ok(id)
    }

    /// Bytes accepted so far by an active session.
    pub async fn status(&self, repository: &str, id: &UploadId) -> RegistryResult<u64> {
        Ok(self.lock(repository, id).await?.offset())
    }

    /// Append a chunk, returning the new offset.
    ///
    /// The chunk is rejected untouched unless it starts exactly at the
    /// session's offset.
    #[tracing::instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn append(
        &self,
        repository: &str,
        id: &UploadId,
        range: Option<ChunkRange>,
        payload: &[u8],
    ) -> RegistryResult<u64> {
        let mut session = self.lock(repository, id).await?;
        self.apply_chunk(&mut session, range, payload).await?;
        Ok(session.offset())
    }

    /// Discard a session and its scratch data.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, repository: &str, id: &UploadId) -> RegistryResult<()> {
        let mut session = self.lock(repository, id).await?;
        self.close(&mut session, UploadState::Cancelled);

        if let Err(error) = self.storage.delete_upload(id).await {
            tracing::warn!(upload = %id, %error, "failed to remove cancelled upload data");
        }
        tracing::debug!(upload = %id, offset = session.offset(), "upload cancelled");
        Ok(())
    }

    /// Lock an active session belonging to `repository`.
    ///
    /// Unknown, terminal, and foreign sessions are all reported the same way.
    async fn lock(
        &self,
        repository: &str,
        id: &UploadId,
    ) -> RegistryResult<OwnedMutexGuard<UploadSession>> {
        let unknown = || RegistryError::BlobUploadUnknown(id.to_string());

        // Clone the handle out so the table shard is not held across the await.
        let handle = self.sessions.get(id).map(|entry| entry.value().clone());
        let session = handle.ok_or_else(unknown)?.lock_owned().await;

        if !session.state().is_active() || session.repository != repository {
            return Err(unknown());
        }
        Ok(session)
    }

    /// Write a chunk to scratch storage and feed it to the accumulator.
    ///
    /// Must be called with the session locked.
    async fn apply_chunk(
        &self,
        session: &mut UploadSession,
        range: Option<ChunkRange>,
        payload: &[u8],
    ) -> RegistryResult<()> {
        chunk::check_contiguous(session.offset(), range, payload.len() as u64)?;
        if payload.is_empty() {
            return Ok(());
        }

        if let Err(error) = self.storage.append_upload(&session.id, payload).await {
            // The scratch object may hold part of the chunk. Cut it back to
            // the accepted offset so the client can resend from there.
            match self.storage.truncate_upload(&session.id, session.offset()).await {
                Ok(()) => {
                    tracing::warn!(
                        upload = %session.id,
                        offset = session.offset(),
                        %error,
                        "append failed, upload kept at offset"
                    );
                }
                Err(restore) => {
                    tracing::warn!(upload = %session.id, %error, %restore, "append failed, abandoning upload");
                    self.close(session, UploadState::Cancelled);
                    if let Err(error) = self.storage.delete_upload(&session.id).await {
                        tracing::warn!(upload = %session.id, %error, "failed to remove abandoned upload data");
                    }
                }
            }
            return Err(error);
        }

        session.accept(payload);
        tracing::trace!(upload = %session.id, offset = session.offset(), "chunk applied");
        Ok(())
    }

    /// Move a locked session to a terminal state and drop it from the table.
    fn close(&self, session: &mut UploadSession, state: UploadState) {
        if session.close(state) {
            self.sessions.remove(&session.id);
        }
    }
}
