use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::digest::DigestVerifier;

/// Opaque reference to an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(Uuid);

impl UploadId {
    /// A fresh, random reference.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl FromStr for UploadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of an upload session.
///
/// `Created -> Receiving -> {Committed | Cancelled}`; a session may also go
/// straight from `Created` to either terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Started, no bytes received yet.
    Created,
    /// At least one chunk applied.
    Receiving,
    /// Content committed to its digest.
    Committed,
    /// Discarded by the client.
    Cancelled,
}

impl UploadState {
    /// Whether the session accepts further operations.
    pub fn is_active(self) -> bool {
        matches!(self, UploadState::Created | UploadState::Receiving)
    }
}

/// Progress of one resumable upload.
#[derive(Debug)]
pub struct UploadSession {
    pub(crate) id: UploadId,
    pub(crate) repository: String,
    pub(crate) offset: u64,
    pub(crate) verifier: DigestVerifier,
    pub(crate) state: UploadState,
    pub(crate) started_at: DateTime<Utc>,
}

impl UploadSession {
    pub(crate) fn new(id: UploadId, repository: &str) -> Self {
        Self {
            id,
            repository: repository.to_owned(),
            offset: 0,
            verifier: DigestVerifier::default(),
            state: UploadState::Created,
            started_at: Utc::now(),
        }
    }

    /// Bytes accepted so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current lifecycle state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Record bytes that are now durably in scratch storage.
    pub(crate) fn accept(&mut self, data: &[u8]) {
        debug_assert!(self.state.is_active());
        self.verifier.update(data);
        self.offset += data.len() as u64;
        self.state = UploadState::Receiving;
    }

    /// Move to a terminal state. Returns `false` if already terminal.
    pub(crate) fn close(&mut self, state: UploadState) -> bool {
        debug_assert!(!state.is_active());
        if !self.state.is_active() {
            return false;
        }
        self.state = state;
        true
    }
}
