use storage::StorageError;

/// Errors from reading or writing rename leases.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    /// The backing storage failed.
    #[error("lease storage: {0}")]
    Storage(#[from] StorageError),

    /// A stored lease could not be decoded.
    #[error("malformed lease for {project}: {source}")]
    Malformed {
        /// Project key the lease was stored under.
        project: String,
        /// Decoding error.
        source: serde_json::Error,
    },

    /// A stored lease could not be encoded.
    #[error("encoding lease: {0}")]
    Encode(#[source] serde_json::Error),

    /// The store could not be reached.
    #[error("lease store {store} unavailable: {reason}")]
    Unavailable {
        /// Name of the store.
        store: &'static str,
        /// Why the store is unavailable.
        reason: String,
    },
}
