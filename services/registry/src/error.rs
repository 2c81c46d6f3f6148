//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::digest::DigestError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Upload session unknown, cancelled, or already committed
    #[error("blob upload unknown: {0}")]
    BlobUploadUnknown(String),

    /// Manifest not found
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// No route matches the request path
    #[error("name unknown: {0}")]
    NameUnknown(String),

    /// Invalid digest format
    #[error("invalid digest {digest:?}: {source}")]
    InvalidDigest {
        /// Digest as sent by the client
        digest: String,
        /// Why it was rejected
        source: DigestError,
    },

    /// Tag or reference with invalid characters
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Unsupported manifest media type
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: String,
        /// Actual digest
        actual: String,
    },

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Chunk does not start at the session offset
    #[error("range not satisfiable: {reason}")]
    RangeNotSatisfiable {
        /// Bytes the session has accepted so far
        offset: u64,
        /// What was wrong with the range
        reason: String,
    },

    /// Blob upload invalid
    #[error("blob upload invalid: {0}")]
    BlobUploadInvalid(String),

    /// Query string could not be parsed, e.g. a non-numeric `n`
    #[error("invalid query parameters: {0}")]
    InvalidQuery(String),

    /// The registry refuses writes
    #[error("registry is read-only")]
    ReadOnly,

    /// Method not supported on this path
    #[error("method not allowed")]
    MethodNotAllowed,

    /// A rename lease is held for the project
    #[error("project {project} is being renamed, retry later")]
    RenameInProgress {
        /// Project key the lease is held under
        project: String,
    },
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::BlobUploadUnknown(_)
            | RegistryError::ManifestNotFound(_)
            | RegistryError::NameUnknown(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidDigest { .. }
            | RegistryError::InvalidReference(_)
            | RegistryError::InvalidManifest(_)
            | RegistryError::InvalidRepository(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::BlobUploadInvalid(_)
            | RegistryError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            RegistryError::UnsupportedManifestType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RegistryError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::ReadOnly | RegistryError::MethodNotAllowed => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            RegistryError::RenameInProgress { .. } => StatusCode::CONFLICT,
            RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) => "BLOB_UNKNOWN",
            RegistryError::BlobUploadUnknown(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::ManifestNotFound(_) => "MANIFEST_UNKNOWN",
            RegistryError::NameUnknown(_) => "NAME_UNKNOWN",
            RegistryError::InvalidDigest { .. } => "DIGEST_INVALID",
            RegistryError::InvalidReference(_) => "TAG_INVALID",
            RegistryError::InvalidManifest(_) => "MANIFEST_INVALID",
            RegistryError::UnsupportedManifestType(_) => "MANIFEST_INVALID",
            RegistryError::DigestMismatch { .. } => "DIGEST_INVALID",
            RegistryError::InvalidRepository(_) => "NAME_INVALID",
            RegistryError::RangeNotSatisfiable { .. } => "BLOB_UPLOAD_INVALID",
            RegistryError::BlobUploadInvalid(_) => "BLOB_UPLOAD_INVALID",
            RegistryError::InvalidQuery(_) => "PAGINATION_NUMBER_INVALID",
            RegistryError::ReadOnly | RegistryError::MethodNotAllowed => "UNSUPPORTED",
            RegistryError::RenameInProgress { .. } => "RENAME_IN_PROGRESS",
            RegistryError::Storage(_) => "UNKNOWN",
        }
    }

    /// Parse a client-supplied digest, mapping failures to `DIGEST_INVALID`.
    pub(crate) fn parse_digest(digest: &str) -> RegistryResult<crate::digest::Digest> {
        digest.parse().map_err(|source| RegistryError::InvalidDigest {
            digest: digest.to_owned(),
            source,
        })
    }

    fn detail(&self) -> Option<serde_json::Value> {
        match self {
            RegistryError::RangeNotSatisfiable { offset, .. } => {
                Some(serde_json::json!({ "offset": offset }))
            }
            RegistryError::RenameInProgress { project } => {
                Some(serde_json::json!({ "project": project }))
            }
            _ => None,
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(%code, %message, "request rejected");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail {
                code,
                message,
                detail: self.detail(),
            }],
        };

        (status, axum::Json(body)).into_response()
    }
}
