//! API server builder and router

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::any;
use lease::LeaseStore;
use serde::Deserialize;
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::error::{RegistryError, RegistryResult};
use crate::gate::{AdmissionGate, DEFAULT_LEASE_TIMEOUT};
use crate::route::{Route, validate_repository};
use crate::storage::RegistryStorage;
use crate::upload::UploadManager;

/// Default request body limit, which bounds a single chunk.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");
pub(crate) const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");
const DOCKER_DISTRIBUTION_API_VERSION: HeaderName =
    HeaderName::from_static("docker-distribution-api-version");

/// Registry builder for configuring and creating the OCI registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: storage::Storage,
    bucket: String,
    lease_store: Option<Arc<dyn LeaseStore>>,
    lease_timeout: Duration,
    read_only: bool,
    max_chunk_size: usize,
}

impl RegistryBuilder {
    /// Create a new registry builder over a storage backend
    pub fn new(storage: storage::Storage) -> Self {
        Self {
            storage,
            bucket: "registry".to_string(),
            lease_store: None,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            read_only: false,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Gate writes on rename leases held in `store`.
    ///
    /// Without a lease store every write is admitted.
    pub fn lease_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    /// Bound on a single lease lookup.
    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    /// Refuse every write.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Largest request body accepted, and so the largest single chunk.
    pub fn max_chunk_size(mut self, bytes: usize) -> Self {
        self.max_chunk_size = bytes;
        self
    }

    /// Build the shared state without wrapping it in a router.
    pub fn state(self) -> RegistryState {
        let storage = RegistryStorage::new(self.storage, self.bucket);
        let gate = match self.lease_store {
            Some(store) => AdmissionGate::new(store, self.lease_timeout),
            None => AdmissionGate::disabled(),
        };

        RegistryState {
            uploads: Arc::new(UploadManager::new(storage.clone())),
            storage,
            gate,
            read_only: self.read_only,
        }
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let limit = self.max_chunk_size;
        router(self.state(), limit)
    }
}

/// State shared by every request.
#[derive(Debug, Clone)]
pub struct RegistryState {
    pub(crate) storage: RegistryStorage,
    pub(crate) uploads: Arc<UploadManager>,
    pub(crate) gate: AdmissionGate,
    pub(crate) read_only: bool,
}

impl RegistryState {
    /// Number of uploads in progress.
    pub fn active_uploads(&self) -> usize {
        self.uploads.active()
    }

    /// Refuse writes in read-only mode.
    pub(crate) fn ensure_writable(&self) -> RegistryResult<()> {
        if self.read_only {
            Err(RegistryError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Full check for a mutating request against `repository`.
    pub(crate) async fn authorize_write(&self, repository: &str) -> RegistryResult<()> {
        self.ensure_writable()?;
        self.gate.admit(repository).await
    }
}

/// Build a router over existing state.
pub fn router(state: RegistryState, max_chunk_size: usize) -> Router {
    Router::new()
        .route("/v2", any(dispatch))
        .route("/v2/", any(dispatch))
        .route("/v2/{*path}", any(dispatch))
        .layer(DefaultBodyLimit::max(max_chunk_size))
        .layer(SetResponseHeaderLayer::overriding(
            DOCKER_DISTRIBUTION_API_VERSION,
            HeaderValue::from_static("registry/2.0"),
        ))
        .with_state(state)
}

/// Query parameters understood by any endpoint.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Params {
    pub digest: Option<String>,
    pub mount: Option<String>,
    pub from: Option<String>,
    pub n: Option<usize>,
    pub last: Option<String>,
}

#[tracing::instrument(skip_all, fields(%method, path = uri.path()))]
async fn dispatch(
    State(state): State<RegistryState>,
    method: Method,
    uri: Uri,
    params: Result<Query<Params>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let Query(params) =
        params.map_err(|rejection| RegistryError::InvalidQuery(rejection.body_text()))?;
    let tail = uri.path().strip_prefix("/v2").unwrap_or_default();
    let route = Route::parse(tail).ok_or_else(|| RegistryError::NameUnknown(uri.path().into()))?;
    if let Some(name) = route.repository() {
        validate_repository(name)?;
    }

    match (route, &method) {
        (Route::Base, &Method::GET | &Method::HEAD) => Ok(api_version_check().into_response()),
        (Route::Catalog, &Method::GET) => crate::manifest::catalog(&state, &params).await,
        (Route::Tags { name }, &Method::GET) => {
            crate::manifest::list_tags(&state, name, &params).await
        }

        (Route::Blob { name, digest }, &Method::GET) => {
            crate::blob::get_blob(&state, name, digest, false).await
        }
        (Route::Blob { name, digest }, &Method::HEAD) => {
            crate::blob::get_blob(&state, name, digest, true).await
        }
        (Route::Blob { name, digest }, &Method::DELETE) => {
            state.authorize_write(name).await?;
            crate::blob::delete_blob(&state, name, digest).await
        }

        (Route::Uploads { name }, &Method::POST) => {
            state.authorize_write(name).await?;
            crate::blob::start_upload(&state, name, &params, body).await
        }
        (Route::Upload { name, id }, &Method::GET) => {
            crate::blob::upload_status(&state, name, id).await
        }
        (Route::Upload { name, id }, &Method::PATCH) => {
            state.authorize_write(name).await?;
            crate::blob::patch_upload(&state, name, id, &headers, body).await
        }
        (Route::Upload { name, id }, &Method::PUT) => {
            state.authorize_write(name).await?;
            crate::blob::finish_upload(&state, name, id, &params, &headers, body).await
        }
        (Route::Upload { name, id }, &Method::DELETE) => {
            state.ensure_writable()?;
            crate::blob::cancel_upload(&state, name, id).await
        }

        (Route::Manifest { name, reference }, &Method::GET) => {
            crate::manifest::get_manifest(&state, name, reference, false).await
        }
        (Route::Manifest { name, reference }, &Method::HEAD) => {
            crate::manifest::get_manifest(&state, name, reference, true).await
        }
        (Route::Manifest { name, reference }, &Method::PUT) => {
            state.authorize_write(name).await?;
            crate::manifest::put_manifest(&state, name, reference, &headers, body).await
        }
        (Route::Manifest { name, reference }, &Method::DELETE) => {
            state.authorize_write(name).await?;
            crate::manifest::delete_manifest(&state, name, reference).await
        }

        _ => Err(RegistryError::MethodNotAllowed),
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}
