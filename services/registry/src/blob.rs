//! Blob and blob upload operations for the registry

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::api::{DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID, Params, RegistryState};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::upload::{ChunkRange, UploadId, range_header};

/// Get a blob, or only its headers for `HEAD`
#[tracing::instrument(skip(state))]
pub(crate) async fn get_blob(
    state: &RegistryState,
    name: &str,
    digest: &str,
    head: bool,
) -> RegistryResult<Response> {
    let digest = RegistryError::parse_digest(digest)?;
    let descriptor = state.storage.blob_descriptor(&digest).await?;

    let headers = [
        (header::CONTENT_TYPE, descriptor.media_type.to_string()),
        (header::CONTENT_LENGTH, descriptor.size.to_string()),
        (DOCKER_CONTENT_DIGEST, digest.to_string()),
    ];

    if head {
        return Ok((StatusCode::OK, headers).into_response());
    }

    let data = state.storage.get_blob(&digest).await?;
    Ok((StatusCode::OK, headers, data).into_response())
}

/// Delete a blob
#[tracing::instrument(skip(state))]
pub(crate) async fn delete_blob(
    state: &RegistryState,
    name: &str,
    digest: &str,
) -> RegistryResult<Response> {
    let digest = RegistryError::parse_digest(digest)?;
    state.storage.delete_blob(&digest).await?;
    tracing::info!(%digest, "blob deleted");
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Start a blob upload session
///
/// `?mount=<digest>` short-circuits when the blob is already stored, and
/// `?digest=<digest>` uploads the request body in one step.
#[tracing::instrument(skip(state, params, body), fields(len = body.len()))]
pub(crate) async fn start_upload(
    state: &RegistryState,
    name: &str,
    params: &Params,
    body: Bytes,
) -> RegistryResult<Response> {
    let digest = params
        .digest
        .as_deref()
        .map(RegistryError::parse_digest)
        .transpose()?;

    if let Some(mount) = params.mount.as_deref() {
        let mount = RegistryError::parse_digest(mount)?;
        if state.storage.blob_exists(&mount).await? {
            tracing::debug!(%mount, from = ?params.from, "blob mounted");
            return Ok(created(name, &mount));
        }
    }

    let id = state.uploads.start(name).await?;

    let Some(digest) = digest else {
        return Ok((
            StatusCode::ACCEPTED,
            [
                (header::LOCATION, upload_location(name, &id)),
                (header::RANGE, range_header(0)),
                (DOCKER_UPLOAD_UUID, id.to_string()),
                (header::CONTENT_LENGTH, "0".to_string()),
            ],
        )
            .into_response());
    };

    // Monolithic upload: the client holds no reference to the session, so it
    // is not kept around after a failure.
    match state
        .uploads
        .finalize(name, &id, &digest, Some((None, &body[..])))
        .await
    {
        Ok(done) => Ok(created(name, &done.digest)),
        Err(error) => {
            if let Err(cancel) = state.uploads.cancel(name, &id).await {
                tracing::debug!(upload = %id, error = %cancel, "monolithic session already closed");
            }
            Err(error)
        }
    }
}

/// Report how many bytes an upload has accepted
#[tracing::instrument(skip(state))]
pub(crate) async fn upload_status(
    state: &RegistryState,
    name: &str,
    id: &str,
) -> RegistryResult<Response> {
    let id = parse_upload_id(id)?;
    let offset = state.uploads.status(name, &id).await?;
    Ok(progress(StatusCode::NO_CONTENT, name, &id, offset))
}

/// Append a chunk to an upload
#[tracing::instrument(skip(state, headers, body), fields(len = body.len()))]
pub(crate) async fn patch_upload(
    state: &RegistryState,
    name: &str,
    id: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let id = parse_upload_id(id)?;
    let range = content_range(headers)?;
    let offset = state.uploads.append(name, &id, range, &body).await?;
    Ok(progress(StatusCode::ACCEPTED, name, &id, offset))
}

/// Complete a blob upload, with an optional final chunk in the body
#[tracing::instrument(skip(state, params, headers, body), fields(len = body.len()))]
pub(crate) async fn finish_upload(
    state: &RegistryState,
    name: &str,
    id: &str,
    params: &Params,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let id = parse_upload_id(id)?;
    let digest = params
        .digest
        .as_deref()
        .ok_or_else(|| RegistryError::BlobUploadInvalid("missing digest parameter".into()))
        .and_then(RegistryError::parse_digest)?;

    let trailing = if body.is_empty() {
        None
    } else {
        Some((content_range(headers)?, &body[..]))
    };

    let done = state
        .uploads
        .finalize(name, &id, &digest, trailing)
        .await?;
    Ok(created(name, &done.digest))
}

/// Cancel a blob upload
#[tracing::instrument(skip(state))]
pub(crate) async fn cancel_upload(
    state: &RegistryState,
    name: &str,
    id: &str,
) -> RegistryResult<Response> {
    let id = parse_upload_id(id)?;
    state.uploads.cancel(name, &id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// A reference that does not parse cannot name a session.
fn parse_upload_id(id: &str) -> RegistryResult<UploadId> {
    id.parse()
        .map_err(|_| RegistryError::BlobUploadUnknown(id.to_string()))
}

fn content_range(headers: &HeaderMap) -> RegistryResult<Option<ChunkRange>> {
    headers
        .get(header::CONTENT_RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| RegistryError::BlobUploadInvalid("Content-Range is not text".into()))?
                .parse()
        })
        .transpose()
}

fn upload_location(name: &str, id: &UploadId) -> String {
    format!("/v2/{name}/blobs/uploads/{id}")
}

fn progress(status: StatusCode, name: &str, id: &UploadId, offset: u64) -> Response {
    (
        status,
        [
            (header::LOCATION, upload_location(name, id)),
            (header::RANGE, range_header(offset)),
            (DOCKER_UPLOAD_UUID, id.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}

fn created(name: &str, digest: &Digest) -> Response {
    (
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/v2/{name}/blobs/{digest}")),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}
