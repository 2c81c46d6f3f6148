//! Manifest, tag and catalog operations for the registry

use axum::Json;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::api::{DOCKER_CONTENT_DIGEST, Params, RegistryState};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::route::Reference;

const DEFAULT_MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Get a manifest by tag or digest, or only its headers for `HEAD`
#[tracing::instrument(skip(state))]
pub(crate) async fn get_manifest(
    state: &RegistryState,
    name: &str,
    reference: &str,
    head: bool,
) -> RegistryResult<Response> {
    let digest = resolve(state, name, &Reference::parse(reference)?).await?;
    let data = state.storage.get_manifest(name, &digest).await?;

    let headers = [
        (header::CONTENT_TYPE, detect_manifest_type(&data)),
        (DOCKER_CONTENT_DIGEST, digest.to_string()),
        (header::CONTENT_LENGTH, data.len().to_string()),
    ];

    if head {
        Ok((StatusCode::OK, headers).into_response())
    } else {
        Ok((StatusCode::OK, headers, data).into_response())
    }
}

/// Put a manifest
///
/// Pushing by digest verifies the body against it; pushing by tag also
/// points the tag at the stored manifest.
#[tracing::instrument(skip(state, headers, body), fields(len = body.len()))]
pub(crate) async fn put_manifest(
    state: &RegistryState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/vnd.docker.distribution.manifest.v2+json");
    validate_manifest_type(content_type)?;

    if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
        return Err(RegistryError::InvalidManifest("body is not JSON".into()));
    }

    let tag = match Reference::parse(reference)? {
        Reference::Tag(tag) => Some(tag),
        Reference::Digest(expected) => {
            let actual = Digest::of(expected.algorithm(), &body);
            if actual != expected {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
            None
        }
    };

    let digest = state
        .storage
        .put_manifest(name, tag.as_deref(), &body)
        .await?;
    tracing::info!(%digest, ?tag, "manifest stored");

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/v2/{name}/manifests/{digest}")),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response())
}

/// Delete a manifest by digest, or only a tag
#[tracing::instrument(skip(state))]
pub(crate) async fn delete_manifest(
    state: &RegistryState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    match Reference::parse(reference)? {
        Reference::Digest(digest) => state.storage.delete_manifest(name, &digest).await?,
        Reference::Tag(tag) => state.storage.delete_tag(name, &tag).await?,
    }
    tracing::info!(%reference, "manifest reference deleted");
    Ok(StatusCode::ACCEPTED.into_response())
}

/// List tags for a repository
#[tracing::instrument(skip(state, params))]
pub(crate) async fn list_tags(
    state: &RegistryState,
    name: &str,
    params: &Params,
) -> RegistryResult<Response> {
    let tags = paginate(state.storage.list_tags(name).await?, params);
    Ok(Json(TagList {
        name: name.to_string(),
        tags,
    })
    .into_response())
}

/// List repositories
#[tracing::instrument(skip(state, params))]
pub(crate) async fn catalog(state: &RegistryState, params: &Params) -> RegistryResult<Response> {
    let repositories = paginate(state.storage.list_repositories().await?, params);
    Ok(Json(Catalog { repositories }).into_response())
}

async fn resolve(
    state: &RegistryState,
    name: &str,
    reference: &Reference,
) -> RegistryResult<Digest> {
    match reference {
        Reference::Tag(tag) => state.storage.resolve_tag(name, tag).await,
        Reference::Digest(digest) => Ok(digest.clone()),
    }
}

/// Apply `?last=` and `?n=` to a sorted listing.
fn paginate(items: Vec<String>, params: &Params) -> Vec<String> {
    let start = match &params.last {
        Some(last) => items.partition_point(|item| item <= last),
        None => 0,
    };
    let take = params.n.unwrap_or(usize::MAX);
    items.into_iter().skip(start).take(take).collect()
}

/// Tag list response
#[derive(Debug, serde::Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// Catalog response
#[derive(Debug, serde::Serialize)]
struct Catalog {
    repositories: Vec<String>,
}

/// Detect manifest type from content
fn detect_manifest_type(data: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) {
        if let Some(media_type) = json.get("mediaType").and_then(|v| v.as_str()) {
            return media_type.to_string();
        }

        if let Some(schema_version) = json.get("schemaVersion").and_then(|v| v.as_u64()) {
            return match schema_version {
                1 => "application/vnd.docker.distribution.manifest.v1+json".to_string(),
                2 if json.get("manifests").is_some() => {
                    "application/vnd.oci.image.index.v1+json".to_string()
                }
                _ => DEFAULT_MANIFEST_TYPE.to_string(),
            };
        }
    }

    DEFAULT_MANIFEST_TYPE.to_string()
}

/// Validate manifest type
fn validate_manifest_type(content_type: &str) -> RegistryResult<()> {
    // Parameters such as `; charset=utf-8` do not affect the type.
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    match media_type {
        "application/vnd.docker.distribution.manifest.v1+json"
        | "application/vnd.docker.distribution.manifest.v1+prettyjws"
        | "application/vnd.docker.distribution.manifest.v2+json"
        | "application/vnd.docker.distribution.manifest.list.v2+json"
        | "application/vnd.oci.image.manifest.v1+json"
        | "application/vnd.oci.image.index.v1+json" => Ok(()),
        _ => Err(RegistryError::UnsupportedManifestType(
            content_type.to_string(),
        )),
    }
}
