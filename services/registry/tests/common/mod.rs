//! Helpers shared by the HTTP integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use camino::Utf8Path;
use registry::RegistryBuilder;
use storage::{Driver, MemoryStorage, Metadata, Reader, StorageError, StorageErrorKind, Writer};
use tokio::io::AsyncReadExt;
use tower::ServiceExt;

pub const BUCKET: &str = "test-registry";

/// Builder over fresh in-memory storage.
pub fn builder() -> RegistryBuilder {
    let storage = MemoryStorage::with_buckets(&[BUCKET]);
    RegistryBuilder::new(storage.into()).bucket(BUCKET)
}

/// In-memory storage whose appends and renames can be made to fail.
///
/// A failing append still writes the first half of its chunk, like a
/// connection dropped mid-transfer.
#[derive(Debug)]
pub struct Flaky {
    inner: MemoryStorage,
    pub fail_append: AtomicBool,
    pub fail_rename: AtomicBool,
}

impl Flaky {
    pub fn new() -> Arc<Self> {
        Arc::new(Flaky {
            inner: MemoryStorage::with_buckets(&[BUCKET]),
            fail_append: AtomicBool::new(false),
            fail_rename: AtomicBool::new(false),
        })
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn fault(remote: &Utf8Path) -> StorageError {
        StorageError::builder(
            "flaky",
            StorageErrorKind::Io,
            std::io::Error::other("connection reset"),
        )
        .bucket(BUCKET)
        .path(remote.as_str())
        .build()
    }
}

#[async_trait::async_trait]
impl Driver for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.inner.delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.inner.metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.inner.upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.inner.download(bucket, remote, writer).await
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        if !self.fail_append.load(Ordering::SeqCst) {
            return self.inner.append(bucket, remote, reader).await;
        }

        let mut chunk = Vec::new();
        reader
            .read_to_end(&mut chunk)
            .await
            .map_err(|err| StorageError::from_io("flaky", err))?;
        let torn = &chunk[..chunk.len() / 2];
        self.inner.append(bucket, remote, &mut &torn[..]).await?;
        Err(Self::fault(remote))
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        if self.fail_rename.load(Ordering::SeqCst) {
            return Err(Self::fault(from));
        }
        self.inner.rename(bucket, from, to).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }
}

/// Router over a [`Flaky`] driver.
pub fn flaky() -> (Arc<Flaky>, Router) {
    let driver = Flaky::new();
    let app = RegistryBuilder::new(driver.clone().into())
        .bucket(BUCKET)
        .build();
    (driver, app)
}

/// Send one request through the router.
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> Response<Body> {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    app.clone()
        .oneshot(request.body(body.into()).unwrap())
        .await
        .unwrap()
}

/// Header value as text, panicking if absent.
pub fn header<'r>(response: &'r Response<Body>, name: &str) -> &'r str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing {name} header"))
        .to_str()
        .unwrap()
}

/// Full response body.
pub async fn body(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// First OCI error code in an error response.
pub async fn error_code(response: Response<Body>) -> String {
    let value: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    value["errors"][0]["code"].as_str().unwrap().to_string()
}

/// Start an upload, returning its location.
pub async fn start_upload(app: &Router, name: &str) -> String {
    let response = send(app, "POST", &format!("/v2/{name}/blobs/uploads/"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    header(&response, "location").to_string()
}

/// Upload a whole blob in one PATCH and a PUT.
pub async fn push_blob(app: &Router, name: &str, data: &[u8]) -> String {
    let location = start_upload(app, name).await;
    let response = send(app, "PATCH", &location, &[], data.to_vec()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let digest = registry::digest::Digest::of(registry::digest::Algorithm::Sha256, data);
    let response = send(app, "PUT", &format!("{location}?digest={digest}"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    digest.to_string()
}

pub fn manifest() -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "size": 2,
            "digest": registry::digest::Digest::of(registry::digest::Algorithm::Sha256, b"{}").to_string(),
        },
        "layers": []
    }))
    .unwrap()
}

pub const MANIFEST_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
