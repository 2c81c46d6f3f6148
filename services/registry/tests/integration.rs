//! Integration tests for the OCI registry

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use registry::digest::{Algorithm, Digest};

use common::{MANIFEST_TYPE, body, builder, error_code, header, manifest, push_blob, send};

#[tokio::test]
async fn test_api_version_check() {
    let app = builder().build();

    let response = send(&app, "GET", "/v2/", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header(&response, "docker-distribution-api-version"),
        "registry/2.0"
    );
}

#[tokio::test]
async fn test_blob_upload_and_download() {
    let app = builder().build();
    let data = b"Hello, OCI Registry!";
    let digest = Digest::of(Algorithm::Sha256, data).to_string();

    let response = send(&app, "POST", "/v2/test-repo/blobs/uploads/", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let upload_url = header(&response, "location").to_string();

    // Complete with the whole blob as the final chunk
    let response = send(
        &app,
        "PUT",
        &format!("{upload_url}?digest={digest}"),
        &[],
        data.to_vec(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header(&response, "location"),
        format!("/v2/test-repo/blobs/{digest}")
    );

    let response = send(&app, "GET", &format!("/v2/test-repo/blobs/{digest}"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "docker-content-digest"), digest);
    assert_eq!(body(response).await, data);
}

#[tokio::test]
async fn test_blob_head() {
    let app = builder().build();
    let digest = push_blob(&app, "test-repo", b"test blob data").await;

    let response = send(&app, "HEAD", &format!("/v2/test-repo/blobs/{digest}"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-length"), "14");
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_blob_delete() {
    let app = builder().build();
    let digest = push_blob(&app, "test-repo", b"short lived").await;
    let uri = format!("/v2/test-repo/blobs/{digest}");

    let response = send(&app, "DELETE", &uri, &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, "GET", &uri, &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");
}

#[tokio::test]
async fn test_manifest_upload_and_download() {
    let app = builder().build();
    let manifest_bytes = manifest();

    let response = send(
        &app,
        "PUT",
        "/v2/test-repo/manifests/latest",
        &[("content-type", MANIFEST_TYPE)],
        manifest_bytes.clone(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let digest = header(&response, "docker-content-digest").to_string();
    assert_eq!(
        digest,
        Digest::of(Algorithm::Sha256, &manifest_bytes).to_string()
    );

    // By tag
    let response = send(&app, "GET", "/v2/test-repo/manifests/latest", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), MANIFEST_TYPE);
    assert_eq!(body(response).await, manifest_bytes);

    // By digest
    let response = send(&app, "GET", &format!("/v2/test-repo/manifests/{digest}"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(response).await, manifest_bytes);
}

#[tokio::test]
async fn test_manifest_put_by_digest_is_verified() {
    let app = builder().build();
    let wrong = Digest::of(Algorithm::Sha256, b"not the manifest");

    let response = send(
        &app,
        "PUT",
        &format!("/v2/test-repo/manifests/{wrong}"),
        &[("content-type", MANIFEST_TYPE)],
        manifest(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");
}

#[tokio::test]
async fn test_manifest_rejects_unknown_type() {
    let app = builder().build();
    let response = send(
        &app,
        "PUT",
        "/v2/test-repo/manifests/latest",
        &[("content-type", "text/plain")],
        manifest(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_tag_delete_keeps_manifest() {
    let app = builder().build();
    let response = send(
        &app,
        "PUT",
        "/v2/test-repo/manifests/v1",
        &[("content-type", MANIFEST_TYPE)],
        manifest(),
    )
    .await;
    let digest = header(&response, "docker-content-digest").to_string();

    let response = send(&app, "DELETE", "/v2/test-repo/manifests/v1", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = send(&app, "GET", "/v2/test-repo/manifests/v1", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = send(&app, "GET", &format!("/v2/test-repo/manifests/{digest}"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Deleting by digest removes the manifest itself
    let response = send(&app, "DELETE", &format!("/v2/test-repo/manifests/{digest}"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let response = send(&app, "GET", &format!("/v2/test-repo/manifests/{digest}"), &[], Body::empty()).await;
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");
}

#[tokio::test]
async fn test_list_tags() {
    let app = builder().build();

    for tag in ["v1.0", "v1.1", "latest"] {
        let response = send(
            &app,
            "PUT",
            &format!("/v2/test-repo/manifests/{tag}"),
            &[("content-type", MANIFEST_TYPE)],
            manifest(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = send(&app, "GET", "/v2/test-repo/tags/list", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let tag_list: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(tag_list["name"], "test-repo");
    assert_eq!(tag_list["tags"], serde_json::json!(["latest", "v1.0", "v1.1"]));

    let response = send(&app, "GET", "/v2/test-repo/tags/list?n=1&last=latest", &[], Body::empty()).await;
    let tag_list: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(tag_list["tags"], serde_json::json!(["v1.0"]));
}

#[tokio::test]
async fn malformed_page_size_is_an_oci_error() {
    let app = builder().build();

    for uri in ["/v2/test-repo/tags/list?n=abc", "/v2/_catalog?n=-1"] {
        let response = send(&app, "GET", uri, &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(error_code(response).await, "PAGINATION_NUMBER_INVALID");
    }
}

#[tokio::test]
async fn test_catalog() {
    let app = builder().build();
    for name in ["foo/bar", "alpha", "foo/bar/baz"] {
        send(
            &app,
            "PUT",
            &format!("/v2/{name}/manifests/latest"),
            &[("content-type", MANIFEST_TYPE)],
            manifest(),
        )
        .await;
    }

    let response = send(&app, "GET", "/v2/_catalog", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let catalog: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(
        catalog["repositories"],
        serde_json::json!(["alpha", "foo/bar", "foo/bar/baz"])
    );
}

#[tokio::test]
async fn test_blob_not_found() {
    let app = builder().build();
    let missing = Digest::of(Algorithm::Sha256, b"never pushed");

    let response = send(&app, "GET", &format!("/v2/test-repo/blobs/{missing}"), &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");
}

#[tokio::test]
async fn test_manifest_not_found() {
    let app = builder().build();
    let response = send(&app, "GET", "/v2/test-repo/manifests/nonexistent", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");
}

#[tokio::test]
async fn test_invalid_digest() {
    let app = builder().build();

    for digest in ["invalid-digest", "sha256:nonexistent", "md5:abc"] {
        let response = send(&app, "GET", &format!("/v2/test-repo/blobs/{digest}"), &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{digest}");
        assert_eq!(error_code(response).await, "DIGEST_INVALID");
    }
}

#[tokio::test]
async fn test_invalid_repository_name() {
    let app = builder().build();
    let response = send(&app, "GET", "/v2/Upper/Case/tags/list", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "NAME_INVALID");
}

#[tokio::test]
async fn test_unknown_route_and_method() {
    let app = builder().build();

    let response = send(&app, "GET", "/v2/foo/bar", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "NAME_UNKNOWN");

    let response = send(&app, "POST", "/v2/foo/tags/list", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_code(response).await, "UNSUPPORTED");
}
