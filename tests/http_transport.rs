//! Integration tests for the HTTP transport against a mock server.
//!
//! These exercise the full stack — client config, envelope parsing, status
//! mapping, and the merge-patch fallback — over real HTTP.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;

use serde_json::{json, Value};
use strata_sdk::{Strata, StrataConfig, StrataError, TransportError, WriteOptions};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> Strata {
    Strata::with_config(StrataConfig {
        token: "test-token".to_owned(),
        base_url: server.uri(),
        ..StrataConfig::default()
    })
    .unwrap()
}

fn envelope(data: Value) -> Value {
    json!({"request_id": "req-1", "data": data})
}

fn read_body(version: u64, data: Value) -> Value {
    envelope(json!({
        "data": data,
        "metadata": {
            "version": version,
            "created_time": "2026-01-10T12:00:00Z",
            "deletion_time": "",
            "destroyed": false,
            "custom_metadata": null,
        }
    }))
}

fn write_body(version: u64) -> Value {
    envelope(json!({
        "version": version,
        "created_time": "2026-01-10T12:00:00Z",
        "deletion_time": "",
        "destroyed": false,
        "custom_metadata": null,
    }))
}

#[tokio::test]
async fn get_sends_bearer_token_and_parses_envelope() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/myapp/db"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_body(3, json!({"a": 1}))))
        .expect(1)
        .mount(&server)
        .await;

    let secret = client(&server).kv("secret").get("myapp/db").await.unwrap();

    assert_eq!(secret.version_metadata.unwrap().version, 3);
    assert_eq!(secret.data.unwrap()["a"], json!(1));
}

#[tokio::test]
async fn get_version_passes_the_version_query_param() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app"))
        .and(query_param("version", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_body(2, json!({"old": true}))))
        .expect(1)
        .mount(&server)
        .await;

    let secret = client(&server).kv("secret").get_version("app", 2).await.unwrap();
    assert_eq!(secret.version_metadata.unwrap().version, 2);
}

#[tokio::test]
async fn missing_secret_maps_404_to_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"message": "not found"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).kv("secret").get("gone").await.unwrap_err();
    assert!(matches!(err, StrataError::NotFound { .. }));
}

#[tokio::test]
async fn put_issues_a_put_with_the_wrapped_body() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/secret/data/app"))
        .and(body_json(json!({"data": {"k": "v"}, "options": {"cas": 1}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(write_body(2)))
        .expect(1)
        .mount(&server)
        .await;

    let mut data = HashMap::new();
    data.insert("k".to_owned(), json!("v"));

    let secret = client(&server)
        .kv("secret")
        .put("app", &data, &WriteOptions::with_cas(1))
        .await
        .unwrap();

    assert_eq!(secret.version_metadata.unwrap().version, 2);
    assert!(secret.data.is_none());
}

#[tokio::test]
async fn cas_rejection_maps_409_to_cas_mismatch() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/secret/data/app"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"message": "check-and-set parameter did not match the current version"}
        })))
        .mount(&server)
        .await;

    let mut data = HashMap::new();
    data.insert("k".to_owned(), json!("v"));

    let err = client(&server)
        .kv("secret")
        .put("app", &data, &WriteOptions::with_cas(7))
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::CasMismatch { ref message, .. }
        if message.contains("check-and-set")));
}

#[tokio::test]
async fn patch_sends_the_merge_patch_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/secret/data/app"))
        .and(header("Content-Type", "application/merge-patch+json"))
        .and(body_json(json!({"data": {"b": 2}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(write_body(4)))
        .expect(1)
        .mount(&server)
        .await;

    let mut data = HashMap::new();
    data.insert("b".to_owned(), json!(2));

    let secret = client(&server)
        .kv("secret")
        .patch("app", &data, &WriteOptions::default())
        .await
        .unwrap();

    assert_eq!(secret.version_metadata.unwrap().version, 4);
}

#[tokio::test]
async fn patch_falls_back_to_read_then_write_on_405() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/secret/data/app"))
        .respond_with(ResponseTemplate::new(405).set_body_json(json!({
            "error": {"message": "method not allowed"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(read_body(4, json!({"a": 1}))))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v1/secret/data/app"))
        .and(body_json(json!({"data": {"a": 1, "b": 2}, "options": {"cas": 4}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(write_body(5)))
        .expect(1)
        .mount(&server)
        .await;

    let mut data = HashMap::new();
    data.insert("b".to_owned(), json!(2));

    let secret = client(&server)
        .kv("secret")
        .patch("app", &data, &WriteOptions::default())
        .await
        .unwrap();

    assert_eq!(secret.version_metadata.unwrap().version, 5);
}

#[tokio::test]
async fn forbidden_patch_names_the_missing_capability() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/secret/data/app"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"message": "permission denied"}
        })))
        .mount(&server)
        .await;

    let mut data = HashMap::new();
    data.insert("b".to_owned(), json!(2));

    let err = client(&server)
        .kv("secret")
        .patch("app", &data, &WriteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::PatchDenied { .. }));
    assert!(err.to_string().contains("\"patch\" capability"));
}

#[tokio::test]
async fn server_error_message_is_extracted_from_the_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/app"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "storage backend unavailable"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).kv("secret").get("app").await.unwrap_err();
    assert!(matches!(
        err,
        StrataError::Transport(TransportError::Api { status: 500, ref message })
            if message == "storage backend unavailable"
    ));
}

#[tokio::test]
async fn cancelled_token_aborts_before_the_round_trip() {
    let server = MockServer::start().await;

    // No mocks mounted: a request reaching the server would fail the
    // request count assertions below, but none should be issued.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let client = Strata::with_config(StrataConfig {
        token: "test-token".to_owned(),
        base_url: server.uri(),
        cancel,
        ..StrataConfig::default()
    })
    .unwrap();

    let err = client.kv("secret").get("app").await.unwrap_err();
    assert!(matches!(
        err,
        StrataError::Transport(TransportError::Cancelled)
    ));
}

#[tokio::test]
async fn delete_issues_a_delete_on_the_data_path() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/secret/data/app"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).kv("secret").delete("app").await.unwrap();
}
