#![allow(clippy::unwrap_used)]
// Integration tests for `HttpClient` using wiremock.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stowage_api::{Error, Headers, HttpClient, Method};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpClient) {
    let server = MockServer::start().await;
    (server, HttpClient::with_client(reqwest::Client::new()))
}

fn url(server: &MockServer, suffix: &str) -> Url {
    Url::parse(&format!("{}{suffix}", server.uri())).unwrap()
}

// ── Decoding ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_decodes_json() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a"}])))
        .mount(&server)
        .await;

    let body = client
        .get(&url(&server, "/users"), &Headers::new())
        .await
        .unwrap();
    assert_eq!(body, json!([{"id": "a"}]));
    assert_eq!(client.cache().len(), 1);
}

#[tokio::test]
async fn test_not_found_maps_to_http_error() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
        .mount(&server)
        .await;

    let err = client
        .get(&url(&server, "/missing"), &Headers::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "expected 404, got: {err:?}");
    assert!(matches!(err, Error::Http { status: 404, .. }));
}

#[tokio::test]
async fn test_custom_headers_are_sent() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/secure"))
        .and(header("X-Token", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let headers = Headers::from([("X-Token".to_string(), "abc".to_string())]);
    let body = client.get(&url(&server, "/secure"), &headers).await.unwrap();
    assert_eq!(body["ok"], json!(true));
}

// ── Conditional caching ─────────────────────────────────────────────

#[tokio::test]
async fn test_etag_revalidation_serves_cached_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(json!([1, 2, 3])),
        )
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let target = url(&server, "/items");
    let first = client.get(&target, &Headers::new()).await.unwrap();
    let second = client.get(&target, &Headers::new()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second, json!([1, 2, 3]));
}

#[tokio::test]
async fn test_expire_forces_full_fetch() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_json(json!([1])),
        )
        .expect(2)
        .mount(&server)
        .await;

    let target = url(&server, "/items");
    client.get(&target, &Headers::new()).await.unwrap();

    let mut rx = client.cache().subscribe();
    assert!(client.cache().expire(target.as_str(), false));
    assert_eq!(rx.recv().await.unwrap().uri, target.as_str());

    client.get(&target, &Headers::new()).await.unwrap();
}

// ── Permission bits ─────────────────────────────────────────────────

#[tokio::test]
async fn test_allow_header_sets_permission_bits() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/users/a"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Allow", "GET, PUT, PATCH, DELETE")
                .set_body_json(json!({"id": "a"})),
        )
        .mount(&server)
        .await;

    let target = url(&server, "/users/a");
    assert_eq!(client.allows(&target, &Method::PATCH), None);

    client.get(&target, &Headers::new()).await.unwrap();
    assert_eq!(client.allows(&target, &Method::PATCH), Some(true));
    assert_eq!(client.allows(&target, &Method::POST), Some(false));
}

#[tokio::test]
async fn test_put_sends_body() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/users/a"))
        .and(wiremock::matchers::body_json(json!({"name": "Ann"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let body = client
        .put(&url(&server, "/users/a"), &json!({"name": "Ann"}), &Headers::new())
        .await
        .unwrap();
    assert_eq!(body, serde_json::Value::Null);
}

// ── JSONP ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_jsonp_unwraps_callback() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/feed"))
        .and(query_param("cb", "stowage_cb_0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stowage_cb_0([{\"id\":1}]);"))
        .mount(&server)
        .await;

    let body = client
        .jsonp(&url(&server, "/feed"), "cb", &Headers::new())
        .await
        .unwrap();
    assert_eq!(body, json!([{"id": 1}]));
}

#[tokio::test]
async fn test_jsonp_times_out() {
    let server = MockServer::start().await;
    let client = HttpClient::with_client(reqwest::Client::new())
        .with_jsonp_timeout(Duration::from_millis(50));

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_string("stowage_cb_0([])"),
        )
        .mount(&server)
        .await;

    let err = client
        .jsonp(&url(&server, "/slow"), "callback", &Headers::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got: {err:?}");
}
