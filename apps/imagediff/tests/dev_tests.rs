//! Integration tests for the dev server.
//!
//! Uses wiremock as the upstream behind the dev proxy.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::header::HOST;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use image::{Rgb, RgbImage};
use imagediff::dev::{DevState, HEAD_PLACEHOLDER, create_router};
use imagediff_core::{IMAGE_MODULE, ProxyRule, SiteConfig};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Public directory with an 8x4 image and a text file.
fn create_public_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("img")).unwrap();
    RgbImage::from_pixel(8, 4, Rgb([10, 20, 30]))
        .save(dir.path().join("img/logo.png"))
        .unwrap();
    std::fs::write(dir.path().join("robots.txt"), "User-agent: *\n").unwrap();
    dir
}

/// Site whose `/api/` rule points at `upstream`.
fn site_for(upstream: &str) -> SiteConfig {
    SiteConfig {
        dev_proxy: vec![ProxyRule::new("/api/", format!("{}/api/", upstream))],
        ..SiteConfig::with_head()
    }
}

fn create_server(site: SiteConfig, public: &TempDir) -> TestServer {
    let state = DevState::new(site, public.path()).unwrap();
    TestServer::new(create_router(state)).unwrap()
}

/// Matches requests carrying none of the named headers.
struct WithoutHeaders(&'static [&'static str]);

impl Match for WithoutHeaders {
    fn matches(&self, request: &Request) -> bool {
        self.0.iter().all(|name| !request.headers.contains_key(*name))
    }
}

/// An address nothing listens on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

// =============================================================================
// PROXY
// =============================================================================

#[tokio::test]
async fn test_proxy_rewrites_path_and_host() {
    let upstream = MockServer::start().await;
    let host = upstream.address().to_string();
    Mock::given(method("GET"))
        .and(path("/api/widgets"))
        .and(query_param("page", "2"))
        .and(header("host", host.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"widgets": [1, 2]})))
        .expect(1)
        .mount(&upstream)
        .await;

    let public = create_public_dir();
    let server = create_server(site_for(&upstream.uri()), &public);

    let response = server
        .get("/api/widgets")
        .add_query_param("page", 2)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["widgets"], json!([1, 2]));
}

#[tokio::test]
async fn test_proxy_forwards_body_and_status() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/diff"))
        .and(body_json(json!({"imageA": "a.png", "imageB": "b.png"})))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-different-pixels", "3")
                .set_body_bytes(vec![1u8, 2, 3]),
        )
        .mount(&upstream)
        .await;

    let public = create_public_dir();
    let server = create_server(site_for(&upstream.uri()), &public);

    let response = server
        .post("/api/diff")
        .json(&json!({"imageA": "a.png", "imageB": "b.png"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    assert_eq!(response.header("x-different-pixels"), "3");
    assert_eq!(response.as_bytes().as_ref(), &[1u8, 2, 3]);
}

#[tokio::test]
async fn test_proxy_relays_upstream_errors() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/builds"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"detail": "Target 'x' does not exist"})),
        )
        .mount(&upstream)
        .await;

    let public = create_public_dir();
    let server = create_server(site_for(&upstream.uri()), &public);

    let response = server.post("/api/builds").json(&json!({"target": "x"})).await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["detail"], "Target 'x' does not exist");
}

#[tokio::test]
async fn test_proxy_unreachable_upstream_is_bad_gateway() {
    let public = create_public_dir();
    let server = create_server(site_for(&closed_port_url()), &public);

    let response = server.post("/api/targets").await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert!(body["detail"].as_str().unwrap().contains("Upstream"));
}

#[tokio::test]
async fn test_proxy_drops_hop_by_hop_headers() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/targets"))
        .and(header("x-trace-id", "abc123"))
        .and(WithoutHeaders(&[
            "connection",
            "keep-alive",
            "te",
            "proxy-authorization",
            "x-session-hop",
        ]))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("keep-alive", "timeout=5")
                .insert_header("x-upstream", "yes")
                .set_body_json(json!(["alpha"])),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let public = create_public_dir();
    let server = create_server(site_for(&upstream.uri()), &public);

    let response = server
        .get("/api/targets")
        .add_header(
            HeaderName::from_static("connection"),
            HeaderValue::from_static("keep-alive, X-Session-Hop"),
        )
        .add_header(HeaderName::from_static("x-session-hop"), HeaderValue::from_static("1"))
        .add_header(HeaderName::from_static("keep-alive"), HeaderValue::from_static("timeout=5"))
        .add_header(HeaderName::from_static("te"), HeaderValue::from_static("trailers"))
        .add_header(
            HeaderName::from_static("proxy-authorization"),
            HeaderValue::from_static("Basic Zm9vOmJhcg=="),
        )
        .add_header(HeaderName::from_static("x-trace-id"), HeaderValue::from_static("abc123"))
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("x-upstream"), "yes");
    assert!(response.headers().get("keep-alive").is_none());
}

#[tokio::test]
async fn test_proxy_keeps_incoming_host_without_change_origin() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/targets"))
        .and(header("host", "dev.local:3000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&upstream)
        .await;

    let public = create_public_dir();
    let mut site = site_for(&upstream.uri());
    site.dev_proxy[0].change_origin = false;
    let server = create_server(site, &public);

    server
        .get("/api/targets")
        .add_header(HOST, HeaderValue::from_static("dev.local:3000"))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_proxy_rejects_dot_segments() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let public = create_public_dir();
    let server = create_server(site_for(&upstream.uri()), &public);

    for target in ["/api/%2e%2e/admin", "/api/widgets/%2E%2E/%2e%2e/secret"] {
        server
            .get(target)
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

#[test]
fn test_duplicate_prefixes_rejected() {
    let public = create_public_dir();
    let site = SiteConfig {
        dev_proxy: vec![
            ProxyRule::new("/api/", "http://127.0.0.1:8000/api/"),
            ProxyRule::new("/api/", "http://127.0.0.1:9000/api/"),
        ],
        ..SiteConfig::minimal()
    };
    assert!(DevState::new(site, public.path()).is_err());
}

// =============================================================================
// DEVTOOLS
// =============================================================================

#[tokio::test]
async fn test_devtools_enabled() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    let response = server.get("/__devtools").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["site"]["devtools"], true);
    assert_eq!(body["proxy"][0]["prefix"], "/api/");
    assert_eq!(body["proxy"][0]["target"], "http://127.0.0.1:8000/api/");
    assert_eq!(body["image_module"], true);
}

#[tokio::test]
async fn test_devtools_disabled() {
    let public = create_public_dir();
    let site = SiteConfig {
        devtools: false,
        ..SiteConfig::with_head()
    };
    let server = create_server(site, &public);

    server
        .get("/__devtools")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// IMAGE MODULE
// =============================================================================

#[tokio::test]
async fn test_image_resize_keeps_aspect_ratio() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    let response = server
        .get("/_image")
        .add_query_param("src", "/img/logo.png")
        .add_query_param("w", 4)
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "image/png");
    let resized = image::load_from_memory(response.as_bytes()).unwrap();
    assert_eq!((resized.width(), resized.height()), (4, 2));
}

#[tokio::test]
async fn test_image_rejects_bad_dimensions() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    server
        .get("/_image")
        .add_query_param("src", "/img/logo.png")
        .add_query_param("w", 0)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .get("/_image")
        .add_query_param("src", "/img/logo.png")
        .add_query_param("h", 5000)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .get("/_image")
        .add_query_param("w", 4)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_image_missing_source() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    server
        .get("/_image")
        .add_query_param("src", "/img/nope.png")
        .add_query_param("w", 4)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_image_module_disabled() {
    let public = create_public_dir();
    let site = SiteConfig {
        modules: vec![],
        ..SiteConfig::with_head()
    };
    assert!(!site.module_enabled(IMAGE_MODULE));
    let server = create_server(site, &public);

    server
        .get("/_image")
        .add_query_param("src", "/img/logo.png")
        .add_query_param("w", 4)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// =============================================================================
// PAGE SHELL AND STATIC FILES
// =============================================================================

#[tokio::test]
async fn test_shell_with_head() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    let response = server.get("/").await;
    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains("<html lang=\"en\">"));
    assert!(html.contains("<title>ImageDiff</title>"));
    assert!(html.contains("<link rel=\"icon\" type=\"image/x-icon\" href=\"/favicon.ico\">"));
    assert!(html.contains("<div id=\"app\"></div>"));
}

#[tokio::test]
async fn test_shell_minimal() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::minimal(), &public);

    let html = server.get("/").await.text();
    assert!(html.contains("<html>"));
    assert!(!html.contains("<title>"));
    assert!(html.contains("<meta charset=\"utf-8\">"));
}

#[tokio::test]
async fn test_shell_uses_index_template() {
    let public = create_public_dir();
    std::fs::write(
        public.path().join("index.html"),
        format!("<html><head>{}</head><body>custom</body></html>", HEAD_PLACEHOLDER),
    )
    .unwrap();
    let server = create_server(SiteConfig::with_head(), &public);

    let html = server.get("/").await.text();
    assert!(html.contains("<title>ImageDiff</title>"));
    assert!(html.contains("custom"));
    assert!(!html.contains(HEAD_PLACEHOLDER));
}

#[tokio::test]
async fn test_page_routes_fall_back_to_shell() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    let response = server.get("/compare/alpha").await;
    response.assert_status_ok();
    assert!(response.text().contains("<div id=\"app\"></div>"));
}

#[tokio::test]
async fn test_static_files() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    let response = server.get("/robots.txt").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "User-agent: *\n");

    server
        .get("/assets/missing.js")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_get_outside_proxy_is_not_found() {
    let public = create_public_dir();
    let server = create_server(SiteConfig::with_head(), &public);

    server
        .post("/compare")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
