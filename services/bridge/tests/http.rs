//! End-to-end: HTTP layer driving a `Bridge` connected to a mock controller
//! over a real TCP socket.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use bridge::http::{router, AppState};
use hb_bridge::{Bridge, Config, ServerTarget};
use serde_json::{json, Value};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

async fn mock_controller() -> (ServerTarget, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 256];

        // Handshake.
        let n = sock.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"VCL 1 0\r\n");

        // VGS# 2 20 7 -> answer with the addressed reply.
        let n = sock.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"VGS# 2 20 7\r\n");
        sock.write_all(b"RGS# 2 20 7 1\r\n").await.unwrap();
    });
    (
        ServerTarget {
            name: "mock".to_owned(),
            host: addr.ip().to_string(),
            port: addr.port(),
        },
        handle,
    )
}

fn build_state(bridge: Arc<Bridge>) -> Arc<AppState> {
    Arc::new(AppState {
        bridge,
        whitelist_path: None,
        logging_enabled: AtomicBool::new(true),
    })
}

async fn get_json(app: axum::Router, path: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let val = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, val)
}

async fn get_raw(app: axum::Router, path: &str) -> axum::http::Response<Body> {
    let req = Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Body::empty())
        .unwrap();
    app.oneshot(req).await.unwrap()
}

async fn post_json(app: axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let val = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, val)
}

#[tokio::test]
async fn status_reflects_connect_and_disconnect() {
    let (target, server) = mock_controller().await;
    let mut config = Config::default();
    config.servers = vec![target.clone()];
    config.auto_connect = false;

    let bridge = Bridge::new(config);
    let state = build_state(bridge.clone());
    let app = router(state);

    let (status, body) = get_json(app.clone(), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "disconnected");

    let (status, _) = post_json(app.clone(), "/connect", json!({ "serverIndex": 0 })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(app.clone(), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "connected");
    assert_eq!(body["connected_to"], "mock");

    let (status, body) =
        get_json(app.clone(), "/status/vgs?m=2&s=20&b=7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], true);
    assert_eq!(body["source"], "tcp-await");
    assert_eq!(body["stale"], false);

    let (status, _) = post_json(app.clone(), "/disconnect", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get_json(app.clone(), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "disconnected");

    server.await.unwrap();
}

#[tokio::test]
async fn switch_read_sets_vgs_headers_and_honors_bool_format_on_cache_hit() {
    let (target, server) = mock_controller().await;
    let mut config = Config::default();
    config.servers = vec![target];
    config.auto_connect = false;

    let bridge = Bridge::new(config);
    let state = build_state(bridge.clone());
    let app = router(state);

    let (status, _) = post_json(app.clone(), "/connect", json!({ "serverIndex": 0 })).await;
    assert_eq!(status, StatusCode::OK);

    let resp = get_raw(app.clone(), "/status/vgs?m=2&s=20&b=7").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("X-VGS-Source").unwrap(), "tcp-await");
    assert!(resp.headers().contains_key("X-VGS-Cache"));
    assert!(resp.headers().contains_key("X-VGS-Age"));

    // A second request with a generous cacheMs should now be served from
    // cache, and format=bool must return the literal bare-text body.
    let resp = get_raw(
        app.clone(),
        "/status/vgs?m=2&s=20&b=7&format=bool&cacheMs=60000",
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("X-VGS-Cache").unwrap(), "cache-hit");
    let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"true");

    server.await.unwrap();
}

#[tokio::test]
async fn switch_read_before_connect_is_rejected() {
    let bridge = Bridge::new(Config::default());
    let state = build_state(bridge);
    let app = router(state);

    let (status, _) = get_json(app, "/status/vgs?m=1&s=1&b=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn connect_to_out_of_range_server_index_is_rejected() {
    let bridge = Bridge::new(Config::default());
    let state = build_state(bridge);
    let app = router(state);

    let (status, _) = post_json(app, "/connect", json!({ "serverIndex": 7 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
