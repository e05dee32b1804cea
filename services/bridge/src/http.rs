//! HTTP control surface.
//!
//! Core operations: `/status/vgs` (GET, SwitchRead), `/test/vsw`
//! (GET/POST, SwitchWrite), `/dim` (POST, LoadSet; GET, LoadRead),
//! `/send` (POST, RawSend). Peripheral/diagnostic routes: `/status`, `/servers`,
//! `/whitelist[/reload]`, `/recv[/reset]`, `/logs`, `/logging/*`,
//! `/connect`, `/disconnect`. `/commands` and `/admin/reload-commands` are
//! reserved and answer 501 (command-table hot reload is not yet
//! implemented).

use crate::whitelist_loader::load_whitelist_from_path;
use axum::http::header::{HeaderName, HeaderValue};
use axum::routing::{get, post};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use hb_bridge::dispatcher::{LoadReadOpts, SwitchReadOpts};
use hb_bridge::{Bridge, BridgeError, ServerTarget};
use hb_protocol::{LoadAddr, SwitchAddr};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub whitelist_path: Option<PathBuf>,
    pub logging_enabled: AtomicBool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status/vgs", get(switch_read))
        .route("/test/vsw", post(switch_write))
        .route("/dim", post(load_set).get(load_read))
        .route("/send", post(raw_send))
        .route("/status", get(status))
        .route("/servers", get(servers))
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/whitelist", get(whitelist))
        .route("/whitelist/reload", post(whitelist_reload))
        .route("/recv", get(recv))
        .route("/recv/reset", post(recv_reset))
        .route("/logs", get(logs))
        .route("/logging/status", get(logging_status))
        .route("/logging/start", post(logging_start))
        .route("/logging/stop", post(logging_stop))
        .route("/commands", get(not_implemented))
        .route("/admin/reload-commands", post(not_implemented))
        .with_state(state)
}

fn bridge_error_response(e: BridgeError) -> (StatusCode, Json<ErrorBody>) {
    let code = StatusCode::from_u16(e.status_code().0).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(ErrorBody { error: e.to_string() }))
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn set_header(response: &mut Response, name: &'static str, value: impl std::fmt::Display) {
    if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), v);
    }
}

// ---------------------------------------------------------------------------
// Core operations
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SwitchQuery {
    m: u32,
    s: u32,
    b: u32,
    #[serde(rename = "cacheMs")]
    cache_ms: Option<u64>,
    #[serde(rename = "maxMs")]
    max_ms: Option<u64>,
    #[serde(rename = "jitterMs")]
    jitter_ms: Option<u64>,
    format: Option<String>,
}

#[derive(Serialize)]
struct SwitchReadBody {
    value: bool,
    source: &'static str,
    stale: bool,
    #[serde(rename = "cacheState")]
    cache_state: &'static str,
}

async fn switch_read(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SwitchQuery>,
) -> impl IntoResponse {
    let addr = SwitchAddr::new(q.m, q.s, q.b);
    let opts = SwitchReadOpts {
        cache_ms: q.cache_ms.map(Duration::from_millis),
        max_ms: q.max_ms.map(Duration::from_millis),
        jitter_ms: q.jitter_ms,
    };
    let format = q.format.as_deref().unwrap_or("json");

    match state.bridge.switch_read(addr, opts).await {
        Ok(result) => {
            let mut response = match format {
                "bool" => (
                    StatusCode::OK,
                    if result.value { "true" } else { "false" },
                )
                    .into_response(),
                "raw" => (
                    StatusCode::OK,
                    result.raw.clone().unwrap_or_default(),
                )
                    .into_response(),
                _ => Json(SwitchReadBody {
                    value: result.value,
                    source: result.source,
                    stale: result.stale,
                    cache_state: result.cache_state,
                })
                .into_response(),
            };
            set_header(&mut response, "X-VGS-Source", result.source);
            set_header(&mut response, "X-VGS-Cache", result.cache_state);
            set_header(&mut response, "X-VGS-Age", result.age_ms);
            if let Some(note) = result.note {
                set_header(&mut response, "X-VGS-Note", note);
            }
            if result.stale {
                set_header(&mut response, "X-Status-Fallback", "stale-cache");
            }
            response
        }
        Err(e) => {
            if format == "bool" {
                let mut response = (StatusCode::OK, "false").into_response();
                set_header(&mut response, "X-Status-Error", e.to_string());
                response
            } else {
                bridge_error_response(e).into_response()
            }
        }
    }
}

#[derive(Deserialize)]
struct SwitchWriteBody {
    m: u32,
    s: u32,
    b: u32,
    v: bool,
    wait_ms: Option<u64>,
}

async fn switch_write(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SwitchWriteBody>,
) -> impl IntoResponse {
    let addr = SwitchAddr::new(body.m, body.s, body.b);
    let wait = body.wait_ms.map(Duration::from_millis);
    match state.bridge.switch_write(addr, body.v, wait).await {
        Ok(raw) => Json(serde_json::json!({ "ok": true, "reply": raw })).into_response(),
        Err(e) => bridge_error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct LoadSetBody {
    m: u32,
    e: u32,
    #[serde(rename = "mod")]
    module: u32,
    load: u32,
    level: u8,
    fade_seconds: Option<u32>,
}

async fn load_set(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoadSetBody>,
) -> impl IntoResponse {
    let addr = LoadAddr::new(body.m, body.e, body.module, body.load);
    if !addr.is_valid_range() {
        return bridge_error_response(BridgeError::InvalidInput(format!(
            "load address {addr} out of range"
        )))
        .into_response();
    }
    match state.bridge.load_set(addr, body.level, body.fade_seconds).await {
        Ok(command) => {
            let mut response =
                Json(serde_json::json!({ "ok": true, "level": body.level })).into_response();
            set_header(&mut response, "X-Load-Command", command);
            set_header(&mut response, "X-Load-Level", body.level);
            if let Some(fade) = body.fade_seconds {
                set_header(&mut response, "X-Load-Fade", fade);
            }
            response
        }
        Err(e) => bridge_error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct LoadQuery {
    m: u32,
    e: u32,
    #[serde(rename = "mod")]
    module: u32,
    load: u32,
    #[serde(rename = "cacheMs")]
    cache_ms: Option<u64>,
    #[serde(rename = "maxMs")]
    max_ms: Option<u64>,
    format: Option<String>,
}

#[derive(Serialize)]
struct LoadReadBody {
    level: u8,
    fade: Option<f64>,
    source: &'static str,
    stale: bool,
    #[serde(rename = "cacheState")]
    cache_state: &'static str,
}

async fn load_read(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LoadQuery>,
) -> impl IntoResponse {
    let addr = LoadAddr::new(q.m, q.e, q.module, q.load);
    let opts = LoadReadOpts {
        cache_ms: q.cache_ms.map(Duration::from_millis),
        max_ms: q.max_ms.map(Duration::from_millis),
    };
    let format = q.format.as_deref().unwrap_or("json");

    match state.bridge.load_read(addr, opts).await {
        Ok(result) => {
            let mut response = if format == "level" {
                (StatusCode::OK, result.level.to_string()).into_response()
            } else {
                Json(LoadReadBody {
                    level: result.level,
                    fade: result.fade,
                    source: result.source,
                    stale: result.stale,
                    cache_state: result.cache_state,
                })
                .into_response()
            };
            set_header(&mut response, "X-Load-Cache", result.cache_state);
            set_header(&mut response, "X-Load-Source", result.source);
            set_header(&mut response, "X-Load-Level", result.level);
            if let Some(fade) = result.fade {
                set_header(&mut response, "X-Load-Fade", fade);
            }
            if result.stale {
                set_header(&mut response, "X-Status-Fallback", "stale-cache");
            }
            response
        }
        Err(e) => bridge_error_response(e).into_response(),
    }
}

#[derive(Deserialize)]
struct RawSendBody {
    hex: String,
    wait_ms: Option<u64>,
    quiet_ms: Option<u64>,
}

async fn raw_send(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RawSendBody>,
) -> impl IntoResponse {
    let bytes = match hex_decode(&body.hex) {
        Some(b) => b,
        None => {
            return bridge_error_response(BridgeError::InvalidInput(
                "hex field is not valid hex".into(),
            ))
            .into_response()
        }
    };
    let wait = body.wait_ms.map(Duration::from_millis);
    let quiet = body.quiet_ms.map(Duration::from_millis);
    let lines = state.bridge.dispatcher.raw_send(bytes, wait, quiet).await;
    Json(serde_json::json!({ "lines": lines })).into_response()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Peripheral / diagnostic routes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StatusBody {
    state: &'static str,
    connected_to: Option<String>,
    parse_failures: u64,
    switch_cache_len: usize,
    load_cache_len: usize,
    whitelist_len: usize,
    queue_depth: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusBody> {
    let status = state.bridge.status().await;
    Json(StatusBody {
        state: match status.state {
            hb_bridge::ConnectionState::Disconnected => "disconnected",
            hb_bridge::ConnectionState::Connecting => "connecting",
            hb_bridge::ConnectionState::Connected => "connected",
        },
        connected_to: status.connected_to.map(|t| t.name),
        parse_failures: status.parse_failures,
        switch_cache_len: status.switch_cache_len,
        load_cache_len: status.load_cache_len,
        whitelist_len: status.whitelist_len,
        queue_depth: status.queue_depth,
    })
}

async fn servers(State(state): State<Arc<AppState>>) -> Json<Vec<ServerTarget>> {
    Json(state.bridge.config.servers.clone())
}

#[derive(Deserialize)]
struct ConnectBody {
    #[serde(rename = "serverIndex")]
    server_index: usize,
}

async fn connect(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectBody>,
) -> impl IntoResponse {
    let Some(target) = state.bridge.config.servers.get(body.server_index).cloned() else {
        return bridge_error_response(BridgeError::InvalidInput(format!(
            "no server at index {}",
            body.server_index
        )))
        .into_response();
    };
    match state.bridge.connect(target).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => bridge_error_response(e).into_response(),
    }
}

async fn disconnect(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.bridge.disconnect().await;
    Json(serde_json::json!({ "ok": true }))
}

async fn whitelist(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "len": state.bridge.whitelist.len() }))
}

async fn whitelist_reload(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(path) = state.whitelist_path.as_ref() else {
        return bridge_error_response(BridgeError::InvalidInput(
            "no whitelist_path configured".into(),
        ))
        .into_response();
    };
    match load_whitelist_from_path(path) {
        Ok(set) => {
            let len = set.len();
            state.bridge.whitelist.reload(set);
            info!(len, "whitelist reloaded");
            Json(serde_json::json!({ "ok": true, "len": len })).into_response()
        }
        Err(e) => {
            warn!(error = %e, "whitelist reload failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody { error: e.to_string() }),
            )
                .into_response()
        }
    }
}

async fn recv(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.bridge.recv_snapshot().await)
}

async fn recv_reset(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.bridge.recv_reset().await;
    Json(serde_json::json!({ "ok": true }))
}

async fn logs() -> Json<Vec<String>> {
    Json(Vec::new())
}

async fn logging_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "enabled": state.logging_enabled.load(Ordering::Relaxed) }))
}

async fn logging_start(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.logging_enabled.store(true, Ordering::Relaxed);
    Json(serde_json::json!({ "ok": true }))
}

async fn logging_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.logging_enabled.store(false, Ordering::Relaxed);
    Json(serde_json::json!({ "ok": true }))
}

async fn not_implemented() -> impl IntoResponse {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(ErrorBody {
            error: "not implemented".into(),
        }),
    )
}
