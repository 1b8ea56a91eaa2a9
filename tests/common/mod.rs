//! 集成测试用的假门户和假中继
//!
//! 都运行在 127.0.0.1 的随机端口上，行为和真实服务的约定保持一致。

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::header::{CONTENT_TYPE, COOKIE, REFERER, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use siaf_expediente::Config;

pub const PORTAL_PREFIX: &str = "/consulta-vfp-webapp";
pub const SESSION_COOKIE: &str = "JSESSIONID=abc123";
pub const PORTAL_CAPTCHA: &str = "AB12C";
pub const RELAY_SECRET: &str = "relay-s3cret";
pub const RELAY_SESSION: &str = "relay-session-1";
/// PNG 文件头
pub const RELAY_IMAGE: &str = "data:image/png;base64,iVBORw0KGgo=";
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

pub const RESULT_TABLE: &str = r#"<html><body>
<table id="otraTabla"><tr><td>x</td></tr></table>
<table id="expedienteDetalles" class="tabla">
  <tr><th>Ciclo</th><th>Fase</th><th>Sec</th><th>Corr</th><th>Cod Doc</th><th>Num Doc</th><th>Fecha</th><th>FF</th><th>Moneda</th><th>Monto</th><th>Estado</th><th>Fecha Proceso</th><th>Id</th></tr>
  <tr><td>G</td><td>C</td><td>1</td><td>1</td><td>031</td><td>0001-2026</td><td>01/02/2026</td><td>00</td><td>S/.</td><td>1,250.00</td><td>A</td><td>01/02/2026 10:00:00</td><td>9001</td></tr>
  <tr><td>G</td><td>D</td><td>1</td><td>2</td><td>031</td><td>0002-2026</td><td>05/02/2026</td><td>00</td><td>S/.</td><td>   </td><td>P</td><td>05/02/2026 16:28:43</td><td>9002</td></tr>
</table>
</body></html>"#;

/// 用 0 端口启动一个服务，返回实际地址
pub async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("绑定端口失败");
    let addr = listener.local_addr().expect("读取地址失败");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("测试服务异常退出");
    });
    addr
}

/// 一个确定没有服务在监听的地址
pub fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("绑定端口失败");
    let addr = listener.local_addr().expect("读取地址失败");
    drop(listener);
    addr
}

pub fn portal_url(addr: SocketAddr) -> String {
    format!("http://{}{}", addr, PORTAL_PREFIX)
}

pub fn relay_url(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}

/// 只开直连的配置
pub fn direct_config(portal: SocketAddr) -> Config {
    Config {
        portal_base_url: portal_url(portal),
        direct_connect_timeout_secs: 2,
        direct_timeout_secs: 5,
        ..Config::default()
    }
}

/// 直连加中继的配置
pub fn full_config(portal: SocketAddr, relay: SocketAddr, secret: &str) -> Config {
    Config {
        relay_url: Some(relay_url(relay)),
        relay_secret: secret.to_string(),
        relay_attempt_timeouts_secs: vec![2, 3, 4],
        relay_query_timeout_secs: 5,
        relay_query_connect_timeout_secs: 2,
        relay_retry_pause_ms: 0,
        ..direct_config(portal)
    }
}

fn has_session_cookie(headers: &HeaderMap) -> bool {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains(SESSION_COOKIE))
}

// ========== 假门户 ==========

async fn landing() -> Response {
    (
        [(SET_COOKIE, format!("{}; Path=/", SESSION_COOKIE))],
        Html("<html><body><form id=\"consulta\"></form></body></html>"),
    )
        .into_response()
}

async fn portal_captcha(headers: HeaderMap) -> Response {
    if !has_session_cookie(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    ([(CONTENT_TYPE, "image/jpeg")], JPEG_BYTES.to_vec()).into_response()
}

async fn portal_action(headers: HeaderMap, Form(form): Form<HashMap<String, String>>) -> Response {
    if !has_session_cookie(&headers) {
        return Html("<html><body>Sesión expirada</body></html>").into_response();
    }
    let referer_ok = headers
        .get(REFERER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.ends_with("consultaExpediente.jspx"));
    if !referer_ok {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let complete = ["anoEje", "secEjec", "expediente"]
        .iter()
        .all(|k| form.get(*k).is_some_and(|v| !v.is_empty()));
    if !complete || form.get("j_captcha").map(String::as_str) != Some(PORTAL_CAPTCHA) {
        return Html("<html><body><span class=\"error\">Código incorrecto</span></body></html>")
            .into_response();
    }
    Html(RESULT_TABLE).into_response()
}

pub fn portal_router() -> Router {
    Router::new()
        .route(&format!("{}/consultaExpediente.jspx", PORTAL_PREFIX), get(landing))
        .route(&format!("{}/Captcha.jpg", PORTAL_PREFIX), get(portal_captcha))
        .route(
            &format!("{}/actionConsultaExpediente.jspx", PORTAL_PREFIX),
            post(portal_action),
        )
}

pub async fn spawn_portal() -> SocketAddr {
    spawn(portal_router()).await
}

// ========== 假中继 ==========

/// 中继状态：前 `fail_first` 次获取验证码返回 502
#[derive(Debug, Default)]
pub struct RelayState {
    pub secret: String,
    pub fail_first: usize,
    pub captcha_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl RelayState {
    pub fn new(secret: &str, fail_first: usize) -> Arc<Self> {
        Arc::new(Self {
            secret: secret.to_string(),
            fail_first,
            ..Self::default()
        })
    }

    pub fn captcha_calls(&self) -> usize {
        self.captcha_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

fn unauthorized(state: &RelayState, headers: &HeaderMap) -> Option<Response> {
    let provided = headers.get("X-Proxy-Secret").and_then(|v| v.to_str().ok());
    if provided == Some(state.secret.as_str()) {
        return None;
    }
    Some(
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Unauthorized: secreto inválido" })),
        )
            .into_response(),
    )
}

async fn relay_captcha(State(state): State<Arc<RelayState>>, headers: HeaderMap) -> Response {
    if let Some(rejected) = unauthorized(&state, &headers) {
        return rejected;
    }
    let call = state.captcha_calls.fetch_add(1, Ordering::SeqCst);
    if call < state.fail_first {
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "success": false, "message": "SIAF no respondió" })),
        )
            .into_response();
    }
    Json(json!({
        "success": true,
        "captcha": RELAY_IMAGE,
        "session": RELAY_SESSION,
    }))
    .into_response()
}

async fn relay_query(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Some(rejected) = unauthorized(&state, &headers) {
        return rejected;
    }
    state.query_calls.fetch_add(1, Ordering::SeqCst);
    if body["session"] != RELAY_SESSION || body["j_captcha"].as_str().unwrap_or_default().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "Sesión inválida" })),
        )
            .into_response();
    }
    Json(json!({ "success": true, "html": RESULT_TABLE, "httpCode": 200 })).into_response()
}

async fn relay_health(State(state): State<Arc<RelayState>>, headers: HeaderMap) -> Response {
    if let Some(rejected) = unauthorized(&state, &headers) {
        return rejected;
    }
    Json(json!({ "status": "ok", "success": true, "timestamp": "2026-02-05T16:28:43Z" }))
        .into_response()
}

pub fn relay_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/captcha", get(relay_captcha))
        .route("/consultar", post(relay_query))
        .route("/health", get(relay_health))
        .with_state(state)
}

pub async fn spawn_relay(state: Arc<RelayState>) -> SocketAddr {
    spawn(relay_router(state)).await
}
