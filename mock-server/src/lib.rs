//! Echo fixture used by the client's integration tests.
//!
//! Every path is handled by one fallback handler. A few paths are special
//! (`/auth`, `/redirect`, `/compressed`, `/large`); everything else checks
//! `?method=`, honours `?status=` and `?sleep=`, and echoes the request back
//! as JSON under `method`, `status`, `sleep`, `headers`, `get` and `post`.

use std::io::Write;
use std::time::Duration;

use axum::{
    body::Bytes,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

pub const DEFAULT_PORT: u16 = 17171;
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS, HEAD";
/// `Basic` credentials for `user:pass`.
pub const EXPECTED_AUTH: &str = "Basic dXNlcjpwYXNz";
pub const LARGE_BODY_BYTES: usize = 2 * 1024 * 1024;

const SPECIAL_PATHS: &[&str] = &["/auth", "/redirect", "/compressed", "/large"];

pub fn app() -> Router {
    Router::new().fallback(handle)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn handle(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path();
    let query = pairs(uri.query().unwrap_or_default().as_bytes());
    let mut extra = HeaderMap::new();
    let mut out = Map::new();

    if method == Method::OPTIONS {
        extra.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        if let Some(origin) = headers.get(header::ORIGIN) {
            extra.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            extra.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            extra.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
            let allowed = headers
                .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
                .cloned()
                .unwrap_or_else(|| {
                    HeaderValue::from_static("Content-Type, Authorization, X-Custom-Header, If-Match")
                });
            extra.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed);
        }
        // Pre-flight requests stop here.
        if headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD) {
            return (StatusCode::OK, extra).into_response();
        }
    }

    if path == "/auth" {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .is_some_and(|v| v.as_bytes() == EXPECTED_AUTH.as_bytes());
        if !authorized {
            extra.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"Test Realm\""),
            );
            return (StatusCode::UNAUTHORIZED, extra).into_response();
        }
        if method == Method::HEAD {
            extra.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            return (StatusCode::OK, extra).into_response();
        }
        out.insert("auth".into(), json!("success"));
    }

    if path == "/redirect" {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| format!("localhost:{DEFAULT_PORT}"));
        if let Ok(location) = HeaderValue::from_str(&format!("http://{host}/")) {
            extra.insert(header::LOCATION, location);
        }
        return (StatusCode::FOUND, extra).into_response();
    }

    let accepts_gzip = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("gzip"));
    if path == "/compressed" && accepts_gzip {
        extra.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        out.insert("compressed".into(), json!(true));
        return send_body(StatusCode::OK, extra, &out, true);
    }

    if path == "/large" {
        out.insert("data".into(), json!("x".repeat(LARGE_BODY_BYTES)));
        return send_body(StatusCode::OK, extra, &out, false);
    }

    if !SPECIAL_PATHS.contains(&path) {
        let expected = query
            .iter()
            .find(|(k, _)| k == "method")
            .map(|(_, v)| v.to_ascii_lowercase())
            .unwrap_or_else(|| "get".to_string());
        out.insert("method".into(), json!(expected));
        if method.as_str().to_ascii_lowercase() != expected {
            return send_body(StatusCode::METHOD_NOT_ALLOWED, extra, &out, false);
        }
    }

    let status = int_param(&query, "status");
    out.insert("status".into(), json!(status));
    if status > 0 {
        let code = u16::try_from(status)
            .ok()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if code == StatusCode::NO_CONTENT {
            return (code, extra).into_response();
        }
        return send_body(code, extra, &out, false);
    }

    let sleep = int_param(&query, "sleep");
    out.insert("sleep".into(), json!(sleep));
    let pause = Duration::from_secs(sleep.max(0) as u64) + Duration::from_micros(100);
    tokio::time::sleep(pause).await;

    let echoed: Map<String, Value> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), json!(String::from_utf8_lossy(value.as_bytes()))))
        .collect();
    out.insert("headers".into(), Value::Object(echoed));

    if !query.is_empty() {
        out.insert("get".into(), Value::Object(to_object(&query)));
    }
    if let Some(post) = post_fields(&method, &headers, &body) {
        if !post.is_empty() {
            out.insert("post".into(), Value::Object(post));
        }
    }

    send_body(StatusCode::OK, extra, &out, false)
}

fn pairs(input: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(input).into_owned().collect()
}

fn to_object(pairs: &[(String, String)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

fn int_param(query: &[(String, String)], key: &str) -> i64 {
    query
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Body fields the way a form-handling server sees them. JSON patch content
/// types are decoded as JSON for PUT and PATCH.
fn post_fields(method: &Method, headers: &HeaderMap, body: &Bytes) -> Option<Map<String, Value>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let is_json_patch = content_type.contains("application/json-patch+json")
        || content_type.contains("application/merge-patch+json");

    if *method == Method::PUT || *method == Method::PATCH {
        if is_json_patch {
            return match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => Some(map),
                Ok(Value::Array(items)) => Some(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (i.to_string(), v))
                        .collect(),
                ),
                _ => None,
            };
        }
        return Some(to_object(&pairs(body)));
    }
    if *method == Method::POST && content_type.starts_with("application/x-www-form-urlencoded") {
        return Some(to_object(&pairs(body)));
    }
    None
}

fn send_body(status: StatusCode, mut extra: HeaderMap, out: &Map<String, Value>, compress: bool) -> Response {
    let json = serde_json::to_vec_pretty(out).unwrap_or_default();
    extra.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let body = if compress { gzip(&json) } else { json };
    (status, extra, body).into_response()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    match encoder.write_all(data) {
        Ok(()) => encoder.finish().unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}
