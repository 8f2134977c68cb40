//! The normalized response returned by every backend.
//!
//! # Design
//! A plain data holder. Header keys are lowercased and unique (last write
//! wins), numeric-looking values are stored as integers, and timings are
//! microseconds keyed by measurement name. `BTreeMap` keeps serialization
//! deterministic so two identical exchanges compare equal modulo timings.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Backend;
use crate::error::TransportError;

/// A response header value after numeric coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    Text(String),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s),
            HeaderValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(n) => Some(*n),
            HeaderValue::Text(_) => None,
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Int(n) => write!(f, "{n}"),
            HeaderValue::Text(s) => f.write_str(s),
        }
    }
}

impl PartialEq<&str> for HeaderValue {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<i64> for HeaderValue {
    fn eq(&self, other: &i64) -> bool {
        self.as_int() == Some(*other)
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// Backend that served the call.
    pub backend: Backend,
    /// The exchange could not be completed (or the status policy flagged it).
    pub error: bool,
    pub failure: Option<TransportError>,
    /// 0 when no status line was ever received.
    pub status_code: u16,
    pub protocol_version: f64,
    pub headers: BTreeMap<String, HeaderValue>,
    /// Durations in microseconds. Always contains `done` once a call ran.
    pub timing: BTreeMap<String, u64>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            error: false,
            failure: None,
            status_code: 0,
            protocol_version: 0.0,
            headers: BTreeMap::new(),
            timing: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    /// Mark the exchange as failed.
    pub(crate) fn fail(&mut self, failure: TransportError) {
        self.error = true;
        self.failure = Some(failure);
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(&name.to_ascii_lowercase())
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_response_is_blank() {
        let response = Response::new(Backend::Stream);
        assert!(!response.error);
        assert_eq!(response.status_code, 0);
        assert!(response.headers.is_empty());
        assert!(response.body.is_empty());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut response = Response::new(Backend::Native);
        response
            .headers
            .insert("content-type".to_string(), HeaderValue::Text("application/json".to_string()));
        response.headers.insert("content-length".to_string(), HeaderValue::Int(42));
        assert_eq!(response.header("Content-Type").unwrap().as_str(), Some("application/json"));
        assert_eq!(response.header("CONTENT-LENGTH").unwrap().as_int(), Some(42));
    }

    #[test]
    fn serializes_header_values_untagged() {
        let mut response = Response::new(Backend::Native);
        response.headers.insert("content-length".to_string(), HeaderValue::Int(2));
        response.headers.insert("server".to_string(), HeaderValue::Text("x".to_string()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["backend"], "native");
        assert_eq!(json["headers"]["content-length"], 2);
        assert_eq!(json["headers"]["server"], "x");
        assert!(json["failure"].is_null());
    }

    #[test]
    fn fail_sets_flag_and_reason() {
        let mut response = Response::new(Backend::Stream);
        response.fail(TransportError::HttpStatus(404));
        assert!(response.error);
        assert_eq!(response.failure, Some(TransportError::HttpStatus(404)));
    }

    #[test]
    fn json_body_decodes() {
        let mut response = Response::new(Backend::Native);
        response.body = br#"{"post":{"name":"test_value"}}"#.to_vec();
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["post"]["name"], "test_value");
    }
}
