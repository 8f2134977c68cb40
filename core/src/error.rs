//! Error types for the dual-backend client.
//!
//! # Design
//! Two families with different propagation. `ClientError` is a local
//! configuration problem (a backend name nobody implements, a scheme the
//! chosen backend refuses) and is returned as `Err` before any network
//! activity. `TransportError` describes why an exchange could not complete;
//! it never surfaces as `Err` but is attached to the `Response` next to
//! `error = true`, so callers have one uniform check.

use serde::Serialize;
use thiserror::Error;

/// Configuration errors, returned by `HttpClient::request` as `Err`.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The `using` selector named a backend that does not exist.
    #[error("unsupported backend: {0:?}")]
    UnsupportedBackend(String),

    /// The URL scheme is not allowed for the selected backend.
    #[error("scheme {scheme:?} is not supported by the {backend} backend")]
    UnsupportedScheme { scheme: String, backend: &'static str },

    /// An option value could not be interpreted.
    #[error("invalid value {value:?} for option {key:?}")]
    InvalidOption { key: String, value: String },

    /// A configuration file could not be read or decoded.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Why a response carries `error = true`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TransportError {
    /// The URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The host name did not resolve.
    #[error("could not resolve host: {0}")]
    Resolve(String),

    /// No connection could be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The timeout or the caller's deadline elapsed.
    #[error("timed out")]
    Timeout,

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// The peer answered with something that is not an HTTP/1.x response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The body could not be decompressed.
    #[error("could not decode body: {0}")]
    Decode(String),

    /// A response arrived but its status is folded into the error flag.
    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable => TransportError::Connect(err.to_string()),
            _ => TransportError::Io(err.to_string()),
        }
    }
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Timeout(_) => TransportError::Timeout,
            ureq::Error::HostNotFound => TransportError::Resolve("host not found".to_string()),
            ureq::Error::ConnectionFailed => {
                TransportError::Connect("connection failed".to_string())
            }
            ureq::Error::BadUri(uri) => TransportError::InvalidUrl(uri),
            ureq::Error::Io(io) => io.into(),
            ureq::Error::Tls(msg) => TransportError::Tls(msg.to_string()),
            other => TransportError::Io(other.to_string()),
        }
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_parse() || err.is_incomplete_message() {
            TransportError::MalformedResponse(err.to_string())
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeouts_map_to_timeout() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(TransportError::from(err), TransportError::Timeout);
    }

    #[test]
    fn refused_connection_maps_to_connect() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(TransportError::from(err), TransportError::Connect(_)));
    }

    #[test]
    fn transport_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(TransportError::HttpStatus(503)).unwrap();
        assert_eq!(json["kind"], "http_status");
        assert_eq!(json["detail"], 503);
    }

    #[test]
    fn unsupported_backend_message_names_the_value() {
        let err = ClientError::UnsupportedBackend("carrier-pigeon".to_string());
        assert_eq!(err.to_string(), "unsupported backend: \"carrier-pigeon\"");
    }
}
