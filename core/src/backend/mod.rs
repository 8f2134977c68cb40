//! Transport strategies behind the dispatcher.
//!
//! # Design
//! The backend is a closed set selected by [`Backend`], so dispatch is a
//! plain `match` instead of a trait object. Each strategy receives a fully
//! prepared request, owns its transport handle for the duration of the call
//! and always hands back a `Response`; failures are recorded on it.

pub(crate) mod native;
pub(crate) mod stream;

use std::io::Read;
use std::time::{Duration, Instant};

use flate2::read::{GzDecoder, ZlibDecoder};
use url::Url;

use crate::config::{Backend, ResolvedOptions};
use crate::error::TransportError;
use crate::http::{Headers, HttpMethod, RequestData};
use crate::response::Response;

/// Everything a backend needs for one call.
#[derive(Debug, Clone)]
pub(crate) struct PreparedRequest<'a> {
    pub method: HttpMethod,
    pub url: Url,
    pub default_headers: &'a Headers,
    pub headers: Headers,
    pub data: RequestData,
    pub options: ResolvedOptions,
    /// Effective timeout after applying the caller's deadline.
    pub timeout: Duration,
}

pub(crate) fn execute(request: &PreparedRequest<'_>) -> Response {
    match request.options.backend {
        Backend::Native => native::execute(request),
        Backend::Stream => stream::execute(request),
    }
}

/// Decode a body according to its `Content-Encoding`. Unknown codings and
/// empty bodies (HEAD, 204, 304) are returned untouched.
pub(crate) fn decode_body(content_encoding: &str, body: Vec<u8>) -> std::io::Result<Vec<u8>> {
    if body.is_empty() {
        return Ok(body);
    }
    let mut decoded = Vec::new();
    match content_encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => {
            decoded.reserve(body.len() * 4);
            GzDecoder::new(body.as_slice()).read_to_end(&mut decoded)?;
        }
        "deflate" => {
            decoded.reserve(body.len() * 4);
            ZlibDecoder::new(body.as_slice()).read_to_end(&mut decoded)?;
        }
        _ => return Ok(body),
    }
    Ok(decoded)
}

/// Fold 4xx/5xx statuses into the error flag when the policy asks for it.
pub(crate) fn apply_status_policy(response: &mut Response, error_on_http_status: bool) {
    if error_on_http_status && response.status_code > 399 {
        response.fail(TransportError::HttpStatus(response.status_code));
    }
}

pub(crate) fn elapsed_us(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    #[test]
    fn gzip_bodies_are_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"compressed":true}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decode_body("gzip", compressed).unwrap();
        assert_eq!(decoded, br#"{"compressed":true}"#);
    }

    #[test]
    fn unknown_encodings_pass_through() {
        let body = b"plain".to_vec();
        assert_eq!(decode_body("br", body.clone()).unwrap(), body);
        assert_eq!(decode_body("identity", body.clone()).unwrap(), body);
    }

    #[test]
    fn empty_bodies_skip_decoding() {
        assert_eq!(decode_body("gzip", Vec::new()).unwrap(), Vec::<u8>::new());
        assert_eq!(decode_body("deflate", Vec::new()).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        assert!(decode_body("gzip", b"not gzip at all".to_vec()).is_err());
    }
}
