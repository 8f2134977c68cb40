//! Verb-oriented dispatcher over the two transport backends.
//!
//! # Design
//! `HttpClient` holds only its `ClientConfig` (default options and default
//! headers) and never mutates it. Every call merges the caller's options and
//! headers over copies of those templates, picks a backend, and returns a
//! normalized `Response`. A client can be shared freely across threads; each
//! call acquires its own transport handle.

use std::time::Instant;

use tracing::{debug, warn};
use url::Url;

use crate::backend::{self, native, stream, PreparedRequest};
use crate::config::{Backend, ClientConfig, RequestOptions};
use crate::error::{ClientError, TransportError};
use crate::http::{Headers, HttpMethod, RequestData};
use crate::response::Response;

/// Synchronous HTTP client with interchangeable backends.
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    config: ClientConfig,
}

impl HttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Perform one request.
    ///
    /// Returns `Err` only for configuration problems such as a scheme the
    /// selected backend does not speak. Everything that goes wrong on the
    /// wire, including an unparseable URL, comes back as a `Response` with
    /// `error` set.
    pub fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &Headers,
        data: impl Into<RequestData>,
        options: &RequestOptions,
    ) -> Result<Response, ClientError> {
        let resolved = options.merged_over(&self.config.options).resolve();
        let backend = resolved.backend;

        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(err) => {
                warn!(%method, url, %backend, error = %err, "request URL did not parse");
                let mut response = Response::new(backend);
                response.fail(TransportError::InvalidUrl(err.to_string()));
                return Ok(response);
            }
        };
        check_scheme(&url, backend)?;

        let Some(timeout) = resolved.effective_timeout(Instant::now()) else {
            warn!(%method, %url, %backend, "deadline passed before dispatch");
            let mut response = Response::new(backend);
            response.timing.insert("done".to_string(), 0);
            response.fail(TransportError::Timeout);
            return Ok(response);
        };

        debug!(%method, %url, %backend, ?timeout, "dispatching request");
        let prepared = PreparedRequest {
            method,
            url,
            default_headers: &self.config.headers,
            headers: headers.clone(),
            data: data.into(),
            options: resolved,
            timeout,
        };
        let response = backend::execute(&prepared);

        if response.error {
            warn!(
                %method,
                url = %prepared.url,
                %backend,
                status = response.status_code,
                failure = ?response.failure,
                "request did not complete cleanly"
            );
        } else {
            debug!(
                %method,
                url = %prepared.url,
                status = response.status_code,
                done_us = response.timing.get("done").copied().unwrap_or_default(),
                "request finished"
            );
        }
        Ok(response)
    }

    pub fn get(&self, url: &str, headers: &Headers, options: &RequestOptions) -> Result<Response, ClientError> {
        self.request(HttpMethod::Get, url, headers, RequestData::Empty, options)
    }

    pub fn head(&self, url: &str, headers: &Headers, options: &RequestOptions) -> Result<Response, ClientError> {
        self.request(HttpMethod::Head, url, headers, RequestData::Empty, options)
    }

    pub fn options(&self, url: &str, headers: &Headers, options: &RequestOptions) -> Result<Response, ClientError> {
        self.request(HttpMethod::Options, url, headers, RequestData::Empty, options)
    }

    pub fn delete(&self, url: &str, headers: &Headers, options: &RequestOptions) -> Result<Response, ClientError> {
        self.request(HttpMethod::Delete, url, headers, RequestData::Empty, options)
    }

    pub fn post(
        &self,
        url: &str,
        headers: &Headers,
        data: impl Into<RequestData>,
        options: &RequestOptions,
    ) -> Result<Response, ClientError> {
        self.request(HttpMethod::Post, url, headers, data, options)
    }

    /// PUT always sends a form body with a form content type.
    pub fn put(
        &self,
        url: &str,
        headers: &Headers,
        data: impl Into<RequestData>,
        options: &RequestOptions,
    ) -> Result<Response, ClientError> {
        self.request(HttpMethod::Put, url, headers, data, options)
    }

    pub fn patch(
        &self,
        url: &str,
        headers: &Headers,
        data: impl Into<RequestData>,
        options: &RequestOptions,
    ) -> Result<Response, ClientError> {
        self.request(HttpMethod::Patch, url, headers, data, options)
    }
}

/// Reject schemes the backend cannot speak before anything is sent.
fn check_scheme(url: &Url, backend: Backend) -> Result<(), ClientError> {
    let allowed = match backend {
        Backend::Native => native::ALLOWED_SCHEMES,
        Backend::Stream => stream::ALLOWED_SCHEMES,
    };
    if allowed.contains(&url.scheme()) {
        return Ok(());
    }
    Err(ClientError::UnsupportedScheme {
        scheme: url.scheme().to_string(),
        backend: backend.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn no_headers() -> Headers {
        Headers::new()
    }

    #[test]
    fn client_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpClient>();
    }

    #[test]
    fn file_scheme_is_rejected_before_dispatch() {
        let err = HttpClient::new()
            .get("file:///etc/passwd", &no_headers(), &RequestOptions::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnsupportedScheme { ref scheme, backend: "native" } if scheme == "file"
        ));
    }

    #[test]
    fn stream_backend_rejects_non_http_schemes() {
        let options = RequestOptions::new().using(Backend::Stream);
        let err = HttpClient::new()
            .get("ftp://localhost/", &no_headers(), &options)
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedScheme { backend: "stream", .. }));
    }

    #[test]
    fn stream_backend_accepts_https() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let options = RequestOptions::new().using(Backend::Stream).timeout_secs(2.0);
        let response = HttpClient::new()
            .get(&format!("https://127.0.0.1:{port}/"), &no_headers(), &options)
            .unwrap();
        assert!(response.error);
        assert_eq!(response.backend, Backend::Stream);
        assert!(!matches!(response.failure, Some(TransportError::InvalidUrl(_))));
    }

    #[test]
    fn malformed_url_is_an_error_response() {
        for backend in [Backend::Native, Backend::Stream] {
            let options = RequestOptions::new().using(backend);
            let response = HttpClient::new()
                .post("not a url", &no_headers(), [("name", "x")], &options)
                .unwrap();
            assert!(response.error);
            assert_eq!(response.status_code, 0);
            assert_eq!(response.backend, backend);
            assert!(matches!(response.failure, Some(TransportError::InvalidUrl(_))));
        }
    }

    #[test]
    fn expired_deadline_fails_without_network() {
        let options = RequestOptions::new().deadline(Instant::now() - Duration::from_millis(1));
        let response = HttpClient::new()
            .get("http://127.0.0.1:9/", &no_headers(), &options)
            .unwrap();
        assert!(response.error);
        assert_eq!(response.failure, Some(TransportError::Timeout));
        assert_eq!(response.status_code, 0);
    }

    #[test]
    fn defaults_are_not_mutated_by_calls() {
        let client = HttpClient::new();
        let before = client.config().clone();
        let headers = Headers::from([("User-Agent", "override")]);
        let _ = client.get("http://[::1", &headers, &RequestOptions::new().timeout_secs(1.0));
        assert_eq!(client.config(), &before);
    }
}
