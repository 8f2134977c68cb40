//! Native backend on top of the `ureq` client.
//!
//! Redirects are never followed and status codes never become errors inside
//! the client; both decisions are left to the caller. The response head is
//! replayed line by line through [`HeaderCapture`].

use std::io::Read;
use std::time::Instant;

use tracing::debug;
use ureq::http;
use ureq::{Agent, Body, RequestBuilder};

use super::{apply_status_policy, decode_body, elapsed_us, PreparedRequest};
use crate::config::Backend;
use crate::error::TransportError;
use crate::headers::{HeaderCapture, HeaderSink};
use crate::http::{Headers, HttpMethod, FORM_CONTENT_TYPE};
use crate::response::Response;

pub(crate) const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

pub(crate) fn execute(request: &PreparedRequest<'_>) -> Response {
    let mut response = Response::new(Backend::Native);
    let (headers, body) = build_request(request);

    // One agent per call: nothing is pooled between requests.
    let agent: Agent = Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .max_redirects_will_error(false)
        .timeout_global(Some(request.timeout))
        .build()
        .new_agent();

    let start = Instant::now();
    let reply = match send(&agent, request.method, request.url.as_str(), &headers, body.as_deref()) {
        Ok(reply) => reply,
        Err(err) => {
            record_timing(&mut response, start, None);
            response.fail(err.into());
            return response;
        }
    };
    let head_us = elapsed_us(start);
    capture_head(&reply, &mut response);

    let mut raw = Vec::new();
    let read = match request.method {
        HttpMethod::Head => Ok(0),
        _ => reply.into_body().into_reader().read_to_end(&mut raw),
    };
    record_timing(&mut response, start, Some(head_us));
    if let Err(err) = read {
        response.fail(err.into());
        return response;
    }

    let content_encoding = response.header("content-encoding").map(ToString::to_string);
    response.body = match (&request.options.encoding, content_encoding) {
        (Some(_), Some(coding)) => match decode_body(&coding, raw) {
            Ok(decoded) => decoded,
            Err(err) => {
                response.fail(TransportError::Decode(err.to_string()));
                return response;
            }
        },
        _ => raw,
    };

    apply_status_policy(&mut response, request.options.error_on_http_status);
    response
}

/// Final header list and body bytes for the call.
///
/// POST and PATCH form-encode pair payloads and send raw strings verbatim.
/// PUT always goes out as a form with a forced form content type.
pub(crate) fn build_request(request: &PreparedRequest<'_>) -> (Headers, Option<Vec<u8>>) {
    let mut headers = request.headers.clone();
    let body = match request.method {
        HttpMethod::Post | HttpMethod::Patch => {
            if !headers.contains("content-type") && !request.default_headers.contains("content-type") {
                headers.insert("Content-Type", FORM_CONTENT_TYPE);
            }
            Some(request.data.form_encoded().into_bytes())
        }
        HttpMethod::Put => {
            if !request.data.is_form() && !request.data.is_empty() {
                debug!("PUT payload is not a form; sending it as-is under a form content type");
            }
            headers.insert("Content-Type", FORM_CONTENT_TYPE);
            Some(request.data.form_encoded().into_bytes())
        }
        _ => None,
    };

    let mut merged = request.default_headers.merged_with(&headers);
    if let Some(encoding) = &request.options.encoding {
        if !merged.contains("accept-encoding") {
            merged.insert("Accept-Encoding", encoding.as_str());
        }
    }
    (merged, body)
}

fn send(
    agent: &Agent,
    method: HttpMethod,
    url: &str,
    headers: &Headers,
    body: Option<&[u8]>,
) -> Result<http::Response<Body>, ureq::Error> {
    let body = body.unwrap_or_default();
    match method {
        HttpMethod::Get => with_headers(agent.get(url), headers).call(),
        HttpMethod::Head => with_headers(agent.head(url), headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(url), headers).call(),
        HttpMethod::Options => with_headers(agent.options(url), headers).call(),
        HttpMethod::Post => with_headers(agent.post(url), headers).send(body),
        HttpMethod::Put => with_headers(agent.put(url), headers).send(body),
        HttpMethod::Patch => with_headers(agent.patch(url), headers).send(body),
    }
}

fn with_headers<B>(builder: RequestBuilder<B>, headers: &Headers) -> RequestBuilder<B> {
    headers
        .iter()
        .fold(builder, |builder, (name, value)| builder.header(name, value))
}

fn capture_head(reply: &http::Response<Body>, response: &mut Response) {
    let mut sink = HeaderCapture::new(response);
    sink.header_line(&format!("{:?} {}", reply.version(), reply.status()));
    for (name, value) in reply.headers() {
        sink.header_line(&format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())));
    }
}

fn record_timing(response: &mut Response, start: Instant, head_us: Option<u64>) {
    let total = elapsed_us(start);
    response.timing.insert("done".to_string(), total);
    response.timing.insert("native_total_time_us".to_string(), total);
    if let Some(head_us) = head_us {
        response
            .timing
            .insert("native_starttransfer_time_us".to_string(), head_us);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::config::{ClientConfig, RequestOptions};
    use crate::http::RequestData;

    fn prepared<'a>(
        method: HttpMethod,
        defaults: &'a Headers,
        headers: Headers,
        data: RequestData,
    ) -> PreparedRequest<'a> {
        PreparedRequest {
            method,
            url: Url::parse("http://localhost:17171/").unwrap(),
            default_headers: defaults,
            headers,
            data,
            options: RequestOptions::new().resolve(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn post_form_gets_default_content_type() {
        let defaults = ClientConfig::default().headers;
        let req = prepared(
            HttpMethod::Post,
            &defaults,
            Headers::new(),
            RequestData::from([("name", "test_value")]),
        );
        let (headers, body) = build_request(&req);
        assert_eq!(headers.get("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(headers.get("accept-encoding"), Some("gzip"));
        assert_eq!(headers.get("connection"), Some("close"));
        assert_eq!(body.unwrap(), b"name=test_value");
    }

    #[test]
    fn patch_raw_body_keeps_caller_content_type() {
        let defaults = ClientConfig::default().headers;
        let req = prepared(
            HttpMethod::Patch,
            &defaults,
            Headers::from([("Content-Type", "application/json-patch+json")]),
            RequestData::from(r#"[{"op":"replace","path":"/name","value":"x"}]"#),
        );
        let (headers, body) = build_request(&req);
        assert_eq!(headers.get("content-type"), Some("application/json-patch+json"));
        assert_eq!(body.unwrap(), br#"[{"op":"replace","path":"/name","value":"x"}]"#);
    }

    #[test]
    fn put_forces_form_content_type() {
        let defaults = ClientConfig::default().headers;
        let req = prepared(
            HttpMethod::Put,
            &defaults,
            Headers::from([("Content-Type", "application/json")]),
            RequestData::from([("name", "a b")]),
        );
        let (headers, body) = build_request(&req);
        assert_eq!(headers.get("content-type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(body.unwrap(), b"name=a+b");
    }

    #[test]
    fn get_has_no_body_and_caller_headers_win() {
        let defaults = ClientConfig::default().headers;
        let req = prepared(
            HttpMethod::Get,
            &defaults,
            Headers::from([("User-Agent", "custom-agent"), ("Accept-Encoding", "gzip, deflate")]),
            RequestData::from([("ignored", "yes")]),
        );
        let (headers, body) = build_request(&req);
        assert!(body.is_none());
        assert_eq!(headers.get("user-agent"), Some("custom-agent"));
        assert_eq!(headers.get("accept-encoding"), Some("gzip, deflate"));
    }

    #[test]
    fn disabled_encoding_sends_no_accept_encoding() {
        let defaults = ClientConfig::default().headers;
        let mut req = prepared(HttpMethod::Get, &defaults, Headers::new(), RequestData::Empty);
        req.options = RequestOptions::new().encoding("").resolve();
        let (headers, _) = build_request(&req);
        assert!(!headers.contains("accept-encoding"));
    }
}
