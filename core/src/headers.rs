//! Normalization of raw response header lines.
//!
//! Both backends end up with the same shape: lowercase trimmed keys, last
//! occurrence wins, numeric-looking values stored as integers. The native
//! backend feeds lines one at a time through a [`HeaderSink`]; the stream
//! backend parses the whole block at once with [`parse_header_block`].

use std::collections::BTreeMap;

use tracing::trace;

use crate::response::{HeaderValue, Response};

const VERSION_KEY: &str = "http_version";
const CODE_KEY: &str = "response_code";

/// Store a value as an integer when it looks like a number.
///
/// Accepts an optional sign, digits with an optional fraction and an
/// optional exponent. Fractions are truncated and values outside `i64`
/// saturate.
pub fn coerce_value(value: &str) -> HeaderValue {
    if let Ok(n) = value.parse::<i64>() {
        return HeaderValue::Int(n);
    }
    if looks_numeric(value) {
        if let Ok(f) = value.parse::<f64>() {
            return HeaderValue::Int(f as i64);
        }
    }
    HeaderValue::Text(value.to_string())
}

fn looks_numeric(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    let count_digits = |i: &mut usize| {
        let start = *i;
        while *i < b.len() && b[*i].is_ascii_digit() {
            *i += 1;
        }
        *i - start
    };

    if matches!(b.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let mut mantissa = count_digits(&mut i);
    if b.get(i) == Some(&b'.') {
        i += 1;
        mantissa += count_digits(&mut i);
    }
    if mantissa == 0 {
        return false;
    }
    if matches!(b.get(i), Some(b'e' | b'E')) {
        i += 1;
        if matches!(b.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        if count_digits(&mut i) == 0 {
            return false;
        }
    }
    i == b.len()
}

/// Parse `HTTP/<version> <code> ...` into `(version, code)`.
pub fn parse_status_line(line: &str) -> Option<(f64, u16)> {
    let rest = line.trim_start().strip_prefix("HTTP/")?;
    let version_len = rest.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    if version_len == 0 {
        return None;
    }
    let (version, rest) = rest.split_at(version_len);
    let after_space = rest.trim_start();
    if after_space.len() == rest.len() {
        return None;
    }
    let code_len = after_space
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_space.len());
    if code_len == 0 {
        return None;
    }
    let code = after_space[..code_len].parse().ok()?;
    Some((parse_version(version), code))
}

/// Leading numeric prefix of a version token, so `1.1` and `2` both parse.
fn parse_version(token: &str) -> f64 {
    if let Ok(v) = token.parse() {
        return v;
    }
    let mut parts = token.splitn(3, '.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next().unwrap_or_default();
    format!("{major}.{minor}").parse().unwrap_or(0.0)
}

/// Split a `Name: Value` line once on the first colon.
pub fn split_header_line(line: &str) -> Option<(String, HeaderValue)> {
    let (key, value) = split_raw(line)?;
    Some((key, coerce_value(value)))
}

fn split_raw(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_ascii_lowercase(), value.trim()))
}

/// Receives raw header lines as they arrive.
pub trait HeaderSink {
    fn header_line(&mut self, line: &str);
}

/// Per-line state machine writing straight into a [`Response`].
///
/// Lines without a colon are tried as status lines and set the protocol
/// version and status code; every other line becomes a header.
pub struct HeaderCapture<'a> {
    response: &'a mut Response,
}

impl<'a> HeaderCapture<'a> {
    pub fn new(response: &'a mut Response) -> Self {
        Self { response }
    }
}

impl HeaderSink for HeaderCapture<'_> {
    fn header_line(&mut self, line: &str) {
        trace!(line, "response header line");
        if let Some((key, value)) = split_header_line(line) {
            self.response.headers.insert(key, value);
            return;
        }
        if let Some((version, code)) = parse_status_line(line) {
            self.response.protocol_version = version;
            self.response.status_code = code;
        }
    }
}

/// Result of [`parse_header_block`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedHeaders {
    pub protocol_version: f64,
    pub status_code: u16,
    pub headers: BTreeMap<String, HeaderValue>,
}

/// Parse a complete header block whose first line is the status line.
///
/// The status line is turned into `http_version` / `response_code`
/// pseudo-headers appended after the real ones, the whole block is
/// normalized, and the pseudo-headers are popped back out.
pub fn parse_header_block<S: AsRef<str>>(lines: &[S]) -> ParsedHeaders {
    let Some((first, rest)) = lines.split_first() else {
        return ParsedHeaders::default();
    };

    let mut synthetic = Vec::new();
    if let Some((version, code)) = parse_status_line(first.as_ref()) {
        synthetic.push(format!("{VERSION_KEY}: {version}"));
        synthetic.push(format!("{CODE_KEY}: {code}"));
    }

    let mut raw: BTreeMap<String, &str> = BTreeMap::new();
    let lines = rest
        .iter()
        .map(<S as AsRef<str>>::as_ref)
        .chain(synthetic.iter().map(String::as_str));
    for line in lines {
        if let Some((key, value)) = split_raw(line) {
            raw.insert(key, value);
        }
    }

    let protocol_version = raw
        .remove(VERSION_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0);
    let status_code = raw
        .remove(CODE_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let headers = raw
        .into_iter()
        .map(|(key, value)| (key, coerce_value(value)))
        .collect();

    ParsedHeaders {
        protocol_version,
        status_code,
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backend;

    #[test]
    fn coerces_integers() {
        assert_eq!(coerce_value("1234"), HeaderValue::Int(1234));
        assert_eq!(coerce_value("-7"), HeaderValue::Int(-7));
        assert_eq!(coerce_value("+3"), HeaderValue::Int(3));
    }

    #[test]
    fn coerces_decimal_and_exponent_forms_by_truncation() {
        assert_eq!(coerce_value("1.9"), HeaderValue::Int(1));
        assert_eq!(coerce_value(".5"), HeaderValue::Int(0));
        assert_eq!(coerce_value("1e3"), HeaderValue::Int(1000));
        assert_eq!(coerce_value("99999999999999999999"), HeaderValue::Int(i64::MAX));
    }

    #[test]
    fn leaves_text_alone() {
        for value in ["application/json", "", "1.2.3", "0x1A", "inf", "NaN", "12abc", "\"123\"", "1e"] {
            assert_eq!(coerce_value(value), HeaderValue::Text(value.to_string()), "{value}");
        }
    }

    #[test]
    fn status_lines() {
        assert_eq!(parse_status_line("HTTP/1.1 200 OK"), Some((1.1, 200)));
        assert_eq!(parse_status_line("HTTP/2 204"), Some((2.0, 204)));
        assert_eq!(parse_status_line("HTTP/1.0 405 Method Not Allowed\r\n"), Some((1.0, 405)));
        assert_eq!(parse_status_line("HTTP/1.1200 OK"), None);
        assert_eq!(parse_status_line("HTTP/ 200"), None);
        assert_eq!(parse_status_line("Content-Type: text/html"), None);
    }

    #[test]
    fn header_lines_split_on_first_colon() {
        let (key, value) = split_header_line("  Location : http://localhost:17171/ \r\n").unwrap();
        assert_eq!(key, "location");
        assert_eq!(value, HeaderValue::Text("http://localhost:17171/".to_string()));
        assert!(split_header_line("no colon here").is_none());
        assert!(split_header_line(": orphan").is_none());
    }

    #[test]
    fn capture_runs_the_line_state_machine() {
        let mut response = Response::new(Backend::Native);
        {
            let mut capture = HeaderCapture::new(&mut response);
            for line in [
                "HTTP/1.1 302 Found\r\n",
                "Location: http://localhost:17171/\r\n",
                "Content-Length: 0\r\n",
                "X-Dup: first\r\n",
                "x-dup: second\r\n",
                "\r\n",
            ] {
                capture.header_line(line);
            }
        }
        assert_eq!(response.status_code, 302);
        assert_eq!(response.protocol_version, 1.1);
        assert_eq!(response.headers["location"], HeaderValue::Text("http://localhost:17171/".into()));
        assert_eq!(response.headers["content-length"], HeaderValue::Int(0));
        assert_eq!(response.headers["x-dup"], HeaderValue::Text("second".into()));
        assert_eq!(response.headers.len(), 3);
    }

    #[test]
    fn block_parser_pops_pseudo_headers() {
        let parsed = parse_header_block(&[
            "HTTP/1.0 201 Created",
            "Content-Type: application/json",
            "Content-Length: 17",
        ]);
        assert_eq!(parsed.status_code, 201);
        assert_eq!(parsed.protocol_version, 1.0);
        assert!(!parsed.headers.contains_key("http_version"));
        assert!(!parsed.headers.contains_key("response_code"));
        assert_eq!(parsed.headers["content-length"], HeaderValue::Int(17));
    }

    #[test]
    fn block_parser_keeps_fractional_version() {
        let parsed = parse_header_block(&["HTTP/1.1 200 OK"]);
        assert_eq!(parsed.protocol_version, 1.1);
        assert_eq!(parsed.status_code, 200);
        assert!(parsed.headers.is_empty());
    }

    #[test]
    fn block_parser_without_status_line() {
        let parsed = parse_header_block(&["garbage", "Server: x"]);
        assert_eq!(parsed.status_code, 0);
        assert_eq!(parsed.headers["server"], HeaderValue::Text("x".into()));
        assert_eq!(parse_header_block::<&str>(&[]), ParsedHeaders::default());
    }
}
