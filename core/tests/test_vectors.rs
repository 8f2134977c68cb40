//! Verify header normalization against JSON test vectors stored in `test-vectors/`.
//!
//! Each case lists raw header lines (status line first) and the normalized
//! status, protocol version and header map. Both the one-pass block parser
//! and the per-line capture must agree with the vector.

use twin_http::headers::parse_header_block;
use twin_http::{Backend, HeaderCapture, HeaderSink, Response};

fn vectors() -> serde_json::Value {
    let raw = include_str!("../../test-vectors/headers.json");
    serde_json::from_str(raw).unwrap()
}

fn lines(case: &serde_json::Value) -> Vec<String> {
    case["lines"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l.as_str().unwrap().to_string())
        .collect()
}

#[test]
fn block_parser_matches_vectors() {
    for case in vectors()["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let expected = &case["expected"];

        let parsed = parse_header_block(&lines(case));
        assert_eq!(parsed.status_code as u64, expected["status_code"].as_u64().unwrap(), "{name}: status");
        assert_eq!(parsed.protocol_version, expected["protocol_version"].as_f64().unwrap(), "{name}: version");
        assert_eq!(serde_json::to_value(&parsed.headers).unwrap(), expected["headers"], "{name}: headers");
    }
}

#[test]
fn line_capture_matches_vectors() {
    for case in vectors()["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let expected = &case["expected"];

        let mut response = Response::new(Backend::Native);
        {
            let mut capture = HeaderCapture::new(&mut response);
            for line in lines(case) {
                capture.header_line(&format!("{line}\r\n"));
            }
            capture.header_line("\r\n");
        }
        assert_eq!(response.status_code as u64, expected["status_code"].as_u64().unwrap(), "{name}: status");
        assert_eq!(response.protocol_version, expected["protocol_version"].as_f64().unwrap(), "{name}: version");
        assert_eq!(serde_json::to_value(&response.headers).unwrap(), expected["headers"], "{name}: headers");
    }
}
