//! Small synchronous HTTP client with two interchangeable backends.
//!
//! # Overview
//! `HttpClient` exposes one method per verb (GET, POST, PUT, PATCH, DELETE,
//! HEAD, OPTIONS). Each call is dispatched to either the native backend
//! (the `ureq` client) or the stream backend (a context-described fetch over
//! a single `hyper` connection) and comes back as the same normalized `Response`: lowercase
//! header keys, numeric header values as integers, timings in microseconds.
//!
//! # Design
//! - Configuration problems (unknown backend, refused scheme) are `Err`.
//! - Transport problems never are; they set `Response::error`.
//! - Whether 4xx/5xx also set `error` is an explicit option whose default
//!   depends on the backend (off for native, on for stream).
//! - Redirects are never followed; the 3xx is returned with its `location`.

mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod headers;
pub mod http;
pub mod response;

pub use client::HttpClient;
pub use config::{Backend, ClientConfig, RequestOptions, ResolvedOptions};
pub use error::{ClientError, TransportError};
pub use headers::{HeaderCapture, HeaderSink, ParsedHeaders};
pub use http::{Headers, HttpMethod, RequestData, FORM_CONTENT_TYPE};
pub use response::{HeaderValue, Response};
