//! Backend selection, per-call options and the client's default templates.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClientError;
use crate::http::Headers;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ENCODING: &str = "gzip";
pub const DEFAULT_USER_AGENT: &str = concat!("twin-http/", env!("CARGO_PKG_VERSION"));

/// Which transport strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Backend {
    /// Full-featured client library with phase timings.
    Native,
    /// Context-described fetch over a single HTTP/1.1 connection.
    Stream,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Native => "native",
            Backend::Stream => "stream",
        }
    }

    /// Historical status policy: the stream backend folds 4xx/5xx into the
    /// error flag, the native backend only flags transport failures.
    pub fn default_error_on_http_status(&self) -> bool {
        match self {
            Backend::Native => false,
            Backend::Stream => true,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Backend::Native),
            "stream" => Ok(Backend::Stream),
            other => Err(ClientError::UnsupportedBackend(other.to_string())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = ClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Per-call options. Unset fields fall back to the client's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub using: Option<Backend>,
    #[serde(with = "duration_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Compression to request. An empty string disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_on_http_status: Option<bool>,
    /// Caller-supplied cancellation point; caps the timeout.
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn using(mut self, backend: Backend) -> Self {
        self.using = Some(backend);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = Some(Duration::from_secs_f64(secs));
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn error_on_http_status(mut self, enabled: bool) -> Self {
        self.error_on_http_status = Some(enabled);
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Build options from a string-keyed mapping such as
    /// `[("using", "stream"), ("timeout", "1")]`. Unknown keys are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = RequestOptions::new();
        for (key, value) in pairs {
            match key {
                "using" => options.using = Some(value.parse()?),
                "timeout" => {
                    let secs = value
                        .parse::<f64>()
                        .ok()
                        .filter(|s| s.is_finite() && *s >= 0.0)
                        .ok_or_else(|| invalid(key, value))?;
                    options.timeout = Some(Duration::from_secs_f64(secs));
                }
                "encoding" => options.encoding = Some(value.to_string()),
                "error_on_http_status" => {
                    options.error_on_http_status =
                        Some(value.parse().map_err(|_| invalid(key, value))?);
                }
                other => debug!(option = other, "ignoring unrecognized request option"),
            }
        }
        Ok(options)
    }

    /// Field-by-field merge where `self` wins over `defaults`.
    pub fn merged_over(&self, defaults: &RequestOptions) -> RequestOptions {
        RequestOptions {
            using: self.using.or(defaults.using),
            timeout: self.timeout.or(defaults.timeout),
            encoding: self.encoding.clone().or_else(|| defaults.encoding.clone()),
            error_on_http_status: self.error_on_http_status.or(defaults.error_on_http_status),
            deadline: self.deadline.or(defaults.deadline),
        }
    }

    /// Fill every remaining gap with the built-in defaults.
    pub fn resolve(&self) -> ResolvedOptions {
        let backend = self.using.unwrap_or(Backend::Native);
        ResolvedOptions {
            backend,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            encoding: match &self.encoding {
                Some(e) if e.is_empty() => None,
                Some(e) => Some(e.clone()),
                None => Some(DEFAULT_ENCODING.to_string()),
            },
            error_on_http_status: self
                .error_on_http_status
                .unwrap_or_else(|| backend.default_error_on_http_status()),
            deadline: self.deadline,
        }
    }
}

fn invalid(key: &str, value: &str) -> ClientError {
    ClientError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Options with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub backend: Backend,
    pub timeout: Duration,
    pub encoding: Option<String>,
    pub error_on_http_status: bool,
    pub deadline: Option<Instant>,
}

impl ResolvedOptions {
    /// Time left for the call, or `None` once the deadline has passed.
    pub fn effective_timeout(&self, now: Instant) -> Option<Duration> {
        match self.deadline {
            Some(deadline) => {
                let left = deadline.checked_duration_since(now)?;
                if left.is_zero() {
                    return None;
                }
                Some(left.min(self.timeout))
            }
            None => Some(self.timeout),
        }
    }
}

/// Immutable default templates attached to a client at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub options: RequestOptions,
    pub headers: Headers,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            options: RequestOptions::new()
                .using(Backend::Native)
                .timeout(DEFAULT_TIMEOUT)
                .encoding(DEFAULT_ENCODING),
            headers: Headers::from([
                ("Connection", "close"),
                ("Accept", "*/*"),
                ("User-Agent", DEFAULT_USER_AGENT),
            ]),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Add or replace one default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Load a JSON config. Missing sections keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ClientError> {
        serde_json::from_str(json).map_err(|e| ClientError::Config(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_f64(d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(deserializer)?;
        secs.map(|s| {
            Duration::try_from_secs_f64(s).map_err(|_| serde::de::Error::custom(format!("invalid timeout {s}")))
        })
        .transpose()
    }
}
