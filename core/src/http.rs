//! Request-side data: verbs, header lists and body payloads.
//!
//! # Design
//! These types describe one call as plain data. `Headers` keeps the caller's
//! spelling and order because both backends render it verbatim on the wire;
//! only lookups and collisions are case-insensitive.

use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ClientError;

/// Content type used whenever a body is form-encoded.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(ClientError::InvalidOption {
                key: "method".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Ordered request headers with case-insensitive collisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a header. An existing entry with the same name (ignoring case)
    /// is replaced in place and takes the new spelling.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(entry) => *entry = (name, value),
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Copy of `self` with every entry of `overrides` inserted on top.
    pub fn merged_with(&self, overrides: &Headers) -> Headers {
        let mut merged = self.clone();
        for (name, value) in overrides.iter() {
            merged.insert(name, value);
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Headers {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    headers.insert(name, value);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Body payload of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestData {
    #[default]
    Empty,
    /// Sent verbatim, e.g. pre-serialized JSON.
    Raw(String),
    /// Key/value pairs, form-encoded on the wire.
    Form(Vec<(String, String)>),
}

impl RequestData {
    pub fn is_empty(&self) -> bool {
        match self {
            RequestData::Empty => true,
            RequestData::Raw(s) => s.is_empty(),
            RequestData::Form(pairs) => pairs.is_empty(),
        }
    }

    /// `application/x-www-form-urlencoded` rendering of a form payload.
    /// Raw payloads are returned unchanged; they have no pairs to encode.
    pub fn form_encoded(&self) -> String {
        match self {
            RequestData::Empty => String::new(),
            RequestData::Raw(s) => s.clone(),
            RequestData::Form(pairs) => form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter())
                .finish(),
        }
    }

    pub fn is_form(&self) -> bool {
        matches!(self, RequestData::Form(_))
    }
}

impl From<&str> for RequestData {
    fn from(s: &str) -> Self {
        RequestData::Raw(s.to_string())
    }
}

impl From<String> for RequestData {
    fn from(s: String) -> Self {
        RequestData::Raw(s)
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for RequestData {
    fn from(pairs: Vec<(K, V)>) -> Self {
        RequestData::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for RequestData {
    fn from(pairs: [(K, V); N]) -> Self {
        RequestData::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
