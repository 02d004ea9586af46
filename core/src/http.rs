//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data. The core
//! encodes a `RequestDescription` into an `HttpRequest`, hands it to the
//! caller's `Transport`, and classifies the `HttpResponse` that comes back.
//! The core never touches the network itself.
//!
//! All fields use owned types so values can move freely between the
//! orchestrator, interceptors, recoverers and transport tasks.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::file::{MultipartFile, ResponseKind};
use crate::request::{EncodingOptions, ParameterEncoding, Parameters};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Trace,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// GET, HEAD, OPTIONS and TRACE (RFC 7231 §4.2.1).
    pub fn safe() -> HashSet<HttpMethod> {
        [HttpMethod::Get, HttpMethod::Head, HttpMethod::Options, HttpMethod::Trace]
            .into_iter()
            .collect()
    }

    /// Safe methods plus PUT and DELETE (RFC 7231 §4.2.2).
    pub fn idempotent() -> HashSet<HttpMethod> {
        let mut methods = Self::safe();
        methods.extend([HttpMethod::Put, HttpMethod::Delete]);
        methods
    }

    /// POST and PATCH.
    pub fn non_idempotent() -> HashSet<HttpMethod> {
        [HttpMethod::Post, HttpMethod::Patch].into_iter().collect()
    }

    pub fn all() -> HashSet<HttpMethod> {
        let mut methods = Self::idempotent();
        methods.extend(Self::non_idempotent());
        methods
    }

    pub fn is_idempotent(self) -> bool {
        !matches!(self, HttpMethod::Post | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of HTTP status codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSet(BTreeSet<u16>);

impl StatusSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 200 through 299.
    pub fn success() -> Self {
        Self::range(200..=299)
    }

    pub fn range(range: RangeInclusive<u16>) -> Self {
        Self(range.collect())
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.contains(&status)
    }

    pub fn insert(&mut self, status: u16) -> bool {
        self.0.insert(status)
    }

    pub fn union(&self, other: &StatusSet) -> StatusSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u16> for StatusSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[u16; N]> for StatusSet {
    fn from(statuses: [u16; N]) -> Self {
        statuses.into_iter().collect()
    }
}

impl From<RangeInclusive<u16>> for StatusSet {
    fn from(range: RangeInclusive<u16>) -> Self {
        Self::range(range)
    }
}

/// An HTTP request described as plain data.
///
/// Produced by `RequestDescription::encode` for every call. The transport is
/// responsible for turning `parameters` into query or body bytes according to
/// `encoding` and `encoding_options`, for writing `files` as multipart parts,
/// for saving the body when `response_kind` names a file, and for honouring
/// `timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub parameters: Option<Parameters>,
    pub encoding: ParameterEncoding,
    pub encoding_options: EncodingOptions,
    pub files: Vec<MultipartFile>,
    pub response_kind: ResponseKind,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replace any header with the same name, or append a new one.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }
}

/// An HTTP response described as plain data.
///
/// Constructed by the transport after executing an `HttpRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Where the transport saved the body, for file downloads.
    pub file: Option<PathBuf>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
