//! Error types for the call orchestrator.
//!
//! # Design
//! Every terminal call failure is a `ServiceError` carrying the original
//! request description, the response (if one was received), the transport
//! error (if one occurred) and an `ErrorReason` tag. Callers branch on the
//! reason rather than on string messages. Transport-level failures use a
//! closed set of `ErrorCode` values so that recoverability policies can be
//! configured with plain sets of codes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::HttpResponse;
use crate::request::{ParameterEncoding, RequestDescription};

/// Classified transport failure codes reported by a `Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    TimedOut,
    CannotConnectToHost,
    NetworkConnectionLost,
    NotConnectedToInternet,
    DnsLookupFailed,
    CannotFindHost,
    SecureConnectionFailed,
    BadServerResponse,
    Cancelled,
    /// The transport could not turn the request into bytes.
    RequestEncoding,
    Other(i32),
}

impl ErrorCode {
    /// Codes retried when neither the request nor the policy names any.
    pub const DEFAULT_RECOVERABLE: [ErrorCode; 6] = [
        ErrorCode::TimedOut,
        ErrorCode::CannotConnectToHost,
        ErrorCode::NetworkConnectionLost,
        ErrorCode::NotConnectedToInternet,
        ErrorCode::DnsLookupFailed,
        ErrorCode::CannotFindHost,
    ];
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::TimedOut => write!(f, "timed out"),
            ErrorCode::CannotConnectToHost => write!(f, "cannot connect to host"),
            ErrorCode::NetworkConnectionLost => write!(f, "network connection lost"),
            ErrorCode::NotConnectedToInternet => write!(f, "not connected to internet"),
            ErrorCode::DnsLookupFailed => write!(f, "dns lookup failed"),
            ErrorCode::CannotFindHost => write!(f, "cannot find host"),
            ErrorCode::SecureConnectionFailed => write!(f, "secure connection failed"),
            ErrorCode::BadServerResponse => write!(f, "bad server response"),
            ErrorCode::Cancelled => write!(f, "cancelled"),
            ErrorCode::RequestEncoding => write!(f, "request encoding failed"),
            ErrorCode::Other(code) => write!(f, "transport error {code}"),
        }
    }
}

/// A failure reported by the transport before any response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: ErrorCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Why a call terminated without a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// An interceptor vetoed the call or suppressed its response.
    Skipped,
    /// The response status was outside the valid set and was not recovered.
    HttpError,
    /// The transport failed before any response was received.
    Unreachable,
    /// The response body did not match the handler's expected shape.
    DeserializationFailure,
    /// The request could not be encoded.
    EncodingFailure,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Skipped => write!(f, "skipped"),
            ErrorReason::HttpError => write!(f, "http error"),
            ErrorReason::Unreachable => write!(f, "unreachable"),
            ErrorReason::DeserializationFailure => write!(f, "deserialization failure"),
            ErrorReason::EncodingFailure => write!(f, "encoding failure"),
        }
    }
}

/// Terminal failure of a single call, delivered to the call's error handler.
#[derive(Debug, Clone, Error)]
#[error("{reason} for {request}{}", detail_suffix(.response.as_ref(), .detail.as_deref()))]
pub struct ServiceError {
    pub request: Arc<RequestDescription>,
    pub response: Option<HttpResponse>,
    #[source]
    pub error: Option<TransportError>,
    pub detail: Option<String>,
    pub reason: ErrorReason,
}

fn detail_suffix(response: Option<&HttpResponse>, detail: Option<&str>) -> String {
    let mut suffix = String::new();
    if let Some(response) = response {
        suffix.push_str(&format!(" (HTTP {})", response.status));
    }
    if let Some(detail) = detail {
        suffix.push_str(": ");
        suffix.push_str(detail);
    }
    suffix
}

impl ServiceError {
    pub fn new(request: Arc<RequestDescription>, reason: ErrorReason) -> Self {
        Self {
            request,
            response: None,
            error: None,
            detail: None,
            reason,
        }
    }

    pub fn with_response(mut self, response: HttpResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_error(mut self, error: TransportError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// A response body could not be decoded by a `FromResponse` type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot decode {expected} response: {message}")]
pub struct DecodeError {
    pub expected: &'static str,
    pub message: String,
}

/// A request description could not be turned into an `HttpRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("invalid host url '{host}': {message}")]
    InvalidHost { host: String, message: String },

    #[error("invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("file parts need form data encoding, not {0:?}")]
    FilesNeedFormData(ParameterEncoding),
}

/// Service configuration could not be loaded or is invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid host '{host}': {message}")]
    InvalidHost { host: String, message: String },
}
