//! Declarative request descriptions.
//!
//! # Design
//! A `RequestDescription` is an immutable value built by the caller with
//! consuming `with_*` methods. It names what to send (method, path,
//! parameters, headers) and how the call should be treated (valid statuses,
//! timeout, recovery overrides). Unset optional fields fall back to the
//! `ServiceConfiguration` when the request is encoded, or to the recoverer's
//! own policy when a failure is classified.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ServiceConfiguration;
use crate::error::{EncodeError, ErrorCode};
use crate::file::{MultipartFile, ResponseKind};
use crate::http::{HttpMethod, HttpRequest, StatusSet};

/// Request parameters as a JSON object. The transport encodes them.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// How request parameters are placed into the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterEncoding {
    /// URL query string.
    Url,
    /// JSON request body.
    Json,
    /// Parts of a multipart form.
    FormData,
}

impl ParameterEncoding {
    /// Query parameters for methods without a body, JSON otherwise.
    pub fn default_for(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get
            | HttpMethod::Head
            | HttpMethod::Delete
            | HttpMethod::Options
            | HttpMethod::Trace => ParameterEncoding::Url,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => ParameterEncoding::Json,
        }
    }
}

/// Strategy used to encode `bool` parameter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolEncoding {
    /// `true` / `false`.
    #[default]
    Literal,
    /// `1` / `0`.
    Numeric,
}

/// Options that customize how parameter values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingOptions {
    /// Encode `{"p": [1, 2]}` as `p[]=1&p[]=2` instead of `p=1&p=2`.
    pub use_brackets_for_arrays: bool,
    pub bool_encoding: BoolEncoding,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self {
            use_brackets_for_arrays: true,
            bool_encoding: BoolEncoding::Literal,
        }
    }
}

/// An immutable description of a request to perform.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescription {
    pub method: HttpMethod,
    /// Resource path relative to the host.
    pub path: String,
    /// Overrides the configuration's host.
    pub host: Option<String>,
    /// Override configuration headers with the same name.
    pub headers: Vec<(String, String)>,
    pub parameters: Option<Parameters>,
    pub encoding: Option<ParameterEncoding>,
    pub encoding_options: Option<EncodingOptions>,
    /// Uploaded as multipart parts after the parameters.
    pub files: Vec<MultipartFile>,
    pub response_kind: ResponseKind,
    /// Statuses accepted as a valid response.
    pub status_codes: StatusSet,
    pub timeout: Option<Duration>,
    pub max_recovery_attempts: Option<u32>,
    pub recoverable_statuses: Option<StatusSet>,
    pub recoverable_errors: Option<HashSet<ErrorCode>>,
}

impl RequestDescription {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            host: None,
            headers: Vec::new(),
            parameters: None,
            encoding: None,
            encoding_options: None,
            files: Vec::new(),
            response_kind: ResponseKind::Data,
            status_codes: StatusSet::success(),
            timeout: None,
            max_recovery_attempts: None,
            recoverable_statuses: None,
            recoverable_errors: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters
            .get_or_insert_with(Parameters::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_encoding(mut self, encoding: ParameterEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_encoding_options(mut self, options: EncodingOptions) -> Self {
        self.encoding_options = Some(options);
        self
    }

    pub fn with_file(mut self, file: MultipartFile) -> Self {
        self.files.push(file);
        self
    }

    /// Save the response body to `path` instead of holding it in memory.
    pub fn with_destination(mut self, path: impl Into<PathBuf>) -> Self {
        self.response_kind = ResponseKind::File(path.into());
        self
    }

    pub fn with_status_codes(mut self, statuses: impl Into<StatusSet>) -> Self {
        self.status_codes = statuses.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = Some(attempts);
        self
    }

    pub fn with_recoverable_statuses(mut self, statuses: impl Into<StatusSet>) -> Self {
        self.recoverable_statuses = Some(statuses.into());
        self
    }

    pub fn with_recoverable_errors(mut self, codes: impl IntoIterator<Item = ErrorCode>) -> Self {
        self.recoverable_errors = Some(codes.into_iter().collect());
        self
    }

    /// The encoding in effect: explicit override, form data when files are
    /// attached, or the method's default.
    pub fn effective_encoding(&self) -> ParameterEncoding {
        match (self.encoding, self.files.is_empty()) {
            (Some(encoding), _) => encoding,
            (None, false) => ParameterEncoding::FormData,
            (None, true) => ParameterEncoding::default_for(self.method),
        }
    }

    /// Resolve this description against `config` into a transport request.
    ///
    /// Configuration headers come first; request headers replace those with
    /// the same (case-insensitive) name.
    pub fn encode(&self, config: &ServiceConfiguration) -> Result<HttpRequest, EncodeError> {
        let host = self.host.as_deref().unwrap_or(&config.host);
        let url = join_url(host, &self.path)?;
        let encoding = self.effective_encoding();
        if !self.files.is_empty() && encoding != ParameterEncoding::FormData {
            return Err(EncodeError::FilesNeedFormData(encoding));
        }

        let mut request = HttpRequest {
            method: self.method,
            url,
            headers: config.headers.clone(),
            parameters: self.parameters.clone(),
            encoding,
            encoding_options: self.encoding_options.unwrap_or(config.encoding_options),
            files: self.files.clone(),
            response_kind: self.response_kind.clone(),
            timeout: self.timeout.or(config.timeout),
        };
        for (name, value) in &self.headers {
            request.set_header(name, value.clone());
        }
        Ok(request)
    }
}

fn join_url(host: &str, path: &str) -> Result<String, EncodeError> {
    let base = Url::parse(host).map_err(|e| EncodeError::InvalidHost {
        host: host.to_string(),
        message: e.to_string(),
    })?;
    if base.cannot_be_a_base() {
        return Err(EncodeError::InvalidHost {
            host: host.to_string(),
            message: "host cannot be a base url".to_string(),
        });
    }

    let joined = match path.trim_start_matches('/') {
        "" => host.to_string(),
        relative => format!("{}/{relative}", host.trim_end_matches('/')),
    };
    Url::parse(&joined)
        .map(|url| url.to_string())
        .map_err(|e| EncodeError::InvalidPath {
            path: path.to_string(),
            message: e.to_string(),
        })
}

impl fmt::Display for RequestDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '", self.method)?;
        if let Some(host) = &self.host {
            write!(f, "{}/", host.trim_end_matches('/'))?;
        }
        write!(f, "{}'", self.path)?;
        if !self.headers.is_empty() {
            write!(f, "\nHeaders:")?;
            for (name, value) in &self.headers {
                write!(f, "\n  {name}: {value}")?;
            }
        }
        if let Some(parameters) = &self.parameters {
            write!(f, "\nParameters:\n  {}", serde_json::Value::Object(parameters.clone()))?;
        }
        if !self.files.is_empty() {
            write!(f, "\nFiles:")?;
            for file in &self.files {
                write!(f, "\n  {}: {} ({})", file.name, file.file_name, file.mime_type)?;
            }
        }
        Ok(())
    }
}
