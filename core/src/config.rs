//! Service-wide configuration.
//!
//! Values here are defaults; every one of them can be overridden per request
//! by the matching `RequestDescription` field.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::http::StatusSet;
use crate::request::EncodingOptions;

/// Configuration shared by every call executed through one `NetworkService`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfiguration {
    /// Base url for requests that do not override the host.
    pub host: String,
    /// Headers attached to every request.
    pub headers: Vec<(String, String)>,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Option<Duration>,
    pub encoding_options: EncodingOptions,
    /// Statuses the default retry policy treats as recoverable.
    pub recoverable_statuses: Option<StatusSet>,
    /// Number of recovery cycles the default retry policy allows per call.
    pub recovery_attempts: u32,
}

impl Default for ServiceConfiguration {
    fn default() -> Self {
        Self {
            host: "http://localhost".to_string(),
            headers: Vec::new(),
            timeout: None,
            encoding_options: EncodingOptions::default(),
            recoverable_statuses: None,
            recovery_attempts: 1,
        }
    }
}

impl ServiceConfiguration {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The host must be an absolute url usable as a base.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.host).map_err(|e| ConfigError::InvalidHost {
            host: self.host.clone(),
            message: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidHost {
                host: self.host.clone(),
                message: "host cannot be a base url".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_encoding_options(mut self, options: EncodingOptions) -> Self {
        self.encoding_options = options;
        self
    }

    pub fn with_recoverable_statuses(mut self, statuses: impl Into<StatusSet>) -> Self {
        self.recoverable_statuses = Some(statuses.into());
        self
    }

    pub fn with_recovery_attempts(mut self, attempts: u32) -> Self {
        self.recovery_attempts = attempts;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::BoolEncoding;

    #[test]
    fn defaults_allow_one_recovery() {
        let config = ServiceConfiguration::default();
        assert_eq!(config.recovery_attempts, 1);
        assert!(config.recoverable_statuses.is_none());
        assert!(config.timeout.is_none());
        assert!(config.encoding_options.use_brackets_for_arrays);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = ServiceConfiguration::from_json(
            r#"{
                "host": "https://api.example.com",
                "headers": [["accept", "application/json"]],
                "timeout_ms": 1500,
                "encoding_options": { "bool_encoding": "numeric" },
                "recoverable_statuses": [429, 503]
            }"#,
        )
        .unwrap();
        assert_eq!(config.host, "https://api.example.com");
        assert_eq!(config.headers, vec![("accept".to_string(), "application/json".to_string())]);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.encoding_options.bool_encoding, BoolEncoding::Numeric);
        assert!(config.encoding_options.use_brackets_for_arrays);
        assert_eq!(config.recoverable_statuses, Some(StatusSet::from([429, 503])));
        assert_eq!(config.recovery_attempts, 1);
    }

    #[test]
    fn from_json_rejects_relative_host() {
        let err = ServiceConfiguration::from_json(r#"{"host": "api/v1"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHost { .. }));
    }

    #[test]
    fn from_json_rejects_malformed_document() {
        let err = ServiceConfiguration::from_json(r#"{"recovery_attempts": "many"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }
}
