//! Recoverability policy: decides whether a failed call may be retried.
//!
//! # Design
//! `RetryPolicy` is an immutable value with no interior state, so one policy
//! can be shared by every concurrent call. Each limit has three layers: the
//! request's own override wins, then the policy's configured value, then the
//! built-in default.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::call::Call;
use crate::config::ServiceConfiguration;
use crate::error::ErrorCode;
use crate::http::{HttpMethod, StatusSet};
use crate::request::RequestDescription;

/// Statuses retried when neither the request nor the policy names any:
/// 408, 500, 502, 503 and 504.
pub const DEFAULT_RECOVERABLE_STATUSES: [u16; 5] = [408, 500, 502, 503, 504];

/// The failure signal produced by one dispatch attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Failure {
    pub status: Option<u16>,
    pub error: Option<ErrorCode>,
}

impl Failure {
    pub fn status(status: u16) -> Self {
        Self {
            status: Some(status),
            error: None,
        }
    }

    pub fn transport(error: ErrorCode) -> Self {
        Self {
            status: None,
            error: Some(error),
        }
    }
}

/// Method-aware retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Methods that may be retried. Defaults to the idempotent methods.
    pub methods: HashSet<HttpMethod>,
    /// Recovery cycles allowed per call. `0` disables recovery unless a
    /// request sets its own non-zero limit.
    pub max_attempts: u32,
    pub statuses: Option<StatusSet>,
    pub errors: Option<HashSet<ErrorCode>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            methods: HttpMethod::idempotent(),
            max_attempts: 1,
            statuses: None,
            errors: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy seeded from the service-wide recovery settings.
    pub fn from_configuration(config: &ServiceConfiguration) -> Self {
        Self {
            max_attempts: config.recovery_attempts,
            statuses: config.recoverable_statuses.clone(),
            ..Self::default()
        }
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = HttpMethod>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_statuses(mut self, statuses: impl Into<StatusSet>) -> Self {
        self.statuses = Some(statuses.into());
        self
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = ErrorCode>) -> Self {
        self.errors = Some(errors.into_iter().collect());
        self
    }

    /// The request's override when it is non-zero, otherwise the policy's
    /// own limit. A zero override counts as unset.
    pub fn effective_max_attempts(&self, request: &RequestDescription) -> u32 {
        request
            .max_recovery_attempts
            .filter(|attempts| *attempts > 0)
            .unwrap_or(self.max_attempts)
    }

    fn status_recoverable(&self, request: &RequestDescription, status: u16) -> bool {
        match request.recoverable_statuses.as_ref().or(self.statuses.as_ref()) {
            Some(statuses) => statuses.contains(status),
            None => DEFAULT_RECOVERABLE_STATUSES.contains(&status),
        }
    }

    fn error_recoverable(&self, request: &RequestDescription, error: ErrorCode) -> bool {
        match request.recoverable_errors.as_ref().or(self.errors.as_ref()) {
            Some(errors) => errors.contains(&error),
            None => ErrorCode::DEFAULT_RECOVERABLE.contains(&error),
        }
    }

    /// Whether `call` may go through another recovery cycle after `failure`.
    pub fn can_recover(&self, call: &Call, failure: &Failure) -> bool {
        let request = call.request();

        if !self.methods.contains(&request.method) {
            return false;
        }
        if call.attempts() >= self.effective_max_attempts(request) {
            return false;
        }

        match (failure.status, failure.error) {
            (None, None) => true,
            (status, error) => {
                status.is_some_and(|s| self.status_recoverable(request, s))
                    || error.is_some_and(|e| self.error_recoverable(request, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(request: RequestDescription, attempts: u32) -> Call {
        let call = Call::new(request);
        for _ in 0..attempts {
            call.record_recovery();
        }
        call
    }

    #[test]
    fn default_policy_retries_idempotent_server_errors_once() {
        let policy = RetryPolicy::default();
        let get = call(RequestDescription::get("a"), 0);
        assert!(policy.can_recover(&get, &Failure::status(503)));
        assert!(!policy.can_recover(&get, &Failure::status(404)));

        let exhausted = call(RequestDescription::get("a"), 1);
        assert!(!policy.can_recover(&exhausted, &Failure::status(503)));
    }

    #[test]
    fn post_is_never_retried_by_default() {
        let policy = RetryPolicy::default();
        let post = call(RequestDescription::post("a"), 0);
        assert!(!policy.can_recover(&post, &Failure::status(503)));
        assert!(!policy.can_recover(&post, &Failure::transport(ErrorCode::TimedOut)));
    }

    #[test]
    fn request_overrides_take_priority() {
        let policy = RetryPolicy::default().with_statuses([500]).with_max_attempts(5);
        let request = RequestDescription::get("a")
            .with_recoverable_statuses([429])
            .with_max_recovery_attempts(1);

        assert!(policy.can_recover(&call(request.clone(), 0), &Failure::status(429)));
        assert!(!policy.can_recover(&call(request.clone(), 0), &Failure::status(500)));
        assert!(!policy.can_recover(&call(request, 1), &Failure::status(429)));
    }

    #[test]
    fn zero_policy_attempts_disables_recovery() {
        let policy = RetryPolicy::default().with_max_attempts(0);
        assert!(!policy.can_recover(&call(RequestDescription::get("a"), 0), &Failure::default()));
        assert!(!policy.can_recover(&call(RequestDescription::get("a"), 0), &Failure::status(503)));
    }

    #[test]
    fn zero_request_override_falls_back_to_policy() {
        let policy = RetryPolicy::default().with_max_attempts(3);
        let request = RequestDescription::get("a").with_max_recovery_attempts(0);
        assert_eq!(policy.effective_max_attempts(&request), 3);
        assert!(policy.can_recover(&call(request.clone(), 0), &Failure::status(503)));
        assert!(policy.can_recover(&call(request.clone(), 2), &Failure::status(503)));
        assert!(!policy.can_recover(&call(request, 3), &Failure::status(503)));
    }

    #[test]
    fn signal_without_status_or_error_is_permissive() {
        let policy = RetryPolicy::default();
        assert!(policy.can_recover(&call(RequestDescription::get("a"), 0), &Failure::default()));
    }

    #[test]
    fn status_or_error_is_enough() {
        let policy = RetryPolicy::default().with_statuses([503]).with_errors([ErrorCode::TimedOut]);
        let get = call(RequestDescription::get("a"), 0);
        let both = Failure {
            status: Some(404),
            error: Some(ErrorCode::TimedOut),
        };
        assert!(policy.can_recover(&get, &both));
        let neither = Failure {
            status: Some(404),
            error: Some(ErrorCode::Cancelled),
        };
        assert!(!policy.can_recover(&get, &neither));
    }

    #[test]
    fn from_configuration_uses_configured_limits() {
        let config = ServiceConfiguration::default()
            .with_recovery_attempts(3)
            .with_recoverable_statuses([429]);
        let policy = RetryPolicy::from_configuration(&config);
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.can_recover(&call(RequestDescription::get("a"), 2), &Failure::status(429)));
        assert!(!policy.can_recover(&call(RequestDescription::get("a"), 0), &Failure::status(503)));
    }

    // -----------------------------------------------------------------------
    // Test vectors
    // -----------------------------------------------------------------------

    #[derive(Deserialize)]
    struct Vectors {
        cases: Vec<Case>,
    }

    #[derive(Deserialize)]
    struct Case {
        name: String,
        method: HttpMethod,
        attempts: u32,
        #[serde(default)]
        request: Overrides,
        #[serde(default)]
        policy: PolicyConfig,
        failure: Failure,
        expected: bool,
    }

    #[derive(Default, Deserialize)]
    struct Overrides {
        max_attempts: Option<u32>,
        statuses: Option<Vec<u16>>,
        errors: Option<Vec<ErrorCode>>,
    }

    #[derive(Default, Deserialize)]
    struct PolicyConfig {
        methods: Option<Vec<HttpMethod>>,
        max_attempts: Option<u32>,
        statuses: Option<Vec<u16>>,
        errors: Option<Vec<ErrorCode>>,
    }

    #[test]
    fn recoverability_test_vectors() {
        let raw = include_str!("../../test-vectors/recoverability.json");
        let vectors: Vectors = serde_json::from_str(raw).unwrap();
        assert!(!vectors.cases.is_empty());

        for case in vectors.cases {
            let mut policy = RetryPolicy::default();
            if let Some(methods) = case.policy.methods {
                policy = policy.with_methods(methods);
            }
            if let Some(max) = case.policy.max_attempts {
                policy = policy.with_max_attempts(max);
            }
            if let Some(statuses) = case.policy.statuses {
                policy = policy.with_statuses(statuses.into_iter().collect::<StatusSet>());
            }
            if let Some(errors) = case.policy.errors {
                policy = policy.with_errors(errors);
            }

            let mut request = RequestDescription::new(case.method, "resource");
            if let Some(max) = case.request.max_attempts {
                request = request.with_max_recovery_attempts(max);
            }
            if let Some(statuses) = case.request.statuses {
                request = request.with_recoverable_statuses(statuses.into_iter().collect::<StatusSet>());
            }
            if let Some(errors) = case.request.errors {
                request = request.with_recoverable_errors(errors);
            }

            let call = call(request, case.attempts);
            assert_eq!(
                policy.can_recover(&call, &case.failure),
                case.expected,
                "{}",
                case.name
            );
        }
    }
}
