//! Coordinated recovery: concurrent failures of one class share one action.
//!
//! # Design
//! `DeferredRetryRecoverer` pairs a `RetryPolicy` (should this failure be
//! recovered at all?) with a `RecoveryAction` (what recovery means, and which
//! failures are equivalent). The action supplies the recovery class key, so
//! deduplication can be by status code, by host, by credential or anything
//! else the action cares about. The first failure of a class runs
//! `RecoveryAction::attempt`; every failure of the same class arriving while
//! it runs waits for and shares its outcome.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;

use crate::call::Call;
use crate::coordinator::{RecoveryCoordinator, RecoveryObserver};
use crate::http::HttpRequest;
use crate::policy::{Failure, RetryPolicy};
use crate::recoverer::Recoverer;

/// The recovery work performed once per failure class.
#[async_trait]
pub trait RecoveryAction: Send + Sync + 'static {
    /// Equivalence key grouping failures that share one recovery.
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;

    /// Key for `failure`, or `None` when this action cannot recover it.
    fn key(&self, call: &Call, failure: &Failure) -> Option<Self::Key>;

    /// Perform recovery. Runs once per cycle, on behalf of every waiter.
    async fn attempt(&self, call: &Call, failure: &Failure) -> bool;

    /// Adjust a request before it is resubmitted after a successful cycle.
    fn prepare_retry(&self, _call: &Call, _request: &mut HttpRequest) {}
}

/// Groups failures by status code and reports success without doing any
/// work, so the recoverer behaves like a plain retry that waits for any
/// in-flight cycle of the same status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateRecovery;

#[async_trait]
impl RecoveryAction for ImmediateRecovery {
    type Key = u16;

    fn key(&self, _call: &Call, failure: &Failure) -> Option<u16> {
        failure.status
    }

    async fn attempt(&self, _call: &Call, _failure: &Failure) -> bool {
        true
    }
}

/// Sleeps with exponential backoff before each retry.
///
/// The delay for a cycle led by a call that has already been recovered `n`
/// times is `initial_delay * multiplier^n`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct BackoffRecovery {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for BackoffRecovery {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffRecovery {
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempts as i32);
        let delay = Duration::from_millis(millis.min(u64::MAX as f64) as u64);
        delay.min(self.max_delay)
    }
}

#[async_trait]
impl RecoveryAction for BackoffRecovery {
    type Key = Failure;

    fn key(&self, _call: &Call, failure: &Failure) -> Option<Failure> {
        Some(*failure)
    }

    async fn attempt(&self, call: &Call, _failure: &Failure) -> bool {
        let delay = self.delay_for(call.attempts());
        tracing::debug!(call = %call.id(), delay_ms = delay.as_millis() as u64, "backing off before retry");
        tokio::time::sleep(delay).await;
        true
    }
}

/// A recoverer that deduplicates concurrent recoveries through a
/// `RecoveryCoordinator`.
pub struct DeferredRetryRecoverer<A: RecoveryAction = ImmediateRecovery> {
    policy: RetryPolicy,
    action: A,
    coordinator: RecoveryCoordinator<A::Key>,
}

impl<A: RecoveryAction> DeferredRetryRecoverer<A> {
    pub fn new(policy: RetryPolicy, action: A) -> Self {
        Self {
            policy,
            action,
            coordinator: RecoveryCoordinator::new(),
        }
    }

    /// Register an observer of this recoverer's recovery cycles. The
    /// observer is not kept alive by the recoverer.
    pub fn with_observer(mut self, observer: Weak<dyn RecoveryObserver<A::Key>>) -> Self {
        self.coordinator = self.coordinator.with_observer(observer);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn coordinator(&self) -> &RecoveryCoordinator<A::Key> {
        &self.coordinator
    }
}

impl Default for DeferredRetryRecoverer<ImmediateRecovery> {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), ImmediateRecovery)
    }
}

#[async_trait]
impl<A: RecoveryAction> Recoverer for DeferredRetryRecoverer<A> {
    fn can_recover(&self, call: &Call, failure: &Failure) -> bool {
        self.policy.can_recover(call, failure)
    }

    async fn recover(&self, call: &Call, failure: &Failure) -> bool {
        let Some(key) = self.action.key(call, failure) else {
            return false;
        };
        self.coordinator
            .coordinate(key, || self.action.attempt(call, failure))
            .await
    }

    fn prepare_retry(&self, call: &Call, request: &mut HttpRequest) {
        self.action.prepare_retry(call, request);
    }
}
