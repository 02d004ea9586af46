//! Recoverers and the ordered chain that picks one per failure.

use std::sync::Arc;

use async_trait::async_trait;

use crate::call::Call;
use crate::http::HttpRequest;
use crate::policy::{Failure, RetryPolicy};

/// Decides whether a failed call is recoverable and performs the recovery.
#[async_trait]
pub trait Recoverer: Send + Sync {
    /// Whether this recoverer claims `failure` of `call`.
    fn can_recover(&self, call: &Call, failure: &Failure) -> bool;

    /// Perform the recovery. `true` means the call should be resubmitted.
    async fn recover(&self, call: &Call, failure: &Failure) -> bool;

    /// Adjust the request before it is resubmitted.
    fn prepare_retry(&self, _call: &Call, _request: &mut HttpRequest) {}
}

/// Retries every failure its policy accepts, with no recovery work.
#[derive(Debug, Clone, Default)]
pub struct RetryRecoverer {
    policy: RetryPolicy,
}

impl RetryRecoverer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Recoverer for RetryRecoverer {
    fn can_recover(&self, call: &Call, failure: &Failure) -> bool {
        self.policy.can_recover(call, failure)
    }

    async fn recover(&self, _call: &Call, _failure: &Failure) -> bool {
        true
    }
}

/// Recoverers in priority order. The first that claims a failure owns it.
#[derive(Clone, Default)]
pub struct RecovererChain {
    recoverers: Vec<Arc<dyn Recoverer>>,
}

impl RecovererChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, recoverer: Arc<dyn Recoverer>) {
        self.recoverers.push(recoverer);
    }

    pub fn len(&self) -> usize {
        self.recoverers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recoverers.is_empty()
    }

    /// The first recoverer, in registration order, whose `can_recover`
    /// accepts the failure.
    pub fn claim(&self, call: &Call, failure: &Failure) -> Option<&Arc<dyn Recoverer>> {
        self.recoverers
            .iter()
            .find(|recoverer| recoverer.can_recover(call, failure))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::request::RequestDescription;

    struct Fixed {
        accept: bool,
        asked: AtomicUsize,
    }

    impl Fixed {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept,
                asked: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Recoverer for Fixed {
        fn can_recover(&self, _call: &Call, _failure: &Failure) -> bool {
            self.asked.fetch_add(1, Ordering::SeqCst);
            self.accept
        }

        async fn recover(&self, _call: &Call, _failure: &Failure) -> bool {
            true
        }
    }

    #[test]
    fn claim_respects_registration_order() {
        let refuses = Fixed::new(false);
        let first = Fixed::new(true);
        let second = Fixed::new(true);

        let mut chain = RecovererChain::new();
        chain.push(refuses.clone());
        chain.push(first.clone());
        chain.push(second.clone());

        let call = Call::new(RequestDescription::get("a"));
        let claimed = chain.claim(&call, &Failure::status(503)).unwrap();
        let first_dyn: Arc<dyn Recoverer> = first.clone();
        assert!(Arc::ptr_eq(claimed, &first_dyn));

        assert_eq!(refuses.asked.load(Ordering::SeqCst), 1);
        assert_eq!(first.asked.load(Ordering::SeqCst), 1);
        assert_eq!(second.asked.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_or_refusing_chain_claims_nothing() {
        let call = Call::new(RequestDescription::get("a"));
        assert!(RecovererChain::new().claim(&call, &Failure::status(503)).is_none());

        let mut chain = RecovererChain::new();
        chain.push(Fixed::new(false));
        assert!(chain.claim(&call, &Failure::status(503)).is_none());
    }

    #[tokio::test]
    async fn retry_recoverer_recovers_immediately() {
        let recoverer = RetryRecoverer::default();
        let call = Call::new(RequestDescription::get("a"));
        assert!(recoverer.can_recover(&call, &Failure::status(502)));
        assert!(recoverer.recover(&call, &Failure::status(502)).await);
    }
}
