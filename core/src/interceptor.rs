//! Pre-dispatch and post-response hooks.

use std::sync::Arc;

use crate::call::Call;
use crate::http::HttpResponse;

/// Inspects calls and responses without taking part in recovery.
///
/// Both hooks default to allowing the call through. Returning `false` from
/// either resolves the call as skipped.
pub trait Interceptor: Send + Sync {
    /// Decide whether `call` should be dispatched at all.
    fn intercept_call(&self, _call: &Call) -> bool {
        true
    }

    /// Decide whether `response` should be processed and propagated.
    fn intercept_response(&self, _call: &Call, _response: &HttpResponse) -> bool {
        true
    }
}

/// Interceptors evaluated in registration order.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Stops at the first veto.
    pub fn allow_call(&self, call: &Call) -> bool {
        self.interceptors.iter().all(|i| i.intercept_call(call))
    }

    /// Stops at the first suppression.
    pub fn allow_response(&self, call: &Call, response: &HttpResponse) -> bool {
        self.interceptors
            .iter()
            .all(|i| i.intercept_response(call, response))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::request::RequestDescription;

    struct Counting {
        allow: bool,
        seen: AtomicUsize,
    }

    impl Counting {
        fn new(allow: bool) -> Arc<Self> {
            Arc::new(Self {
                allow,
                seen: AtomicUsize::new(0),
            })
        }
    }

    impl Interceptor for Counting {
        fn intercept_call(&self, _call: &Call) -> bool {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.allow
        }

        fn intercept_response(&self, _call: &Call, _response: &HttpResponse) -> bool {
            self.seen.fetch_add(1, Ordering::SeqCst);
            self.allow
        }
    }

    struct Defaults;

    impl Interceptor for Defaults {}

    #[test]
    fn empty_chain_allows_everything() {
        let chain = InterceptorChain::new();
        let call = Call::new(RequestDescription::get("a"));
        assert!(chain.allow_call(&call));
        assert!(chain.allow_response(&call, &HttpResponse::new(500, "")));
    }

    #[test]
    fn default_methods_allow() {
        let mut chain = InterceptorChain::new();
        chain.push(Arc::new(Defaults));
        let call = Call::new(RequestDescription::get("a"));
        assert!(chain.allow_call(&call));
        assert!(chain.allow_response(&call, &HttpResponse::new(200, "")));
    }

    #[test]
    fn first_rejection_short_circuits() {
        let first = Counting::new(true);
        let veto = Counting::new(false);
        let never = Counting::new(true);

        let mut chain = InterceptorChain::new();
        chain.push(first.clone());
        chain.push(veto.clone());
        chain.push(never.clone());

        let call = Call::new(RequestDescription::get("a"));
        assert!(!chain.allow_call(&call));
        assert!(!chain.allow_response(&call, &HttpResponse::new(200, "")));

        assert_eq!(first.seen.load(Ordering::SeqCst), 2);
        assert_eq!(veto.seen.load(Ordering::SeqCst), 2);
        assert_eq!(never.seen.load(Ordering::SeqCst), 0);
    }
}
