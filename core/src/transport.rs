//! The boundary to the caller-supplied HTTP transport.

use async_trait::async_trait;

use crate::call::{Call, Progress, ProgressHandler};
use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Performs one HTTP round-trip.
///
/// Implementations own the wire protocol: parameter encoding, body bytes,
/// timeouts and connection management. A response with any status is `Ok`;
/// only failures before a response was received are `Err`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dispatch(
        &self,
        request: &HttpRequest,
        progress: &ProgressSink,
    ) -> Result<HttpResponse, TransportError>;
}

/// Forwards transport progress to the call's progress handler until the
/// call is cancelled.
pub struct ProgressSink {
    call: Option<Call>,
    handler: Option<ProgressHandler>,
}

impl ProgressSink {
    /// A sink that discards every report.
    pub fn none() -> Self {
        Self {
            call: None,
            handler: None,
        }
    }

    pub(crate) fn for_call(call: &Call) -> Self {
        Self {
            call: Some(call.clone()),
            handler: call.progress_handler().cloned(),
        }
    }

    pub fn report(&self, completed: u64, total: Option<u64>) {
        let Some(handler) = &self.handler else {
            return;
        };
        if self.call.as_ref().is_some_and(Call::is_cancelled) {
            return;
        }
        handler(Progress { completed, total });
    }
}
