//! The call orchestrator: dispatch, classification, recovery and delivery.
//!
//! # Design
//! `NetworkService` is a cheap-to-clone handle around immutable state: the
//! configuration, the transport, and the interceptor and recoverer chains.
//! The only mutable state a call touches is its own `Call` handle and the
//! coordinators inside deferred recoverers.
//!
//! Each call runs the same loop: check cancellation, dispatch, check
//! cancellation, intercept, classify. A failure is offered to the recoverer
//! chain; a recovered call has its attempt counter bumped and is dispatched
//! again with the same encoded request (after the recoverer's
//! `prepare_retry`). Cancellation is advisory: an in-flight dispatch or
//! recovery runs to its end, but nothing is delivered afterwards.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::call::{Call, CallBuilder, CallOutcome};
use crate::config::ServiceConfiguration;
use crate::error::{ErrorCode, ErrorReason, ServiceError, TransportError};
use crate::execution::ExecutionOption;
use crate::http::HttpResponse;
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::policy::{Failure, RetryPolicy};
use crate::recoverer::{Recoverer, RecovererChain, RetryRecoverer};
use crate::request::RequestDescription;
use crate::transport::{ProgressSink, Transport};

/// Outcomes of every call in a batch, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<CallOutcome>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, CallOutcome::Completed { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ServiceError> {
        self.outcomes.iter().filter_map(CallOutcome::error)
    }
}

struct ServiceInner {
    configuration: ServiceConfiguration,
    transport: Arc<dyn Transport>,
    interceptors: InterceptorChain,
    recoverers: RecovererChain,
}

/// Executes calls over a caller-supplied transport.
#[derive(Clone)]
pub struct NetworkService {
    inner: Arc<ServiceInner>,
}

pub struct ServiceBuilder {
    configuration: ServiceConfiguration,
    transport: Arc<dyn Transport>,
    interceptors: InterceptorChain,
    recoverers: RecovererChain,
}

impl ServiceBuilder {
    /// Append an interceptor. Interceptors run in registration order.
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Append a recoverer. Earlier recoverers take priority.
    pub fn recoverer(mut self, recoverer: Arc<dyn Recoverer>) -> Self {
        self.recoverers.push(recoverer);
        self
    }

    /// Append a `RetryRecoverer` using the configuration's recovery limits.
    pub fn default_recoverer(self) -> Self {
        let policy = RetryPolicy::from_configuration(&self.configuration);
        self.recoverer(Arc::new(RetryRecoverer::new(policy)))
    }

    pub fn build(self) -> NetworkService {
        NetworkService {
            inner: Arc::new(ServiceInner {
                configuration: self.configuration,
                transport: self.transport,
                interceptors: self.interceptors,
                recoverers: self.recoverers,
            }),
        }
    }
}

impl NetworkService {
    pub fn builder(configuration: ServiceConfiguration, transport: Arc<dyn Transport>) -> ServiceBuilder {
        ServiceBuilder {
            configuration,
            transport,
            interceptors: InterceptorChain::new(),
            recoverers: RecovererChain::new(),
        }
    }

    /// A service without interceptors or recoverers.
    pub fn new(configuration: ServiceConfiguration, transport: Arc<dyn Transport>) -> Self {
        Self::builder(configuration, transport).build()
    }

    pub fn configuration(&self) -> &ServiceConfiguration {
        &self.inner.configuration
    }

    /// Start building a call for `request`.
    pub fn call(&self, request: RequestDescription) -> CallBuilder {
        CallBuilder::new(request)
    }

    /// Execute `calls` under `option` and wait for the batch to resolve.
    ///
    /// Returns the first failure when `option` does not ignore failures;
    /// the remaining calls are cancelled.
    pub async fn execute(
        &self,
        calls: Vec<Call>,
        option: ExecutionOption,
    ) -> Result<BatchReport, ServiceError> {
        tracing::debug!(calls = calls.len(), ?option, "executing batch");
        let report = if option.is_parallel() {
            self.execute_parallel(calls, option.ignores_failures()).await?
        } else {
            self.execute_sequential(calls, option.ignores_failures()).await?
        };
        tracing::debug!(
            calls = report.len(),
            completed = report.completed(),
            failed = report.failures().count(),
            "batch finished"
        );
        Ok(report)
    }

    /// Execute `calls` in the background and hand the result to
    /// `completion`.
    pub fn request<F>(&self, calls: Vec<Call>, option: ExecutionOption, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<BatchReport, ServiceError>) + Send + 'static,
    {
        let service = self.clone();
        tokio::spawn(async move {
            let result = service.execute(calls, option).await;
            completion(result);
        })
    }

    async fn execute_sequential(
        &self,
        calls: Vec<Call>,
        ignore_failures: bool,
    ) -> Result<BatchReport, ServiceError> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for (index, call) in calls.iter().enumerate() {
            let outcome = self.perform(call).await;
            if let (false, CallOutcome::Failed(error)) = (ignore_failures, &outcome) {
                tracing::debug!(index, "aborting sequential batch after failure");
                calls[index + 1..].iter().for_each(Call::cancel);
                return Err(error.clone());
            }
            outcomes.push(outcome);
        }
        Ok(BatchReport { outcomes })
    }

    async fn execute_parallel(
        &self,
        calls: Vec<Call>,
        ignore_failures: bool,
    ) -> Result<BatchReport, ServiceError> {
        let mut tasks = JoinSet::new();
        for (index, call) in calls.iter().cloned().enumerate() {
            let service = self.clone();
            tasks.spawn(async move { (index, service.perform(&call).await) });
        }

        let mut outcomes: Vec<Option<CallOutcome>> = vec![None; calls.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                // A panicking handler unwinds out of the batch, as it does
                // when the call runs sequentially.
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    tracing::error!(error = %e, "call task did not finish");
                    continue;
                }
            };
            if let (false, CallOutcome::Failed(error)) = (ignore_failures, &outcome) {
                tracing::debug!(index, "cancelling parallel batch after failure");
                for (other, call) in calls.iter().enumerate() {
                    if other != index {
                        call.cancel();
                    }
                }
                // Cancelled calls finish on their own without delivering.
                tasks.detach_all();
                return Err(error.clone());
            }
            outcomes[index] = Some(outcome);
        }

        Ok(BatchReport {
            outcomes: outcomes
                .into_iter()
                .map(|o| o.unwrap_or(CallOutcome::Cancelled))
                .collect(),
        })
    }

    /// Run one call through its full lifecycle, including recovery cycles.
    ///
    /// A call runs once. Performing it again resolves as skipped without
    /// dispatching.
    pub async fn perform(&self, call: &Call) -> CallOutcome {
        let request = call.request();
        let span = tracing::debug_span!(
            "call",
            id = %call.id(),
            method = %request.method,
            path = %request.path,
        );
        self.run(call).instrument(span).await
    }

    async fn run(&self, call: &Call) -> CallOutcome {
        let inner = &self.inner;
        if call.is_cancelled() {
            return CallOutcome::Cancelled;
        }
        if !call.begin() {
            tracing::warn!("call already performed");
            return CallOutcome::Skipped;
        }
        if !inner.interceptors.allow_call(call) {
            tracing::debug!("call vetoed by interceptor");
            return skip(call, None);
        }

        let mut request = match call.request().encode(&inner.configuration) {
            Ok(request) => request,
            Err(e) => {
                let error = ServiceError::new(Arc::clone(call.request()), ErrorReason::EncodingFailure)
                    .with_detail(e.to_string());
                return fail(call, error);
            }
        };
        let progress = ProgressSink::for_call(call);

        loop {
            if call.is_cancelled() {
                return CallOutcome::Cancelled;
            }
            tracing::debug!(url = %request.url, attempt = call.attempts(), "dispatching");
            let result = inner.transport.dispatch(&request, &progress).await;
            if call.is_cancelled() {
                return CallOutcome::Cancelled;
            }

            let (failure, response, error) = match result {
                Ok(response) => {
                    if !inner.interceptors.allow_response(call, &response) {
                        tracing::debug!(status = response.status, "response suppressed by interceptor");
                        return skip(call, Some(response));
                    }
                    if call.valid_statuses().contains(response.status) {
                        return succeed(call, response);
                    }
                    (Failure::status(response.status), Some(response), None)
                }
                Err(error) if error.code == ErrorCode::RequestEncoding => {
                    let error = ServiceError::new(Arc::clone(call.request()), ErrorReason::EncodingFailure)
                        .with_error(error);
                    return fail(call, error);
                }
                Err(error) => (Failure::transport(error.code), None, Some(error)),
            };

            let Some(recoverer) = inner.recoverers.claim(call, &failure).cloned() else {
                tracing::debug!(?failure, attempt = call.attempts(), "failure not recoverable");
                return fail(call, terminal(call, response, error, "no recoverer accepted the failure"));
            };

            tracing::debug!(?failure, attempt = call.attempts(), "recovering");
            if !recoverer.recover(call, &failure).await {
                tracing::warn!(?failure, attempt = call.attempts(), "recovery failed");
                return fail(call, terminal(call, response, error, "recovery failed"));
            }
            if call.is_cancelled() {
                return CallOutcome::Cancelled;
            }

            let attempt = call.record_recovery();
            recoverer.prepare_retry(call, &mut request);
            tracing::info!(?failure, attempt, "retrying recovered call");
        }
    }
}

/// Classify an unrecovered failure: a response means the server answered
/// with an invalid status, no response means it was never reached.
fn terminal(
    call: &Call,
    response: Option<HttpResponse>,
    error: Option<TransportError>,
    detail: &str,
) -> ServiceError {
    let reason = if response.is_some() {
        ErrorReason::HttpError
    } else {
        ErrorReason::Unreachable
    };
    let mut err = ServiceError::new(Arc::clone(call.request()), reason).with_detail(detail);
    err.response = response;
    err.error = error;
    err
}

fn succeed(call: &Call, response: HttpResponse) -> CallOutcome {
    let status = response.status;
    let attempts = call.attempts();
    match call.take_handlers() {
        Some(handlers) => match handlers.succeed(call.request(), &response) {
            Ok(()) => {
                tracing::debug!(status, attempts, "call completed");
                CallOutcome::Completed { status, attempts }
            }
            Err(error) => {
                tracing::debug!(status, error = %error, "response could not be decoded");
                CallOutcome::Failed(error)
            }
        },
        None if call.is_cancelled() => CallOutcome::Cancelled,
        None => CallOutcome::Completed { status, attempts },
    }
}

fn fail(call: &Call, error: ServiceError) -> CallOutcome {
    match call.take_handlers() {
        Some(handlers) => {
            tracing::debug!(reason = %error.reason, "call failed");
            handlers.fail(error.clone());
            CallOutcome::Failed(error)
        }
        None if call.is_cancelled() => CallOutcome::Cancelled,
        None => CallOutcome::Failed(error),
    }
}

fn skip(call: &Call, response: Option<HttpResponse>) -> CallOutcome {
    let mut error = ServiceError::new(Arc::clone(call.request()), ErrorReason::Skipped);
    error.response = response;
    match call.take_handlers() {
        Some(handlers) => {
            handlers.fail(error);
            CallOutcome::Skipped
        }
        None if call.is_cancelled() => CallOutcome::Cancelled,
        None => CallOutcome::Skipped,
    }
}
