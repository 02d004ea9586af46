//! Calls: one execution of a request description, plus its handlers.
//!
//! # Design
//! A `Call` is a cheap-to-clone handle. The orchestrator owns its lifecycle;
//! callers only keep a clone to cancel it or to read the attempt counter.
//! Handlers are stored behind a mutex and taken exactly once, either by the
//! terminal delivery or by `cancel`, so a cancelled call can never invoke
//! them.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{DecodeError, ErrorReason, ServiceError};
use crate::http::{HttpResponse, StatusSet};
use crate::request::RequestDescription;

/// Transfer progress reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some(self.completed as f64 / total as f64),
        }
    }
}

pub type ProgressHandler = Arc<dyn Fn(Progress) + Send + Sync>;

/// A type a response body can be decoded into.
pub trait FromResponse: Sized + Send + 'static {
    fn from_response(response: &HttpResponse) -> Result<Self, DecodeError>;
}

/// Ignores the body.
impl FromResponse for () {
    fn from_response(_: &HttpResponse) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl FromResponse for Bytes {
    fn from_response(response: &HttpResponse) -> Result<Self, DecodeError> {
        Ok(response.body.clone())
    }
}

impl FromResponse for String {
    fn from_response(response: &HttpResponse) -> Result<Self, DecodeError> {
        String::from_utf8(response.body.to_vec()).map_err(|e| DecodeError {
            expected: "utf-8 string",
            message: e.to_string(),
        })
    }
}

impl FromResponse for HttpResponse {
    fn from_response(response: &HttpResponse) -> Result<Self, DecodeError> {
        Ok(response.clone())
    }
}

/// A JSON body deserialized into `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T: DeserializeOwned + Send + 'static> FromResponse for Json<T> {
    fn from_response(response: &HttpResponse) -> Result<Self, DecodeError> {
        serde_json::from_slice(&response.body)
            .map(Json)
            .map_err(|e| DecodeError {
                expected: "json",
                message: e.to_string(),
            })
    }
}

type ResponseFn = Box<dyn FnOnce(&HttpResponse) -> Result<(), DecodeError> + Send>;
type ErrorFn = Box<dyn FnOnce(ServiceError) + Send>;

struct ResponseHandler {
    statuses: StatusSet,
    handle: ResponseFn,
}

/// Handlers registered on a call, consumed by the terminal delivery.
pub(crate) struct Handlers {
    responses: Vec<ResponseHandler>,
    error: Option<ErrorFn>,
}

impl Handlers {
    /// Run the first handler registered for the response's status.
    ///
    /// A decode failure is reported to the error handler and returned.
    pub(crate) fn succeed(
        mut self,
        request: &Arc<RequestDescription>,
        response: &HttpResponse,
    ) -> Result<(), ServiceError> {
        let Some(position) = self
            .responses
            .iter()
            .position(|h| h.statuses.contains(response.status))
        else {
            return Ok(());
        };
        let handler = self.responses.swap_remove(position);
        match (handler.handle)(response) {
            Ok(()) => Ok(()),
            Err(decode) => {
                let error = ServiceError::new(Arc::clone(request), ErrorReason::DeserializationFailure)
                    .with_response(response.clone())
                    .with_detail(decode.to_string());
                self.fail(error.clone());
                Err(error)
            }
        }
    }

    pub(crate) fn fail(self, error: ServiceError) {
        if let Some(handler) = self.error {
            handler(error);
        }
    }
}

struct CallInner {
    id: Uuid,
    request: Arc<RequestDescription>,
    valid_statuses: StatusSet,
    attempts: AtomicU32,
    started: AtomicBool,
    cancelled: AtomicBool,
    handlers: Mutex<Option<Handlers>>,
    progress: Option<ProgressHandler>,
}

/// One execution of a `RequestDescription`.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl Call {
    /// A call without handlers.
    pub fn new(request: RequestDescription) -> Self {
        CallBuilder::new(request).make()
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn request(&self) -> &Arc<RequestDescription> {
        &self.inner.request
    }

    /// Recovery cycles this call has gone through.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// The request's declared statuses plus every status a handler claims.
    pub fn valid_statuses(&self) -> &StatusSet {
        &self.inner.valid_statuses
    }

    /// Cancel the call. Irreversible; drops the handlers so no completion
    /// is delivered even if dispatch or recovery is already in flight.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!(call = %self.inner.id, "call cancelled");
        }
        let handlers = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(handlers);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Whether the call has been handed to a service.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Mark the call as started. `false` if it already was.
    pub(crate) fn begin(&self) -> bool {
        !self.inner.started.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn progress_handler(&self) -> Option<&ProgressHandler> {
        self.inner.progress.as_ref()
    }

    /// Returns the new attempt count.
    pub(crate) fn record_recovery(&self) -> u32 {
        self.inner.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Take the handlers for terminal delivery. `None` when the call was
    /// cancelled or has already delivered.
    pub(crate) fn take_handlers(&self) -> Option<Handlers> {
        let mut guard = self
            .inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return None;
        }
        guard.take()
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.inner.id)
            .field("method", &self.inner.request.method)
            .field("path", &self.inner.request.path)
            .field("attempts", &self.attempts())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Builds a `Call` with its response, error and progress handlers.
pub struct CallBuilder {
    request: RequestDescription,
    responses: Vec<ResponseHandler>,
    error: Option<ErrorFn>,
    progress: Option<ProgressHandler>,
}

impl CallBuilder {
    pub fn new(request: RequestDescription) -> Self {
        Self {
            request,
            responses: Vec::new(),
            error: None,
            progress: None,
        }
    }

    /// Register `handler` for responses whose status is in `statuses`.
    ///
    /// Statuses listed here become valid for the call even when the request
    /// does not declare them. The first matching registration wins.
    pub fn response<T, F>(mut self, statuses: impl Into<StatusSet>, handler: F) -> Self
    where
        T: FromResponse,
        F: FnOnce(T) + Send + 'static,
    {
        self.responses.push(ResponseHandler {
            statuses: statuses.into(),
            handle: Box::new(move |response| {
                let value = T::from_response(response)?;
                handler(value);
                Ok(())
            }),
        });
        self
    }

    /// Register `handler` for every status the request accepts.
    pub fn response_any<T, F>(self, handler: F) -> Self
    where
        T: FromResponse,
        F: FnOnce(T) + Send + 'static,
    {
        let statuses = self.request.status_codes.clone();
        self.response(statuses, handler)
    }

    /// Register the handler receiving the call's terminal error.
    pub fn error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(ServiceError) + Send + 'static,
    {
        self.error = Some(Box::new(handler));
        self
    }

    pub fn progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(handler));
        self
    }

    pub fn make(self) -> Call {
        let valid_statuses = self
            .responses
            .iter()
            .fold(self.request.status_codes.clone(), |acc, h| acc.union(&h.statuses));
        Call {
            inner: Arc::new(CallInner {
                id: Uuid::new_v4(),
                request: Arc::new(self.request),
                valid_statuses,
                attempts: AtomicU32::new(0),
                started: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                handlers: Mutex::new(Some(Handlers {
                    responses: self.responses,
                    error: self.error,
                })),
                progress: self.progress,
            }),
        }
    }
}

/// How a single call resolved within a batch.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Completed { status: u16, attempts: u32 },
    Failed(ServiceError),
    Skipped,
    Cancelled,
}

impl CallOutcome {
    /// Skips and cancellations are not failures.
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match self {
            CallOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}
