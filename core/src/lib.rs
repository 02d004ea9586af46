//! Client-side HTTP call orchestration with coordinated recovery.
//!
//! # Overview
//! Callers describe requests declaratively (`RequestDescription`), wrap them
//! in `Call`s with typed response and error handlers, and execute batches of
//! calls through a `NetworkService`. The service never touches the network
//! (host-does-IO pattern): it encodes each description into a plain-data
//! `HttpRequest`, hands it to the caller's `Transport`, and classifies the
//! `HttpResponse` or `TransportError` that comes back.
//!
//! # Design
//! - Failures outside a call's valid statuses are offered to an ordered
//!   `RecovererChain`. The first recoverer that claims a failure recovers it,
//!   and the call is resubmitted with its attempt counter incremented.
//! - `RetryPolicy` is the pure, shareable recoverability decision.
//! - `DeferredRetryRecoverer` funnels concurrent failures of one class
//!   through a `RecoveryCoordinator`, so one recovery action (a token
//!   refresh, a backoff sleep) serves every waiting call.
//! - `Interceptor`s can veto calls and suppress responses; both resolve the
//!   call as skipped.
//! - Batches run sequentially or in parallel, fail-fast or best-effort
//!   (`ExecutionOption`).

pub mod call;
pub mod config;
pub mod coordinator;
pub mod deferred;
pub mod error;
pub mod execution;
pub mod file;
pub mod http;
pub mod interceptor;
pub mod policy;
pub mod recoverer;
pub mod request;
pub mod service;
pub mod transport;

pub use call::{Call, CallBuilder, CallOutcome, FromResponse, Json, Progress};
pub use config::ServiceConfiguration;
pub use coordinator::{Enqueued, RecoveryCompletion, RecoveryCoordinator, RecoveryObserver};
pub use deferred::{BackoffRecovery, DeferredRetryRecoverer, ImmediateRecovery, RecoveryAction};
pub use error::{ConfigError, DecodeError, EncodeError, ErrorCode, ErrorReason, ServiceError, TransportError};
pub use execution::ExecutionOption;
pub use file::{DownloadedFile, FileSource, MultipartFile, ResponseKind, DEFAULT_MIME_TYPE};
pub use http::{HttpMethod, HttpRequest, HttpResponse, StatusSet};
pub use interceptor::{Interceptor, InterceptorChain};
pub use policy::{Failure, RetryPolicy, DEFAULT_RECOVERABLE_STATUSES};
pub use recoverer::{Recoverer, RecovererChain, RetryRecoverer};
pub use request::{BoolEncoding, EncodingOptions, ParameterEncoding, Parameters, RequestDescription};
pub use service::{BatchReport, NetworkService, ServiceBuilder};
pub use transport::{ProgressSink, Transport};
