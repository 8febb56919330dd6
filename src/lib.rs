//! Request orchestration over a pluggable HTTP transport.
//!
//! [`Requester`] runs every request through pre-flight hooks, an optional
//! payload transform, a keyed response cache, a timed and cancellable
//! dispatch, response classification and the post-flight/error hooks.
#![cfg_attr(docsrs, feature(doc_cfg))]
// RequestError carries the full request descriptor.
#![allow(clippy::result_large_err)]

use std::time::Duration;

/// Default request timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for the built-in reqwest client (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default User-Agent header value.
pub(crate) const DEFAULT_CLIENT_HEADER: &str = concat!("requester-rust/", env!("CARGO_PKG_VERSION"));

/// A pre-flight hook vetoed the request.
pub const ERROR_CODE_REQUEST_BREAK: &str = "REQUEST_BREAK";
/// The request was cancelled.
pub const ERROR_CODE_REQUEST_ABORT: &str = "REQUEST_ABORT";
/// The transport failed without a status.
pub const ERROR_CODE_REQUEST: &str = "REQUEST";
/// The request exceeded its timeout.
pub const ERROR_CODE_TIME_OUT: &str = "TIME_OUT";

/// Message attached to `TIME_OUT` errors.
pub const TIMEOUT_MESSAGE: &str = "request timed out, please try again later";

pub(crate) const NO_STREAM_BODY_MESSAGE: &str = "no response body for streaming";

mod body;
mod cache;
mod callbacks;
mod classify;
mod client;
mod errors;
mod http;
mod inflight;
mod stream;
#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub mod testing;
mod transport;
mod types;

pub use body::{
    encode_body, Body, EncodedBody, Field, FilePart, MultipartBody, MultipartPart, PartContent,
    RequestData, MULTIPART_JSON_FIELD,
};
pub use cache::{cache_key, CacheEntry, ResponseCache};
pub use callbacks::{CallbackRegistry, Disposer};
pub use classify::{AcceptAll, EnvelopeClassifier, Rejection, ResponseClassifier, Verdict};
pub use client::{Config, Requester};
pub use errors::{Error, ErrorCode, RequestError, Result};
pub use http::{HeaderEntry, HeaderList, ResponseMeta};
pub use transport::{
    BoxFuture, ReqwestTransport, ResponseBody, Transport, TransportFailure, TransportRequest,
    TransportResponse,
};
pub use types::{
    AfterHook, BeforeHook, CacheDirective, ChunkCallback, DefaultErrorHandler, ErrorCallback,
    ErrorFlow, ErrorHook, Flow, MockResponder, Outcome, RequestDescriptor, RequestOptions,
    RequestTransform, ResponseShape, ResponseTransform, SuccessCallback, Timeout,
};
