use std::{fmt, sync::Arc, time::Duration};

use reqwest::Method;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    body::RequestData,
    errors::RequestError,
    http::{HeaderList, ResponseMeta},
    transport::{BoxFuture, TransportFailure},
};

/// How the response body is consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseShape {
    /// Read whole and parsed as JSON.
    #[default]
    Single,
    /// Read as text chunks, reported through `on_chunk`.
    Incremental,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    After(Duration),
    Disabled,
}

impl Timeout {
    pub fn secs(secs: u64) -> Self {
        Timeout::After(Duration::from_secs(secs))
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Timeout::After(duration) => Some(*duration),
            Timeout::Disabled => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Timeout::After(duration)
    }
}

/// Per-request cache directive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheDirective {
    /// Shorthand for an empty logical id with no expiry.
    Enabled,
    Keyed {
        logical_id: String,
        expires_in: Option<Duration>,
    },
}

impl CacheDirective {
    pub fn keyed(logical_id: impl Into<String>, expires_in: Option<Duration>) -> Self {
        CacheDirective::Keyed {
            logical_id: logical_id.into(),
            expires_in,
        }
    }

    /// Rewrite the shorthand into its keyed form.
    pub fn normalize(&mut self) {
        if matches!(self, CacheDirective::Enabled) {
            *self = CacheDirective::keyed("", None);
        }
    }

    pub fn logical_id(&self) -> &str {
        match self {
            CacheDirective::Enabled => "",
            CacheDirective::Keyed { logical_id, .. } => logical_id,
        }
    }

    pub fn expires_in(&self) -> Option<Duration> {
        match self {
            CacheDirective::Enabled => None,
            CacheDirective::Keyed { expires_in, .. } => *expires_in,
        }
    }
}

/// Result of a pre-flight hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Veto the request; it rejects with `REQUEST_BREAK`.
    Break,
}

/// Result of a per-request error handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorFlow {
    /// Let the process-wide default error handler run.
    #[default]
    Continue,
    /// Reject right away without running the default error handler.
    SkipDefault,
}

/// What a post-flight hook observes.
#[derive(Clone, Copy, Debug)]
pub enum Outcome<'a> {
    Data(&'a Value),
    Error(&'a RequestError),
}

impl Outcome<'_> {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

pub type SuccessCallback = dyn Fn(&Value, Option<&ResponseMeta>) + Send + Sync;
pub type ErrorCallback = dyn Fn(&RequestError, Option<&ResponseMeta>) -> ErrorFlow + Send + Sync;
pub type ChunkCallback = dyn Fn(&str, &str) + Send + Sync;

pub type BeforeHook =
    dyn for<'a> Fn(&'a mut RequestDescriptor) -> BoxFuture<'a, Flow> + Send + Sync;
pub type AfterHook = dyn for<'a> Fn(&'a RequestDescriptor, Outcome<'a>, Option<&'a ResponseMeta>) -> BoxFuture<'a, ()>
    + Send
    + Sync;
pub type ErrorHook =
    dyn for<'a> Fn(&'a RequestError, Option<&'a ResponseMeta>) -> BoxFuture<'a, ()> + Send + Sync;
pub type RequestTransform =
    dyn for<'a> Fn(&'a RequestDescriptor) -> BoxFuture<'a, Option<RequestData>> + Send + Sync;
pub type ResponseTransform = dyn for<'a> Fn(&'a Value, &'a RequestDescriptor) -> BoxFuture<'a, Option<Value>>
    + Send
    + Sync;
pub type MockResponder = dyn for<'a> Fn(&'a RequestDescriptor) -> BoxFuture<'a, Result<Value, TransportFailure>>
    + Send
    + Sync;
pub type DefaultErrorHandler = dyn Fn(&RequestError, Option<&ResponseMeta>) + Send + Sync;

/// Fully resolved configuration of one request attempt.
///
/// Pre-flight hooks receive it mutably and run serially, so each hook sees the
/// edits of the hooks registered before it.
#[derive(Clone)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: Method,
    pub data: RequestData,
    pub response_shape: ResponseShape,
    pub timeout: Timeout,
    pub mock: bool,
    pub cache: Option<CacheDirective>,
    pub force_refresh_cache: bool,
    pub headers: HeaderList,
    /// Caller-defined fields, visible to hooks.
    pub ext: Map<String, Value>,
    pub cancel_token: Option<CancellationToken>,
    pub on_success: Option<Arc<SuccessCallback>>,
    pub on_error: Option<Arc<ErrorCallback>>,
    pub on_chunk: Option<Arc<ChunkCallback>>,
}

impl RequestDescriptor {
    /// Descriptor with the library defaults (POST, single response, 10s timeout).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            data: RequestData::Empty,
            response_shape: ResponseShape::Single,
            timeout: Timeout::After(crate::DEFAULT_TIMEOUT),
            mock: false,
            cache: None,
            force_refresh_cache: false,
            headers: HeaderList::new(),
            ext: Map::new(),
            cancel_token: None,
            on_success: None,
            on_error: None,
            on_chunk: None,
        }
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("data", &self.data)
            .field("response_shape", &self.response_shape)
            .field("timeout", &self.timeout)
            .field("mock", &self.mock)
            .field("cache", &self.cache)
            .field("force_refresh_cache", &self.force_refresh_cache)
            .field("headers", &self.headers)
            .field("ext", &self.ext)
            .field("cancel_token", &self.cancel_token)
            .field("on_success", &self.on_success.as_ref().map(|_| "callback"))
            .field("on_error", &self.on_error.as_ref().map(|_| "callback"))
            .field("on_chunk", &self.on_chunk.as_ref().map(|_| "callback"))
            .finish()
    }
}

/// Caller-supplied options, merged over the requester defaults.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub data: RequestData,
    pub response_shape: ResponseShape,
    /// `None` uses the requester default.
    pub timeout: Option<Timeout>,
    pub mock: bool,
    pub cache: Option<CacheDirective>,
    pub force_refresh_cache: bool,
    pub headers: HeaderList,
    pub ext: Map<String, Value>,
    pub cancel_token: Option<CancellationToken>,
    pub on_success: Option<Arc<SuccessCallback>>,
    pub on_error: Option<Arc<ErrorCallback>>,
    pub on_chunk: Option<Arc<ChunkCallback>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn get(self) -> Self {
        self.with_method(Method::GET)
    }

    pub fn put(self) -> Self {
        self.with_method(Method::PUT)
    }

    pub fn delete(self) -> Self {
        self.with_method(Method::DELETE)
    }

    pub fn with_data(mut self, data: RequestData) -> Self {
        self.data = data;
        self
    }

    pub fn with_json(self, value: Value) -> Self {
        self.with_data(RequestData::Json(value))
    }

    pub fn incremental(mut self) -> Self {
        self.response_shape = ResponseShape::Incremental;
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn disable_timeout(mut self) -> Self {
        self.timeout = Some(Timeout::Disabled);
        self
    }

    /// Route through the requester's mock responder, if one is configured.
    pub fn with_mock(mut self) -> Self {
        self.mock = true;
        self
    }

    /// Cache under the empty logical id, without expiry.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(CacheDirective::Enabled);
        self
    }

    pub fn with_cache_key(mut self, logical_id: impl Into<String>, expires_in: Option<Duration>) -> Self {
        self.cache = Some(CacheDirective::keyed(logical_id, expires_in));
        self
    }

    pub fn force_refresh_cache(mut self) -> Self {
        self.force_refresh_cache = true;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    pub fn with_ext(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ext.insert(key.into(), value);
        self
    }

    /// Cancelling `token` aborts this request with `REQUEST_ABORT`.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, Option<&ResponseMeta>) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestError, Option<&ResponseMeta>) -> ErrorFlow + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called with `(chunk, accumulated)` for every incremental chunk.
    pub fn on_chunk<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.on_chunk = Some(Arc::new(f));
        self
    }

    pub(crate) fn resolve(self, url: String, default_timeout: Timeout) -> RequestDescriptor {
        RequestDescriptor {
            url,
            method: self.method.unwrap_or(Method::POST),
            data: self.data,
            response_shape: self.response_shape,
            timeout: self.timeout.unwrap_or(default_timeout),
            mock: self.mock,
            cache: self.cache,
            force_refresh_cache: self.force_refresh_cache,
            headers: self.headers,
            ext: self.ext,
            cancel_token: self.cancel_token,
            on_success: self.on_success,
            on_error: self.on_error,
            on_chunk: self.on_chunk,
        }
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("data", &self.data)
            .field("response_shape", &self.response_shape)
            .field("timeout", &self.timeout)
            .field("mock", &self.mock)
            .field("cache", &self.cache)
            .field("force_refresh_cache", &self.force_refresh_cache)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolve_applies_defaults() {
        let desc = RequestOptions::new().resolve("https://api.test/a".into(), Timeout::secs(10));
        assert_eq!(desc.method, Method::POST);
        assert_eq!(desc.response_shape, ResponseShape::Single);
        assert_eq!(desc.timeout, Timeout::After(Duration::from_secs(10)));
        assert!(desc.cache.is_none());
    }

    #[test]
    fn per_request_timeout_wins_over_default() {
        let disabled = RequestOptions::new()
            .disable_timeout()
            .resolve("u".into(), Timeout::secs(10));
        assert_eq!(disabled.timeout, Timeout::Disabled);

        let custom = RequestOptions::new()
            .with_timeout(Duration::from_millis(250))
            .resolve("u".into(), Timeout::Disabled);
        assert_eq!(custom.timeout.duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn options_carry_through_to_descriptor() {
        let desc = RequestOptions::new()
            .get()
            .with_json(json!({"q": 1}))
            .incremental()
            .with_header("X-Trace", "t1")
            .with_ext("auth", json!(true))
            .with_cache_key("page-1", Some(Duration::from_secs(5)))
            .force_refresh_cache()
            .resolve("u".into(), Timeout::Disabled);
        assert_eq!(desc.method, Method::GET);
        assert_eq!(desc.data, RequestData::Json(json!({"q": 1})));
        assert_eq!(desc.response_shape, ResponseShape::Incremental);
        assert_eq!(desc.headers.get("x-trace"), Some("t1"));
        assert_eq!(desc.ext.get("auth"), Some(&json!(true)));
        assert!(desc.force_refresh_cache);
        assert_eq!(desc.cache.as_ref().map(|c| c.logical_id()), Some("page-1"));
    }

    #[test]
    fn descriptor_debug_shows_cancel_token_and_hides_callbacks() {
        let desc = RequestOptions::new()
            .with_cancel_token(CancellationToken::new())
            .on_chunk(|_, _| {})
            .resolve("u".into(), Timeout::Disabled);
        let rendered = format!("{desc:?}");
        assert!(rendered.contains("cancel_token: Some("));
        assert!(rendered.contains("on_chunk: Some(\"callback\")"));
    }

    #[test]
    fn cache_shorthand_normalizes_to_empty_id() {
        let mut directive = CacheDirective::Enabled;
        directive.normalize();
        assert_eq!(directive, CacheDirective::keyed("", None));
        assert_eq!(directive.expires_in(), None);
    }
}
