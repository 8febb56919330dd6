use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

#[cfg(feature = "tracing")]
use std::time::Instant;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    body::{encode_body, RequestData},
    cache::{cache_key, CacheEntry, ResponseCache},
    callbacks::{CallbackRegistry, Disposer},
    classify::{AcceptAll, ResponseClassifier, Verdict},
    errors::{Error, ErrorCode, RequestError, Result},
    http::{HeaderList, ResponseMeta},
    inflight::{InFlightEntry, InFlightRegistry},
    stream::read_incremental,
    transport::{
        BoxFuture, ReqwestTransport, Transport, TransportFailure, TransportRequest,
        TransportResponse,
    },
    types::{
        AfterHook, BeforeHook, DefaultErrorHandler, ErrorFlow, ErrorHook, Flow, MockResponder,
        Outcome, RequestDescriptor, RequestOptions, RequestTransform, ResponseShape,
        ResponseTransform, Timeout,
    },
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_TIMEOUT, NO_STREAM_BODY_MESSAGE, TIMEOUT_MESSAGE,
};

#[derive(Clone, Default)]
pub struct Config {
    /// Prefix for addresses that carry no scheme (`http://`, `https://`, `localhost`).
    pub base_url: Option<String>,
    /// Default timeout (10s when unset). Per-request settings take precedence.
    pub timeout: Option<Timeout>,
    /// Error code to message dictionary, applied to errors without a message.
    pub error_code_messages: Option<HashMap<String, String>>,
    /// Runs after the error hooks unless a per-request handler skips it.
    pub default_error_handler: Option<Arc<DefaultErrorHandler>>,
    pub transform_request: Option<Arc<RequestTransform>>,
    pub transform_response: Option<Arc<ResponseTransform>>,
    /// Success/failure classifier (defaults to [`AcceptAll`]).
    pub classifier: Option<Arc<dyn ResponseClassifier>>,
    /// Responder used instead of the transport for requests flagged `mock`.
    pub mock: Option<Arc<MockResponder>>,
    /// Transport override (defaults to [`ReqwestTransport`]).
    pub transport: Option<Arc<dyn Transport>>,
    pub http_client: Option<reqwest::Client>,
    /// Connect timeout for the default reqwest client (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Headers applied beneath every request's own headers.
    pub default_headers: Option<HeaderList>,
    /// Share a cache between requesters. Each requester owns a fresh one otherwise.
    pub cache: Option<ResponseCache>,
}

impl Config {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_error_message(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_code_messages
            .get_or_insert_with(HashMap::new)
            .insert(code.into(), message.into());
        self
    }

    pub fn with_default_error_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestError, Option<&ResponseMeta>) + Send + Sync + 'static,
    {
        self.default_error_handler = Some(Arc::new(f));
        self
    }

    pub fn with_request_transform<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a RequestDescriptor) -> BoxFuture<'a, Option<RequestData>>
            + Send
            + Sync
            + 'static,
    {
        self.transform_request = Some(Arc::new(f));
        self
    }

    pub fn with_response_transform<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a Value, &'a RequestDescriptor) -> BoxFuture<'a, Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.transform_response = Some(Arc::new(f));
        self
    }

    pub fn with_classifier(mut self, classifier: impl ResponseClassifier + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn with_mock<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a RequestDescriptor) -> BoxFuture<'a, std::result::Result<Value, TransportFailure>>
            + Send
            + Sync
            + 'static,
    {
        self.mock = Some(Arc::new(f));
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_default_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers
            .get_or_insert_with(HeaderList::new)
            .set(key, value);
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("error_code_messages", &self.error_code_messages)
            .field(
                "default_error_handler",
                &self.default_error_handler.as_ref().map(|_| "callback"),
            )
            .field(
                "transform_request",
                &self.transform_request.as_ref().map(|_| "callback"),
            )
            .field(
                "transform_response",
                &self.transform_response.as_ref().map(|_| "callback"),
            )
            .field("classifier", &self.classifier.as_ref().map(|_| "classifier"))
            .field("mock", &self.mock.as_ref().map(|_| "callback"))
            .field("transport", &self.transport.as_ref().map(|_| "transport"))
            .field("connect_timeout", &self.connect_timeout)
            .field("default_headers", &self.default_headers)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Request lifecycle controller.
///
/// Drives each request through pre-flight hooks, the payload transform, the
/// response cache, dispatch, classification and the post-flight/error hooks.
/// Clones share hooks, cache and the in-flight set.
#[derive(Clone)]
pub struct Requester {
    inner: Arc<RequesterInner>,
}

struct RequesterInner {
    base_url: String,
    default_timeout: Timeout,
    error_code_messages: HashMap<String, String>,
    default_error_handler: Option<Arc<DefaultErrorHandler>>,
    transform_request: Option<Arc<RequestTransform>>,
    transform_response: Option<Arc<ResponseTransform>>,
    classifier: Arc<dyn ResponseClassifier>,
    mock: Option<Arc<MockResponder>>,
    transport: Arc<dyn Transport>,
    default_headers: HeaderList,
    cache: ResponseCache,
    before: CallbackRegistry<BeforeHook>,
    after: CallbackRegistry<AfterHook>,
    errors: CallbackRegistry<ErrorHook>,
    in_flight: Arc<InFlightRegistry>,
}

/// Result of dispatch + classification. Failures carry the response meta when
/// a response was received.
type Attempt = std::result::Result<(Value, ResponseMeta), (RequestError, Option<ResponseMeta>)>;

enum Settled {
    Done(Attempt),
    Aborted,
    TimedOut,
}

impl Requester {
    pub fn new(cfg: Config) -> Result<Self> {
        let transport = match cfg.transport {
            Some(transport) => transport,
            None => {
                let http = match cfg.http_client {
                    Some(client) => client,
                    None => reqwest::Client::builder()
                        .connect_timeout(cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
                        .build()
                        .map_err(|err| Error::Config(format!("failed to build http client: {err}")))?,
                };
                Arc::new(ReqwestTransport::new(http)) as Arc<dyn Transport>
            }
        };

        if matches!(cfg.timeout, Some(Timeout::After(d)) if d.is_zero()) {
            return Err(Error::Config(
                "default timeout must be non-zero (use Timeout::Disabled)".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(RequesterInner {
                base_url: cfg.base_url.unwrap_or_default(),
                default_timeout: cfg.timeout.unwrap_or(Timeout::After(DEFAULT_TIMEOUT)),
                error_code_messages: cfg.error_code_messages.unwrap_or_default(),
                default_error_handler: cfg.default_error_handler,
                transform_request: cfg.transform_request,
                transform_response: cfg.transform_response,
                classifier: cfg.classifier.unwrap_or_else(|| Arc::new(AcceptAll)),
                mock: cfg.mock,
                transport,
                default_headers: cfg.default_headers.unwrap_or_default(),
                cache: cfg.cache.unwrap_or_default(),
                before: CallbackRegistry::new(),
                after: CallbackRegistry::new(),
                errors: CallbackRegistry::new(),
                in_flight: Arc::new(InFlightRegistry::default()),
            }),
        })
    }

    /// Register a pre-flight hook. Hooks run serially in registration order;
    /// returning [`Flow::Break`] vetoes the request.
    pub fn before_request<F>(&self, hook: F) -> Disposer
    where
        F: for<'a> Fn(&'a mut RequestDescriptor) -> BoxFuture<'a, Flow> + Send + Sync + 'static,
    {
        let hook: Arc<BeforeHook> = Arc::new(hook);
        self.inner.before.add_shared(hook)
    }

    /// Register a post-flight hook, run after every success (cache hits
    /// included) and every failure except a veto.
    pub fn after_request<F>(&self, hook: F) -> Disposer
    where
        F: for<'a> Fn(&'a RequestDescriptor, Outcome<'a>, Option<&'a ResponseMeta>) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        let hook: Arc<AfterHook> = Arc::new(hook);
        self.inner.after.add_shared(hook)
    }

    /// Register an error hook, run after the post-flight hooks on failure.
    pub fn on_error<F>(&self, hook: F) -> Disposer
    where
        F: for<'a> Fn(&'a RequestError, Option<&'a ResponseMeta>) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        let hook: Arc<ErrorHook> = Arc::new(hook);
        self.inner.errors.add_shared(hook)
    }

    pub fn before_hooks(&self) -> &CallbackRegistry<BeforeHook> {
        &self.inner.before
    }

    pub fn after_hooks(&self) -> &CallbackRegistry<AfterHook> {
        &self.inner.after
    }

    pub fn error_hooks(&self) -> &CallbackRegistry<ErrorHook> {
        &self.inner.errors
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Number of requests currently being dispatched.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn in_flight_requests(&self) -> Vec<(Method, String)> {
        self.inner
            .in_flight
            .snapshot()
            .into_iter()
            .map(|entry| (entry.method, entry.url))
            .collect()
    }

    /// Cancel every in-flight request; each rejects with `REQUEST_ABORT`.
    pub fn cancel_all(&self) {
        self.inner.in_flight.cancel_all();
    }

    /// Execute a request and decode the resolved value into `O`.
    pub async fn execute_as<O: DeserializeOwned>(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<O> {
        let value = self.execute(url, options).await?;
        serde_json::from_value(value).map_err(Error::Serialization)
    }

    pub async fn execute(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> std::result::Result<Value, RequestError> {
        let inner = &self.inner;
        let mut request = options.resolve(inner.resolve_url(url), inner.default_timeout);

        for hook in inner.before.snapshot() {
            if hook(&mut request).await == Flow::Break {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %request.url, "request vetoed by pre-flight hook");
                return Err(RequestError::new(ErrorCode::Break, request));
            }
        }

        if let Some(transform) = &inner.transform_request {
            let replaced = transform(&request).await;
            if let Some(data) = replaced {
                request.data = data;
            }
        }

        let cache_key = request.cache.as_mut().map(|directive| {
            directive.normalize();
            cache_key(&request.url, directive.logical_id())
        });
        if let Some(key) = &cache_key {
            if request.force_refresh_cache {
                inner.cache.delete(key);
            } else if let Some(data) = inner.cache.get(key) {
                #[cfg(feature = "tracing")]
                tracing::debug!(key = %key, "serving response from cache");
                if let Some(on_success) = &request.on_success {
                    on_success(&data, None);
                }
                inner.run_after(&request, Outcome::Data(&data), None).await;
                return Ok(data);
            }
        }

        let token = match &request.cancel_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let guard = inner.in_flight.register(InFlightEntry {
            method: request.method.clone(),
            url: request.url.clone(),
            cancel: token.clone(),
        });

        let dispatch = inner.dispatch(&request, &token);
        #[cfg(feature = "tracing")]
        let dispatch = {
            use tracing::Instrument;
            dispatch.instrument(tracing::debug_span!(
                "requester.http",
                method = %request.method,
                url = %request.url
            ))
        };

        let settled = tokio::select! {
            biased;
            _ = token.cancelled() => Settled::Aborted,
            _ = expire(request.timeout.duration()) => Settled::TimedOut,
            attempt = dispatch => Settled::Done(attempt),
        };
        drop(guard);

        match settled {
            Settled::Done(Ok((data, meta))) => Ok(inner.succeed(&request, cache_key, data, meta).await),
            Settled::Done(Err((err, meta))) => Err(inner.fail(err, meta.as_ref()).await),
            Settled::Aborted => {
                let err = RequestError::new(ErrorCode::Abort, request);
                Err(inner.fail(err, None).await)
            }
            Settled::TimedOut => {
                token.cancel();
                #[cfg(feature = "tracing")]
                tracing::warn!(url = %request.url, "request timed out");
                let err = RequestError::new(ErrorCode::Timeout, request).with_message(TIMEOUT_MESSAGE);
                Err(inner.fail(err, None).await)
            }
        }
    }
}

impl fmt::Debug for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requester")
            .field("base_url", &self.inner.base_url)
            .field("default_timeout", &self.inner.default_timeout)
            .field("in_flight", &self.inner.in_flight.len())
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

impl RequesterInner {
    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("localhost") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }

    async fn dispatch(&self, request: &RequestDescriptor, cancel: &CancellationToken) -> Attempt {
        let (raw, meta) = match (&self.mock, request.mock) {
            (Some(mock), true) => match mock(request).await {
                Ok(value) => (value, ResponseMeta::synthetic(&request.url)),
                Err(failure) => return Err(self.transport_failure(request, failure, None)),
            },
            _ => self.transmit(request, cancel).await?,
        };
        self.classify(request, raw, meta).await
    }

    async fn transmit(
        &self,
        request: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> std::result::Result<(Value, ResponseMeta), (RequestError, Option<ResponseMeta>)> {
        #[cfg(feature = "tracing")]
        let started = Instant::now();

        let encoded = encode_body(&request.data);
        let mut headers = self.default_headers.clone();
        headers.merge(&encoded.headers);
        headers.merge(&request.headers);
        let outgoing = TransportRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            body: encoded.body,
            headers,
        };

        let TransportResponse { meta, body } = self
            .transport
            .send(outgoing, cancel.clone())
            .await
            .map_err(|failure| self.transport_failure(request, failure, None))?;

        if !meta.is_success() {
            #[cfg(feature = "tracing")]
            tracing::warn!(status = meta.status, "request failed with non-success status");
            let text = body.text().await.unwrap_or_default();
            let mut err = RequestError::new(ErrorCode::Status(meta.status), request.clone());
            if !text.trim().is_empty() {
                err = err.with_message(text);
            }
            return Err((err, Some(meta)));
        }

        let raw = match request.response_shape {
            ResponseShape::Single => match body.json().await {
                Ok(value) => value,
                Err(failure) => return Err(self.transport_failure(request, failure, Some(meta))),
            },
            ResponseShape::Incremental => {
                let Some(chunks) = body.into_stream() else {
                    let err = RequestError::new(ErrorCode::Status(meta.status), request.clone())
                        .with_message(NO_STREAM_BODY_MESSAGE);
                    return Err((err, Some(meta)));
                };
                let on_chunk = request.on_chunk.clone();
                let read = read_incremental(chunks, |chunk, accumulated| {
                    if let Some(on_chunk) = &on_chunk {
                        on_chunk(chunk, accumulated);
                    }
                })
                .await;
                match read {
                    Ok(text) => Value::String(text),
                    Err(failure) => return Err(self.transport_failure(request, failure, Some(meta))),
                }
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            status = meta.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
        Ok((raw, meta))
    }

    async fn classify(&self, request: &RequestDescriptor, raw: Value, meta: ResponseMeta) -> Attempt {
        let data = match &self.transform_response {
            Some(transform) => {
                let replaced = transform(&raw, request).await;
                replaced.unwrap_or(raw)
            }
            None => raw,
        };

        match self.classifier.classify(data, &meta) {
            Verdict::Accept(data) => Ok((data, meta)),
            Verdict::Reject(rejection) => {
                let mut err = RequestError::new(rejection.code, request.clone());
                err.message = rejection.message;
                err.data = rejection.data;
                Err((err, Some(meta)))
            }
        }
    }

    fn transport_failure(
        &self,
        request: &RequestDescriptor,
        failure: TransportFailure,
        meta: Option<ResponseMeta>,
    ) -> (RequestError, Option<ResponseMeta>) {
        if failure.is_aborted() {
            return (RequestError::new(ErrorCode::Abort, request.clone()), meta);
        }
        #[cfg(feature = "tracing")]
        tracing::error!(url = %request.url, error = %failure, "transport error");
        let message = failure.to_string();
        let err = RequestError::new(ErrorCode::Request, request.clone())
            .with_message(message)
            .with_cause(failure);
        (err, meta)
    }

    async fn succeed(
        &self,
        request: &RequestDescriptor,
        cache_key: Option<String>,
        data: Value,
        meta: ResponseMeta,
    ) -> Value {
        if let (Some(key), Some(directive)) = (cache_key, &request.cache) {
            self.cache
                .set(key, CacheEntry::new(data.clone(), directive.expires_in()));
        }
        if let Some(on_success) = &request.on_success {
            on_success(&data, Some(&meta));
        }
        self.run_after(request, Outcome::Data(&data), Some(&meta)).await;
        data
    }

    /// Single normalization point for every reported failure.
    async fn fail(&self, mut err: RequestError, meta: Option<&ResponseMeta>) -> RequestError {
        if err.message.is_none() {
            let mapped = self.error_code_messages.get(&*err.code.as_str()).cloned();
            if mapped.is_some() {
                err.message = mapped;
            }
        }
        if err.message.is_none() && matches!(err.code, ErrorCode::Status(_)) {
            err.message = meta.map(|meta| meta.status_text.clone());
        }

        self.run_after(&err.request, Outcome::Error(&err), meta).await;
        for hook in self.errors.snapshot() {
            hook(&err, meta).await;
        }

        if let Some(on_error) = &err.request.on_error {
            if on_error(&err, meta) == ErrorFlow::SkipDefault {
                return err;
            }
        }
        if let Some(handler) = &self.default_error_handler {
            handler(&err, meta);
        }
        err
    }

    async fn run_after(
        &self,
        request: &RequestDescriptor,
        outcome: Outcome<'_>,
        meta: Option<&ResponseMeta>,
    ) {
        for hook in self.after.snapshot() {
            hook(request, outcome, meta).await;
        }
    }
}

async fn expire(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requester(base: &str) -> Requester {
        Requester::new(Config::default().with_base_url(base)).expect("requester")
    }

    #[test]
    fn relative_urls_get_the_base_prefix() {
        let r = requester("https://api.test/v1");
        assert_eq!(r.inner.resolve_url("/users"), "https://api.test/v1/users");
        assert_eq!(r.inner.resolve_url("http://other.test/x"), "http://other.test/x");
        assert_eq!(r.inner.resolve_url("https://other.test/x"), "https://other.test/x");
        assert_eq!(r.inner.resolve_url("localhost:8080/x"), "localhost:8080/x");
    }

    #[test]
    fn zero_default_timeout_is_rejected() {
        let err = Requester::new(Config::default().with_timeout(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn config_debug_hides_callbacks() {
        let cfg = Config::default()
            .with_default_error_handler(|_, _| {})
            .with_error_message("500", "server error");
        let rendered = format!("{cfg:?}");
        assert!(rendered.contains("\"callback\""));
        assert!(rendered.contains("server error"));
    }
}
