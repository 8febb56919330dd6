use std::{fmt, future::Future, pin::Pin};

use bytes::{Bytes, BytesMut};
use futures_util::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::{header::USER_AGENT, Method};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    body::{Body, MultipartBody, PartContent},
    http::{status_text, HeaderList, ResponseMeta},
    DEFAULT_CLIENT_HEADER,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failure reported by a transport before a response could be classified.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The operation observed its cancellation token.
    #[error("request aborted")]
    Aborted,

    #[error("{message}")]
    Request {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The response body could not be read or decoded.
    #[error("{message}")]
    Body { message: String },
}

impl TransportFailure {
    pub fn request(message: impl Into<String>) -> Self {
        TransportFailure::Request {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TransportFailure::Aborted)
    }
}

impl From<reqwest::Error> for TransportFailure {
    fn from(err: reqwest::Error) -> Self {
        TransportFailure::Request {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// One fully encoded outgoing request.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub body: Body,
    pub headers: HeaderList,
}

pub struct TransportResponse {
    pub meta: ResponseMeta,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn new(meta: ResponseMeta, body: ResponseBody) -> Self {
        Self { meta, body }
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("meta", &self.meta)
            .field("body", &self.body)
            .finish()
    }
}

/// Response body, readable whole or incrementally.
pub enum ResponseBody {
    Empty,
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, TransportFailure>>),
}

impl ResponseBody {
    pub async fn bytes(self) -> Result<Bytes, TransportFailure> {
        match self {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => {
                let collected = stream
                    .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                        acc.extend_from_slice(&chunk);
                        Ok(acc)
                    })
                    .await?;
                Ok(collected.freeze())
            }
        }
    }

    pub async fn text(self) -> Result<String, TransportFailure> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse as JSON. An empty body parses as `null`.
    pub async fn json(self) -> Result<Value, TransportFailure> {
        let bytes = self.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|err| TransportFailure::Body {
            message: format!("invalid json response: {err}"),
        })
    }

    /// Incremental reader, if the body has one.
    pub fn into_stream(self) -> Option<BoxStream<'static, Result<Bytes, TransportFailure>>> {
        match self {
            ResponseBody::Empty => None,
            ResponseBody::Full(bytes) => Some(futures_util::stream::iter([Ok(bytes)]).boxed()),
            ResponseBody::Stream(stream) => Some(stream),
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Network exchange capability consumed by [`Requester`](crate::Requester).
///
/// Implementations should stop work and return [`TransportFailure::Aborted`]
/// once `cancel` fires; the controller treats that as an abort regardless.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportFailure>>;
}

/// Default transport backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn build(&self, request: TransportRequest) -> Result<reqwest::RequestBuilder, TransportFailure> {
        let headers = request
            .headers
            .to_header_map()
            .map_err(|err| TransportFailure::request(err.to_string()))?;
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .header(USER_AGENT, DEFAULT_CLIENT_HEADER)
            .headers(headers);
        builder = match request.body {
            Body::Empty => builder,
            Body::Json(bytes) => builder.body(bytes),
            Body::Multipart(multipart) => builder.multipart(multipart_form(multipart)?),
        };
        Ok(builder)
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportFailure>> {
        Box::pin(async move {
            let is_head = request.method == Method::HEAD;
            let builder = self.build(request)?;
            let resp = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportFailure::Aborted),
                resp = builder.send() => resp?,
            };

            let status = resp.status();
            let meta = ResponseMeta {
                status: status.as_u16(),
                status_text: status_text(status.as_u16()),
                headers: resp.headers().clone(),
                url: resp.url().to_string(),
            };
            if is_head
                || matches!(status.as_u16(), 204 | 205 | 304)
                || resp.content_length() == Some(0)
            {
                return Ok(TransportResponse::new(meta, ResponseBody::Empty));
            }
            let chunks = resp.bytes_stream().map_err(TransportFailure::from).boxed();
            let stream = futures_util::stream::unfold((chunks, cancel), |(mut chunks, cancel)| {
                async move {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => Some(Err(TransportFailure::Aborted)),
                        item = chunks.next() => item,
                    };
                    item.map(|item| (item, (chunks, cancel)))
                }
            });
            Ok(TransportResponse::new(meta, ResponseBody::Stream(stream.boxed())))
        })
    }
}

fn multipart_form(body: MultipartBody) -> Result<reqwest::multipart::Form, TransportFailure> {
    let mut form = reqwest::multipart::Form::new();
    for part in body.parts {
        form = match part.content {
            PartContent::Text(text) => form.text(part.name, text),
            PartContent::File(file) => {
                let mut file_part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                    .file_name(file.file_name);
                if let Some(mime) = file.mime {
                    file_part = file_part.mime_str(&mime)?;
                }
                form.part(part.name, file_part)
            }
        };
    }
    Ok(form)
}
