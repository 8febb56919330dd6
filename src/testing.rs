use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::{
    http::ResponseMeta,
    transport::{
        BoxFuture, ResponseBody, Transport, TransportFailure, TransportRequest, TransportResponse,
    },
    Config, Requester,
};

/// Canned reply returned by [`MockTransport`].
#[derive(Clone, Debug)]
pub enum MockReply {
    Json(u16, Value),
    Text(u16, String),
    /// 200 response streamed as the given chunks.
    Chunks(Vec<String>),
    NoBody(u16),
    /// Never responds; resolves as aborted once the token fires.
    Hang,
    /// Transport-level failure with the given message.
    Fail(String),
    /// Wait, then reply. Aborts if the token fires first.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn ok(value: Value) -> Self {
        MockReply::Json(200, value)
    }

    pub fn after(self, delay: Duration) -> Self {
        MockReply::Delayed(delay, Box::new(self))
    }
}

/// In-memory transport for offline tests. Replies are served in FIFO order
/// and every request is recorded.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockTransportInner>,
}

#[derive(Default)]
struct MockTransportInner {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push(reply);
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.inner
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
    }

    /// Number of requests that reached the transport.
    pub fn calls(&self) -> usize {
        self.requests().len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportFailure>> {
        let url = request.url.clone();
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let reply = self
            .inner
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match reply {
            Some(reply) => respond(reply, url, cancel),
            None => Box::pin(async {
                Err(TransportFailure::request("mock transport has no queued reply"))
            }),
        }
    }
}

fn respond(
    reply: MockReply,
    url: String,
    cancel: CancellationToken,
) -> BoxFuture<'static, Result<TransportResponse, TransportFailure>> {
    Box::pin(async move {
        match reply {
            MockReply::Json(status, value) => {
                let bytes = serde_json::to_vec(&value).map_err(|err| TransportFailure::Body {
                    message: err.to_string(),
                })?;
                Ok(TransportResponse::new(
                    ResponseMeta::new(status, url),
                    ResponseBody::Full(Bytes::from(bytes)),
                ))
            }
            MockReply::Text(status, text) => Ok(TransportResponse::new(
                ResponseMeta::new(status, url),
                ResponseBody::Full(Bytes::from(text)),
            )),
            MockReply::Chunks(chunks) => {
                let stream = futures_util::stream::iter(
                    chunks
                        .into_iter()
                        .map(|c| Ok::<_, TransportFailure>(Bytes::from(c))),
                );
                Ok(TransportResponse::new(
                    ResponseMeta::new(200, url),
                    ResponseBody::Stream(stream.boxed()),
                ))
            }
            MockReply::NoBody(status) => Ok(TransportResponse::new(
                ResponseMeta::new(status, url),
                ResponseBody::Empty,
            )),
            MockReply::Hang => {
                cancel.cancelled().await;
                Err(TransportFailure::Aborted)
            }
            MockReply::Fail(message) => Err(TransportFailure::request(message)),
            MockReply::Delayed(delay, reply) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(TransportFailure::Aborted),
                    _ = tokio::time::sleep(delay) => respond(*reply, url, cancel.clone()).await,
                }
            }
        }
    })
}

/// Create a requester that sends through `transport` with `https://api.test` as base.
pub fn test_requester(transport: &MockTransport) -> Requester {
    test_requester_with(transport, Config::default())
}

/// Same as [`test_requester`] on top of an existing config.
pub fn test_requester_with(transport: &MockTransport, cfg: Config) -> Requester {
    Requester::new(
        cfg.with_base_url("https://api.test")
            .with_transport(Arc::new(transport.clone())),
    )
    .expect("requester")
}

/// One write of a chunked response: wait `delay`, then send `bytes` as a
/// single chunk frame. Frames may split multi-byte characters.
#[derive(Clone, Debug)]
pub struct ChunkStep {
    pub delay: Duration,
    pub bytes: Bytes,
}

impl ChunkStep {
    pub fn now(bytes: impl Into<Bytes>) -> Self {
        Self::after(Duration::ZERO, bytes)
    }

    pub fn after(delay: Duration, bytes: impl Into<Bytes>) -> Self {
        Self {
            delay,
            bytes: bytes.into(),
        }
    }
}

/// Serve one `text/plain` response with `Transfer-Encoding: chunked` on a
/// random local port. The terminating frame follows the last step, delayed
/// by `hold_open` when given.
pub async fn start_chunked_server(steps: Vec<ChunkStep>, hold_open: Option<Duration>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        if !read_request_head(&mut socket).await {
            return;
        }
        let _ = serve_chunks(&mut socket, steps, hold_open).await;
    });

    format!("http://{addr}")
}

async fn read_request_head(socket: &mut TcpStream) -> bool {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    true
}

async fn serve_chunks(
    socket: &mut TcpStream,
    steps: Vec<ChunkStep>,
    hold_open: Option<Duration>,
) -> std::io::Result<()> {
    socket
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .await?;
    for step in steps {
        tokio::time::sleep(step.delay).await;
        let mut frame = format!("{:X}\r\n", step.bytes.len()).into_bytes();
        frame.extend_from_slice(&step.bytes);
        frame.extend_from_slice(b"\r\n");
        socket.write_all(&frame).await?;
        socket.flush().await?;
    }
    if let Some(delay) = hold_open {
        tokio::time::sleep(delay).await;
    }
    socket.write_all(b"0\r\n\r\n").await
}
