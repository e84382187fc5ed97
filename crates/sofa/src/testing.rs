//! Scripted in-memory transport for tests.
//!
//! `FakeTransport` answers requests from canned responses keyed by method and
//! URL path, records every request it sees, and can serve change feeds whose
//! body is fed live by the test through a [`FeedController`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{Error, Result};
use crate::transport::{HttpRequest, HttpResponse, StreamingResponse, Transport};

type RouteKey = (String, String);

#[derive(Clone)]
struct CannedResponse {
    status: u16,
    content_type: Option<String>,
    body: Bytes,
}

enum ScriptedStream {
    Chunks {
        status: u16,
        chunks: Vec<Bytes>,
        released: Arc<AtomicUsize>,
    },
    Live {
        status: u16,
        rx: mpsc::UnboundedReceiver<Result<Bytes>>,
        released: Arc<AtomicUsize>,
    },
}

/// In-memory [`Transport`] with canned responses
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<HashMap<RouteKey, VecDeque<CannedResponse>>>,
    streams: Mutex<HashMap<RouteKey, VecDeque<ScriptedStream>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffered response. The last queued response for a route is
    /// repeated for any further requests.
    pub fn respond(&self, method: &str, path: &str, status: u16, content_type: Option<&str>, body: impl Into<Bytes>) {
        lock(&self.responses)
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(CannedResponse {
                status,
                content_type: content_type.map(str::to_string),
                body: body.into(),
            });
    }

    pub fn respond_json(&self, method: &str, path: &str, status: u16, body: &str) {
        self.respond(method, path, status, Some("application/json"), body.to_string());
    }

    /// Serve one streaming response made of fixed chunks.
    ///
    /// Returns a counter of how many times the body stream was dropped.
    pub fn respond_stream(&self, path: &str, status: u16, chunks: &[&str]) -> Arc<AtomicUsize> {
        let released = Arc::new(AtomicUsize::new(0));
        lock(&self.streams)
            .entry(("GET".to_string(), path.to_string()))
            .or_default()
            .push_back(ScriptedStream::Chunks {
                status,
                chunks: chunks.iter().map(|c| Bytes::from(c.to_string())).collect(),
                released: released.clone(),
            });
        released
    }

    /// Serve one streaming response whose body is written by the returned controller
    pub fn open_feed(&self, path: &str) -> FeedController {
        let (tx, rx) = mpsc::unbounded_channel();
        let released = Arc::new(AtomicUsize::new(0));
        lock(&self.streams)
            .entry(("GET".to_string(), path.to_string()))
            .or_default()
            .push_back(ScriptedStream::Live {
                status: 200,
                rx,
                released: released.clone(),
            });
        FeedController {
            tx: Some(tx),
            released,
        }
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Requests whose URL path equals `path`
    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }

    fn record(&self, request: &HttpRequest) -> RouteKey {
        lock(&self.requests).push(request.clone());
        (request.method.to_string(), request.url.path().to_string())
    }

    fn canned(&self, key: &RouteKey) -> CannedResponse {
        let mut responses = lock(&self.responses);
        let next = match responses.get_mut(key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        next.unwrap_or_else(|| CannedResponse {
            status: 404,
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(br#"{"error":"not_found","reason":"missing"}"#),
        })
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let key = self.record(&request);
        let canned = self.canned(&key);
        Ok(HttpResponse {
            status: canned.status,
            content_type: canned.content_type,
            body: canned.body,
        })
    }

    async fn stream(&self, request: HttpRequest) -> Result<StreamingResponse> {
        let key = self.record(&request);
        let scripted = lock(&self.streams)
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());

        let (status, rx, released) = match scripted {
            Some(ScriptedStream::Live {
                status,
                rx,
                released,
            }) => (status, rx, released),
            Some(ScriptedStream::Chunks {
                status,
                chunks,
                released,
            }) => {
                let (tx, rx) = mpsc::unbounded_channel();
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk));
                }
                (status, rx, released)
            }
            None => {
                // Fall back to the buffered response for this route
                let canned = self.canned(&key);
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(Ok(canned.body));
                (canned.status, rx, Arc::new(AtomicUsize::new(0)))
            }
        };

        Ok(StreamingResponse {
            status,
            body: Box::pin(TrackedStream {
                inner: UnboundedReceiverStream::new(rx),
                released,
            }),
        })
    }
}

/// Writes the body of a live fake feed
pub struct FeedController {
    tx: Option<mpsc::UnboundedSender<Result<Bytes>>>,
    released: Arc<AtomicUsize>,
}

impl FeedController {
    /// Send raw body bytes; returns false once the reader dropped the stream
    pub fn send(&self, chunk: &str) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Ok(Bytes::from(chunk.to_string()))).is_ok(),
            None => false,
        }
    }

    /// Send one JSON line of a continuous feed
    pub fn send_line(&self, line: &str) -> bool {
        self.send(&format!("{}\n", line))
    }

    /// Fail the body stream with a transport error
    pub fn fail(&self, error: Error) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// End the body (server closed the connection)
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// How many times the body stream has been dropped by its reader
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released() > 0
    }
}

struct TrackedStream {
    inner: UnboundedReceiverStream<Result<Bytes>>,
    released: Arc<AtomicUsize>,
}

impl Stream for TrackedStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
