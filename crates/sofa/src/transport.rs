//! HTTP transport seam.
//!
//! All requests go through [`Transport`], so the client and the change feed
//! can run against a real server ([`ReqwestTransport`]) or a scripted fake
//! ([`crate::testing::FakeTransport`]).

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Body chunks of a streaming response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Bytes { content_type: String, data: Bytes },
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn put(url: Url) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn delete(url: Url) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn bytes(mut self, content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes {
            content_type: content_type.into(),
            data: data.into(),
        });
        self
    }

    /// Value of a query parameter, mostly useful for asserting on recorded requests
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Fully buffered response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn a non-2xx response into an error
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::from_status(self.status, &self.body))
        }
    }
}

/// Response whose body is consumed incrementally
pub struct StreamingResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body of an error response so it can be reported
    pub async fn collect_body(mut self) -> Result<Bytes> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buffer))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and buffer the whole response body
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Issue a request and hand back the body as a stream.
    ///
    /// Implementations must not apply an overall timeout here: continuous
    /// change feeds stay open indefinitely.
    async fn stream(&self, request: HttpRequest) -> Result<StreamingResponse>;
}

/// Production transport backed by `reqwest`
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
    credentials: Option<(String, Option<String>)>,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout,
            credentials: None,
        })
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.credentials = Some((username.into(), password));
        self
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method, request.url);

        if let Some((username, password)) = &self.credentials {
            builder = builder.basic_auth(username, password.as_ref());
        }

        match request.body {
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Bytes { content_type, data }) => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data),
            None => builder,
        }
    }

    /// Short label for a reqwest failure, used in debug logs
    fn describe_error(e: &reqwest::Error) -> &'static str {
        if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection error"
        } else if e.is_request() {
            "request error"
        } else if e.is_body() || e.is_decode() {
            "body error"
        } else {
            "transport error"
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method.clone();
        let url = request.url.clone();
        let mut builder = self.build(request);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            debug!("[ReqwestTransport] {} {} failed: {}", method, url, Self::describe_error(&e));
            Error::from(e)
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;
        debug!("[ReqwestTransport] {} {} -> {}", method, url, status);

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }

    async fn stream(&self, request: HttpRequest) -> Result<StreamingResponse> {
        let method = request.method.clone();
        let url = request.url.clone();

        let response = self.build(request).send().await.map_err(|e| {
            debug!("[ReqwestTransport] {} {} failed: {}", method, url, Self::describe_error(&e));
            Error::from(e)
        })?;

        let status = response.status().as_u16();
        debug!("[ReqwestTransport] {} {} -> {} (streaming)", method, url, status);

        let body = response.bytes_stream().map(|chunk| chunk.map_err(Error::from));
        Ok(StreamingResponse {
            status,
            body: Box::pin(body),
        })
    }
}
