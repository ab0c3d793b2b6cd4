//! HTTP transport seam for Docker Registry API v2 and OCI Distribution requests
//!
//! Everything above this module talks to the network through
//! [`RegistryTransport`], which executes exactly one HTTP request and hands
//! back status, headers and a streamed body. [`HttpTransport`] is the
//! `reqwest` implementation; tests substitute an in-process registry.

use crate::config::RegistryConfig;
use crate::error::handlers::NetworkErrorHandler;
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::fmt;

/// Response body delivered chunk by chunk
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// Executes a single HTTP request
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Send `request` and return the response, whatever its status.
    ///
    /// Only failures below HTTP (DNS, connect, TLS, timeouts) are errors.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// A fully resolved request: absolute URL, final headers, optional body
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: BodyStream,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self { status, headers, body }
    }

    /// Response whose body is already in memory
    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        let stream: BodyStream = if body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(body) }).boxed()
        };
        Self::new(status, headers, stream)
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Collect the whole body into memory
    pub async fn bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Body as text for error messages; read failures yield an empty string
    pub async fn text(self) -> String {
        match self.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        }
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, BodyStream) {
        (self.status, self.headers, self.body)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// `reqwest`-backed transport honoring the configured timeouts and options
pub struct HttpTransport {
    client: reqwest::Client,
    logger: Logger,
}

impl HttpTransport {
    pub fn new(config: &RegistryConfig, logger: Logger) -> Result<Self> {
        let options = config.transport_options();

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.open_timeout())
            .read_timeout(config.read_timeout());

        if options.accept_invalid_certs {
            logger.warning("TLS certificate verification is disabled");
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        }

        if let Some(proxy) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| RegistryError::Config(format!("Invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.clone());
        } else {
            builder = builder.user_agent(concat!("docker-registry-client/", env!("CARGO_PKG_VERSION")));
        }

        if !options.default_headers.is_empty() {
            let mut headers = HeaderMap::new();
            for (name, value) in &options.default_headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| RegistryError::Config(format!("Invalid header name {}: {}", name, e)))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| RegistryError::Config(format!("Invalid header value for {}: {}", name, e)))?;
                headers.insert(name, value);
            }
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| RegistryError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, logger })
    }
}

#[async_trait]
impl RegistryTransport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        self.logger
            .debug(&format!("{} {}", request.method, request.url));

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            NetworkErrorHandler::handle_network_error(&e, &format!("{} {}", request.method, request.url))
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        self.logger
            .debug(&format!("{} {} -> {}", request.method, request.url, status));

        let body = response
            .bytes_stream()
            .map_err(|e| NetworkErrorHandler::handle_network_error(&e, "reading response body"))
            .boxed();

        Ok(TransportResponse::new(status, headers, body))
    }
}
