//! Request pipeline shared by every registry operation
//!
//! [`RegistryClient::send`] issues a request anonymously. When the registry
//! answers `401`, the challenge is negotiated and the request is retried
//! exactly once with the resulting credentials. Tokens live only for that
//! retry; nothing is cached on the client.

use crate::config::RegistryConfig;
use crate::error::handlers::{HttpErrorHandler, RequestPhase};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::auth::{AuthNegotiator, Authorization, Challenge};
use crate::registry::transport::{HttpTransport, RegistryTransport, TransportRequest, TransportResponse};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use std::sync::Arc;

/// A request relative to the registry base URL
#[derive(Debug, Clone)]
pub struct RegistryRequest {
    pub method: Method,
    /// Path such as `/v2/library/alpine/tags/list`, or an absolute URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RegistryRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(Method::HEAD, path)
    }

    pub fn put(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut request = Self::new(Method::PUT, path);
        request.body = Some(body.into());
        request
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| RegistryError::Config(format!("Invalid value for header {}: {}", name, value)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

pub struct RegistryClientBuilder {
    config: RegistryConfig,
    transport: Option<Arc<dyn RegistryTransport>>,
    logger: Logger,
}

impl RegistryClientBuilder {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            transport: None,
            logger: Logger::default(),
        }
    }

    /// Use `transport` instead of the default `reqwest` one
    pub fn with_transport(mut self, transport: Arc<dyn RegistryTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        self.config.validate()?;

        let transport: Arc<dyn RegistryTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config, self.logger.clone())?),
        };
        let negotiator = AuthNegotiator::new(transport.clone(), self.logger.clone());

        Ok(RegistryClient {
            config: self.config,
            transport,
            negotiator,
            logger: self.logger,
        })
    }
}

#[derive(Clone)]
pub struct RegistryClient {
    config: RegistryConfig,
    transport: Arc<dyn RegistryTransport>,
    negotiator: AuthNegotiator,
    logger: Logger,
}

impl RegistryClient {
    pub fn builder(config: RegistryConfig) -> RegistryClientBuilder {
        RegistryClientBuilder::new(config)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Execute `request`, answering at most one authentication challenge.
    ///
    /// Returns the response only for 2xx statuses; everything else is mapped
    /// to a [`RegistryError`].
    pub async fn send(&self, request: RegistryRequest) -> Result<TransportResponse> {
        let url = self.config.endpoint(&request.path);

        let response = self.execute(&request, &url, &Authorization::Anonymous).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return self.check(response, &request, &url, RequestPhase::Initial).await;
        }

        let header = response
            .header(WWW_AUTHENTICATE.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RegistryError::UnknownAuthScheme(format!("401 from {} without a WWW-Authenticate challenge", url))
            })?;
        let challenge = Challenge::parse(&header)?;
        self.logger.verbose(&format!(
            "{} {} requires {:?} authentication",
            request.method, url, challenge.scheme
        ));

        let authorization = self
            .negotiator
            .authenticate(&challenge, self.config.credentials())
            .await?;

        let retry = self.execute(&request, &url, &authorization).await?;
        self.check(retry, &request, &url, RequestPhase::Retry).await
    }

    async fn execute(
        &self,
        request: &RegistryRequest,
        url: &str,
        authorization: &Authorization,
    ) -> Result<TransportResponse> {
        let mut headers = request.headers.clone();
        authorization.apply(&mut headers)?;

        self.transport
            .execute(TransportRequest {
                method: request.method.clone(),
                url: url.to_string(),
                headers,
                body: request.body.clone(),
            })
            .await
    }

    async fn check(
        &self,
        response: TransportResponse,
        request: &RegistryRequest,
        url: &str,
        phase: RequestPhase,
    ) -> Result<TransportResponse> {
        if response.status.is_success() {
            return Ok(response);
        }

        let status = response.status;
        let error_text = if request.method == Method::HEAD {
            String::new()
        } else {
            response.text().await
        };
        self.logger
            .debug(&format!("{} {} failed with {}: {}", request.method, url, status, error_text));

        Err(HttpErrorHandler::handle_registry_error(
            status,
            &error_text,
            request.method.as_str(),
            url,
            phase,
        ))
    }
}
