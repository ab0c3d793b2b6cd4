//! Authentication negotiation for Docker registry access
//!
//! A registry answers an unauthenticated request with `401` and a
//! `WWW-Authenticate` challenge. [`Challenge::parse`] reads that header and
//! [`AuthNegotiator::authenticate`] turns it into an [`Authorization`] the
//! caller attaches to its single retry of the original request.

use crate::config::Credentials;
use crate::error::handlers::{HttpErrorHandler, RequestPhase};
use crate::error::{RegistryError, Result};
use crate::logging::Logger;
use crate::registry::transport::{RegistryTransport, TransportRequest};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Bearer,
}

/// Parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: AuthScheme,
    pub realm: Option<String>,
    pub service: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    /// Every `key="value"` pair of the header, including the ones above
    pub params: BTreeMap<String, String>,
}

impl Challenge {
    /// Parse a challenge such as
    /// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull"`
    pub fn parse(header: &str) -> Result<Self> {
        static PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).unwrap());

        let header = header.trim();
        let scheme_token = header.split_whitespace().next().unwrap_or_default();
        let scheme = match scheme_token.to_ascii_lowercase().as_str() {
            "basic" => AuthScheme::Basic,
            "bearer" => AuthScheme::Bearer,
            "" => return Err(RegistryError::UnknownAuthScheme("<empty>".to_string())),
            _ => return Err(RegistryError::UnknownAuthScheme(scheme_token.to_string())),
        };

        let mut params = BTreeMap::new();
        for captures in PARAM.captures_iter(&header[scheme_token.len()..]) {
            params
                .entry(captures[1].to_ascii_lowercase())
                .or_insert_with(|| captures[2].to_string());
        }

        Ok(Self {
            scheme,
            realm: params.get("realm").cloned(),
            service: params.get("service").cloned(),
            scope: params.get("scope").cloned(),
            error: params.get("error").cloned(),
            params,
        })
    }
}

/// Credentials attached to a single request
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    Anonymous,
    Basic(Credentials),
    Bearer(String),
}

impl Authorization {
    /// Set the `Authorization` header, replacing any previous value
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<()> {
        let value = match self {
            Authorization::Anonymous => {
                headers.remove(AUTHORIZATION);
                return Ok(());
            }
            Authorization::Basic(credentials) => {
                let encoded = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
                format!("Basic {}", encoded)
            }
            Authorization::Bearer(token) => format!("Bearer {}", token),
        };

        let mut value = HeaderValue::from_str(&value).map_err(|_| {
            RegistryError::AuthenticationFailed("credentials contain characters not allowed in a header".to_string())
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Anonymous => write!(f, "Anonymous"),
            Authorization::Basic(credentials) => write!(f, "Basic({})", credentials.username),
            Authorization::Bearer(_) => write!(f, "Bearer(<redacted>)"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
    expires_in: Option<u64>,
}

/// Resolves challenges into request credentials
#[derive(Clone)]
pub struct AuthNegotiator {
    transport: Arc<dyn RegistryTransport>,
    logger: Logger,
}

impl AuthNegotiator {
    pub fn new(transport: Arc<dyn RegistryTransport>, logger: Logger) -> Self {
        Self { transport, logger }
    }

    /// Produce the credentials for the retry of a challenged request.
    ///
    /// Basic challenges need no round trip. Bearer challenges cost exactly one
    /// request to the token realm.
    pub async fn authenticate(
        &self,
        challenge: &Challenge,
        credentials: Option<&Credentials>,
    ) -> Result<Authorization> {
        match challenge.scheme {
            AuthScheme::Basic => match credentials {
                Some(credentials) => {
                    self.logger
                        .verbose(&format!("Using Basic authentication as {}", credentials.username));
                    Ok(Authorization::Basic(credentials.clone()))
                }
                None => Err(RegistryError::AuthenticationFailed(
                    "registry requires Basic authentication but no credentials were configured".to_string(),
                )),
            },
            AuthScheme::Bearer => {
                let token = self.fetch_token(challenge, credentials).await?;
                Ok(Authorization::Bearer(token))
            }
        }
    }

    async fn fetch_token(&self, challenge: &Challenge, credentials: Option<&Credentials>) -> Result<String> {
        let realm = challenge.realm.as_deref().ok_or_else(|| {
            RegistryError::MalformedResponse("Bearer challenge is missing the realm parameter".to_string())
        })?;

        let mut url = Url::parse(realm)
            .map_err(|e| RegistryError::MalformedResponse(format!("Invalid token realm {}: {}", realm, e)))?;

        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }
        if let Some(credentials) = credentials {
            query.push(("account", credentials.username.as_str()));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        self.logger.detail(&format!(
            "Requesting token from {} (service: {}, scope: {})",
            realm,
            challenge.service.as_deref().unwrap_or("-"),
            challenge.scope.as_deref().unwrap_or("-")
        ));

        let mut request = TransportRequest::new(Method::GET, url.to_string());
        if let Some(credentials) = credentials {
            Authorization::Basic(credentials.clone()).apply(&mut request.headers)?;
        }

        let response = self.transport.execute(request).await?;
        if !response.status.is_success() {
            let status = response.status;
            let error_text = response.text().await;
            self.logger
                .warning(&format!("Token request failed with status {}", status));
            return Err(HttpErrorHandler::handle_registry_error(
                status,
                &error_text,
                "GET",
                realm,
                RequestPhase::TokenFetch,
            ));
        }

        let body = response.bytes().await?;
        let token_response: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::MalformedResponse(format!("Failed to parse token response: {}", e)))?;

        if let Some(expires_in) = token_response.expires_in {
            self.logger
                .detail(&format!("Token expires in {} seconds", expires_in));
        }

        token_response
            .token
            .filter(|t| !t.is_empty())
            .or(token_response.access_token.filter(|t| !t.is_empty()))
            .ok_or_else(|| {
                RegistryError::MalformedResponse(
                    "Token response contains neither token nor access_token".to_string(),
                )
            })
    }
}
