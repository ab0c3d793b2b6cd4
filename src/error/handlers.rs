//! Status-code and network-failure mapping shared by the request pipeline

use crate::error::RegistryError;
use reqwest::StatusCode;

/// Where in the auth flow a response was received.
///
/// The same status means different things depending on whether credentials
/// have already been presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// First, anonymous attempt of a registry request
    Initial,
    /// The single retry carrying Basic credentials or a bearer token
    Retry,
    /// The request to the token realm
    TokenFetch,
}

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Map a non-success registry response to an error
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        method: &str,
        url: &str,
        phase: RequestPhase,
    ) -> RegistryError {
        let detail = Self::summarize(error_text);
        match (phase, status.as_u16()) {
            (RequestPhase::TokenFetch, 401 | 403) => RegistryError::AuthenticationFailed(format!(
                "token request to {} rejected with HTTP {}{}",
                url, status, detail
            )),
            (RequestPhase::TokenFetch, 404) => {
                RegistryError::NotFound(format!("token endpoint {} not found{}", url, detail))
            }
            (RequestPhase::TokenFetch, _) => RegistryError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
                message: error_text.trim().to_string(),
            },
            (_, 401) => RegistryError::AuthenticationFailed(format!(
                "credentials rejected for {} {}{}",
                method, url, detail
            )),
            (_, 403) => RegistryError::AuthorizationFailed(format!(
                "insufficient permissions for {} {}{}",
                method, url, detail
            )),
            (_, 404) => RegistryError::NotFound(format!("{} {}{}", method, url, detail)),
            (_, 405) => RegistryError::MethodNotSupported {
                method: method.to_string(),
                url: url.to_string(),
            },
            _ => RegistryError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
                message: error_text.trim().to_string(),
            },
        }
    }

    fn summarize(error_text: &str) -> String {
        let text = error_text.trim();
        if text.is_empty() {
            String::new()
        } else {
            format!(" ({})", text)
        }
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize a `reqwest` failure
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> RegistryError {
        let url = error
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if error.is_timeout() {
            RegistryError::Timeout {
                url,
                message: format!("{}: {}", context, error),
            }
        } else if error.is_connect() {
            RegistryError::RegistryUnreachable {
                url,
                message: format!("{}: {}", context, error),
            }
        } else {
            RegistryError::Transport(format!("{} failed for {}: {}", context, url, error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(status: u16, phase: RequestPhase) -> RegistryError {
        HttpErrorHandler::handle_registry_error(
            StatusCode::from_u16(status).unwrap(),
            "",
            "GET",
            "https://registry.example.com/v2/app/manifests/latest",
            phase,
        )
    }

    #[test]
    fn test_retry_statuses() {
        assert!(matches!(map(401, RequestPhase::Retry), RegistryError::AuthenticationFailed(_)));
        assert!(matches!(map(403, RequestPhase::Retry), RegistryError::AuthorizationFailed(_)));
        assert!(matches!(map(404, RequestPhase::Retry), RegistryError::NotFound(_)));
        assert!(matches!(map(405, RequestPhase::Retry), RegistryError::MethodNotSupported { .. }));
    }

    #[test]
    fn test_token_fetch_statuses() {
        assert!(matches!(map(401, RequestPhase::TokenFetch), RegistryError::AuthenticationFailed(_)));
        assert!(matches!(map(403, RequestPhase::TokenFetch), RegistryError::AuthenticationFailed(_)));
        assert!(matches!(map(404, RequestPhase::TokenFetch), RegistryError::NotFound(_)));
    }

    #[test]
    fn test_token_server_failure_is_unexpected() {
        for status in [405, 500, 503] {
            match map(status, RequestPhase::TokenFetch) {
                RegistryError::UnexpectedStatus { status: got, .. } => assert_eq!(got, status),
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_other_status_is_unexpected() {
        match map(500, RequestPhase::Initial) {
            RegistryError::UnexpectedStatus { status, .. } => assert_eq!(status, 500),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_body_text_is_carried() {
        let err = HttpErrorHandler::handle_registry_error(
            StatusCode::NOT_FOUND,
            "{\"errors\":[{\"code\":\"MANIFEST_UNKNOWN\"}]}",
            "GET",
            "https://r/v2/a/manifests/b",
            RequestPhase::Initial,
        );
        assert!(err.to_string().contains("MANIFEST_UNKNOWN"));
    }
}
