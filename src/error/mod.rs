//! Error types and handlers for registry operations

pub mod handlers;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// DNS or connect failure
    #[error("Unknown registry: unable to reach {url}: {message}")]
    RegistryUnreachable { url: String, message: String },

    /// Open or read timeout expired
    #[error("Request to {url} timed out: {message}")]
    Timeout { url: String, message: String },

    /// Failure after the connection was established, e.g. while streaming a body
    #[error("Transport error: {0}")]
    Transport(String),

    /// Bad credentials or a rejected token
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Valid identity, insufficient scope
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The registry rejected the HTTP method (405)
    #[error("Method {method} not supported for {url}")]
    MethodNotSupported { method: String, url: String },

    #[error("Unsupported schema version {found} for {reference}: schema version 2 required")]
    UnsupportedSchemaVersion { reference: String, found: u64 },

    #[error("Unsupported manifest: {0}")]
    UnsupportedManifest(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unknown registry: unsupported authentication scheme '{0}'")]
    UnknownAuthScheme(String),

    #[error("Unexpected HTTP {status} from {url}: {message}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        message: String,
    },

    #[error("Invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Prefix the message of message-carrying variants with `context`.
    ///
    /// Structured variants keep their fields untouched.
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            RegistryError::Transport(msg) => RegistryError::Transport(format!("{}: {}", context, msg)),
            RegistryError::AuthenticationFailed(msg) => {
                RegistryError::AuthenticationFailed(format!("{}: {}", context, msg))
            }
            RegistryError::AuthorizationFailed(msg) => {
                RegistryError::AuthorizationFailed(format!("{}: {}", context, msg))
            }
            RegistryError::NotFound(msg) => RegistryError::NotFound(format!("{}: {}", context, msg)),
            RegistryError::UnsupportedManifest(msg) => {
                RegistryError::UnsupportedManifest(format!("{}: {}", context, msg))
            }
            RegistryError::MalformedResponse(msg) => {
                RegistryError::MalformedResponse(format!("{}: {}", context, msg))
            }
            RegistryError::UnexpectedStatus { status, url, message } => RegistryError::UnexpectedStatus {
                status,
                url,
                message: format!("{}: {}", context, message),
            },
            other => other,
        }
    }

    /// Attach the path an IO error happened at
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

/// Attach operation context to a failed result
pub trait ResultExt<T> {
    fn context(self, context: impl std::fmt::Display) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::MalformedResponse(format!("invalid JSON: {}", err))
    }
}

impl From<url::ParseError> for RegistryError {
    fn from(err: url::ParseError) -> Self {
        RegistryError::Config(format!("invalid URL: {}", err))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}
