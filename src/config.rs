//! Client configuration: registry location, credentials, timeouts and
//! transport passthrough options
//!
//! A [`RegistryConfig`] is fixed when the client is built. Nothing in it
//! changes afterwards; per-request state such as bearer tokens lives in the
//! request pipeline instead.

use crate::error::{RegistryError, Result};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_REGISTRY: &str = "https://registry.hub.docker.com";
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Query key carrying the pagination cursor on standard registries
pub const DEFAULT_CURSOR_KEY: &str = "last";

/// Registries whose `Link` URLs carry the cursor under a non-standard key
pub const VENDOR_CURSOR_KEYS: &[(&str, &str)] = &[("quay.io", "next_page")];

/// Username/password pair used for Basic auth and token requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options handed straight to the HTTP transport
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Skip TLS certificate verification
    pub accept_invalid_certs: bool,
    /// Proxy URL for all requests
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    /// Extra headers sent with every request
    pub default_headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    base_url: Url,
    credentials: Option<Credentials>,
    open_timeout: Duration,
    read_timeout: Duration,
    transport: TransportOptions,
    cursor_keys: BTreeMap<String, String>,
}

impl RegistryConfig {
    /// Parse a registry base URI. A missing scheme defaults to `https://`.
    pub fn new(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(RegistryError::Config("Registry URI cannot be empty".to_string()));
        }

        let with_scheme = if uri.contains("://") {
            uri.to_string()
        } else {
            format!("https://{}", uri)
        };

        let base_url = Url::parse(&with_scheme)?;
        if base_url.host_str().is_none() {
            return Err(RegistryError::Config(format!("Registry URI has no host: {}", uri)));
        }
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(RegistryError::Config(format!(
                "Registry URI must use http or https: {}",
                uri
            )));
        }

        let cursor_keys = VENDOR_CURSOR_KEYS
            .iter()
            .map(|(host, key)| (host.to_string(), key.to_string()))
            .collect();

        Ok(Self {
            base_url,
            credentials: None,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            transport: TransportOptions::default(),
            cursor_keys,
        })
    }

    /// Build from `REGISTRY_ADDRESS`, `REGISTRY_USERNAME`, `REGISTRY_PASSWORD`,
    /// `REGISTRY_OPEN_TIMEOUT`, `REGISTRY_READ_TIMEOUT` (seconds) and `SKIP_TLS`.
    pub fn from_env() -> Result<Self> {
        let address = env::var("REGISTRY_ADDRESS").unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        Self::new(&address)?.with_env_overrides()
    }

    /// Apply the credential, timeout and TLS variables read by [`Self::from_env`]
    pub fn with_env_overrides(mut self) -> Result<Self> {
        match (env::var("REGISTRY_USERNAME").ok(), env::var("REGISTRY_PASSWORD").ok()) {
            (Some(username), Some(password)) => {
                self = self.with_credentials(username, password);
            }
            (None, None) => {}
            _ => {
                return Err(RegistryError::Config(
                    "REGISTRY_USERNAME and REGISTRY_PASSWORD must be set together".to_string(),
                ));
            }
        }

        if let Some(secs) = env_seconds("REGISTRY_OPEN_TIMEOUT")? {
            self = self.with_open_timeout(secs);
        }
        if let Some(secs) = env_seconds("REGISTRY_READ_TIMEOUT")? {
            self = self.with_read_timeout(secs);
        }
        if env::var("SKIP_TLS").is_ok_and(|v| v == "true") {
            self.transport.accept_invalid_certs = true;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_transport_options(mut self, options: TransportOptions) -> Self {
        self.transport = options;
        self
    }

    /// Register the cursor query key used by `host` in its `Link` headers
    pub fn with_cursor_key(mut self, host: impl Into<String>, key: impl Into<String>) -> Self {
        self.cursor_keys.insert(host.into(), key.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.open_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(RegistryError::Config("Timeouts must be greater than 0".to_string()));
        }
        if let Some(credentials) = &self.credentials {
            if credentials.username.is_empty() {
                return Err(RegistryError::Config(
                    "Username cannot be empty when a password is provided".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn host(&self) -> &str {
        self.base_url.host_str().unwrap_or_default()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn transport_options(&self) -> &TransportOptions {
        &self.transport
    }

    /// Cursor query key for this registry's host
    pub fn cursor_key(&self) -> &str {
        self.cursor_keys
            .get(self.host())
            .map(String::as_str)
            .unwrap_or(DEFAULT_CURSOR_KEY)
    }

    /// Absolute URL for a registry path such as `/v2/_catalog`.
    ///
    /// Absolute URLs (e.g. from a `Link` header) are returned unchanged.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

fn env_seconds(name: &str) -> Result<Option<Duration>> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| RegistryError::Config(format!("{} must be a whole number of seconds", name))),
        Err(_) => Ok(None),
    }
}
