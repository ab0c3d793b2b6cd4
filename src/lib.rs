//! Docker Registry Client Library
//!
//! Client for the Docker Registry HTTP API v2 and the OCI Distribution API:
//! anonymous, Basic and Bearer authentication, `Link` pagination, manifest
//! and manifest-list resolution, and content-addressed blob downloads.

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod logging;
pub mod registry;

pub use config::{Credentials, RegistryConfig};
pub use error::{RegistryError, Result};
pub use logging::Logger;
pub use registry::Registry;
