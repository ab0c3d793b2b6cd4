//! Registry module for Docker Registry HTTP API v2 and OCI Distribution
//!
//! [`Registry`] is the public entry point. It owns one [`RegistryClient`]
//! request pipeline and delegates to the manifest, blob and repository
//! operation groups.
//!
//! ```no_run
//! use docker_registry_client::config::RegistryConfig;
//! use docker_registry_client::image::PlatformFilter;
//! use docker_registry_client::registry::Registry;
//!
//! # async fn example() -> docker_registry_client::Result<()> {
//! let registry = Registry::new(RegistryConfig::new("https://registry-1.docker.io")?)?;
//! let digest = registry
//!     .digest("library/alpine", "latest", &PlatformFilter::new("amd64", "linux"))
//!     .await?;
//! println!("{:?}", digest);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod operations;
pub mod pagination;
pub mod transport;

pub use auth::{AuthNegotiator, AuthScheme, Authorization, Challenge};
pub use client::{RegistryClient, RegistryClientBuilder, RegistryRequest};
pub use operations::{Blob, BlobOperations, LookupMethod, ManifestOperations, RepositoryOperations, TagPage, TagQuery};
pub use pagination::{Page, Paginator, parse_link_header};
pub use transport::{HttpTransport, RegistryTransport, TransportRequest, TransportResponse};

use crate::config::RegistryConfig;
use crate::error::{Result, ResultExt};
use crate::image::manifest::{DigestResolution, Manifest, PlatformFilter};
use crate::logging::Logger;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct Registry {
    client: RegistryClient,
    manifests: ManifestOperations,
    blobs: BlobOperations,
    repositories: RepositoryOperations,
    output: Logger,
}

impl Registry {
    /// Registry over HTTP with the default quiet logger
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Ok(Self::from_client(RegistryClient::builder(config).build()?))
    }

    /// Registry talking through a caller-supplied transport
    pub fn with_transport(config: RegistryConfig, transport: Arc<dyn RegistryTransport>) -> Result<Self> {
        Ok(Self::from_client(
            RegistryClient::builder(config).with_transport(transport).build()?,
        ))
    }

    pub fn from_client(client: RegistryClient) -> Self {
        let manifests = ManifestOperations::new(client.clone());
        let blobs = BlobOperations::new(client.clone());
        let repositories = RepositoryOperations::new(client.clone(), manifests.clone());
        let output = client.logger().clone();
        Self {
            client,
            manifests,
            blobs,
            repositories,
            output,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        self.client.config()
    }

    /// Check that the registry speaks API v2 and accepts our credentials
    pub async fn ping(&self) -> Result<()> {
        self.client
            .send(RegistryRequest::get("/v2/"))
            .await
            .context(self.config().base_url())?;
        self.output
            .verbose(&format!("Registry {} is available", self.config().base_url()));
        Ok(())
    }

    /// Repository names in the catalog, filtered by the pattern `query`
    pub async fn search(&self, query: &str) -> Result<Vec<String>> {
        self.repositories.search(query).await
    }

    pub async fn tags(&self, repository: &str, query: &TagQuery) -> Result<TagPage> {
        self.repositories.list_tags(repository, query).await
    }

    pub async fn manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        self.manifests.get_manifest(repository, reference).await
    }

    /// Total layer size of a schema 2 manifest
    pub async fn manifest_sum(&self, repository: &str, reference: &str) -> Result<u64> {
        self.manifests
            .get_manifest(repository, reference)
            .await?
            .layer_size_sum()
            .context(format!("{}:{}", repository, reference))
    }

    pub async fn digest(
        &self,
        repository: &str,
        reference: &str,
        filter: &PlatformFilter,
    ) -> Result<DigestResolution> {
        self.manifests.digest(repository, reference, filter).await
    }

    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        body: Bytes,
        media_type: &str,
    ) -> Result<Option<String>> {
        self.manifests
            .put_manifest(repository, reference, body, media_type)
            .await
    }

    /// Copy a schema 2 manifest to a new repository and reference
    pub async fn tag(
        &self,
        repository: &str,
        reference: &str,
        new_repository: &str,
        new_reference: &str,
    ) -> Result<Option<String>> {
        self.output.info(&format!(
            "Tagging {}:{} as {}:{}",
            repository, reference, new_repository, new_reference
        ));
        self.manifests
            .tag(repository, reference, new_repository, new_reference)
            .await
    }

    /// Delete a tag by resolving it to its digest first; returns the HTTP
    /// status of the delete
    pub async fn rmtag(&self, repository: &str, tag: &str) -> Result<u16> {
        let mut method = LookupMethod::Head;
        let head = self.manifests.lookup(repository, tag, &mut method).await?;
        self.output
            .info(&format!("Deleting {}:{} ({})", repository, tag, head.digest));

        let status = self
            .manifests
            .delete_manifest(repository, &head.digest)
            .await?;
        Ok(status.as_u16())
    }

    pub async fn blob(&self, repository: &str, digest: &str) -> Result<Blob> {
        self.blobs.get_blob(repository, digest).await
    }

    pub async fn fetch_blob_to(&self, repository: &str, digest: &str, destination: &Path) -> Result<PathBuf> {
        self.blobs.fetch_blob_to(repository, digest, destination).await
    }

    pub async fn blob_size(&self, repository: &str, digest: &str) -> Result<u64> {
        self.blobs.blob_size(repository, digest).await
    }

    /// Download the layers of `repository:reference` into `directory`
    pub async fn pull(&self, repository: &str, reference: &str, directory: &Path) -> Result<Vec<PathBuf>> {
        self.output.section(&format!("Pulling {}:{}", repository, reference));
        let manifest = self.manifests.get_manifest(repository, reference).await?;
        self.blobs
            .pull_layers(repository, &manifest, directory)
            .await
            .context(format!("{}:{}", repository, reference))
    }
}
