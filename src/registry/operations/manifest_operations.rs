//! Manifest operations for registry client
//!
//! Implements Docker Registry v2 and OCI manifest operations:
//! - Manifest download (GET /v2/{name}/manifests/{reference})
//! - Digest lookup (HEAD, falling back to GET on registries that reject HEAD)
//! - Platform resolution over manifest lists and OCI indexes
//! - Manifest upload and byte-identical retagging (PUT)
//! - Manifest deletion by digest (DELETE)

use crate::error::{RegistryError, Result, ResultExt};
use crate::image::manifest::{
    DOCKER_CONTENT_DIGEST, DigestResolution, Manifest, ManifestKind, ManifestType, PlatformFilter,
};
use crate::logging::Logger;
use crate::registry::client::{RegistryClient, RegistryRequest};
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use reqwest::{Method, StatusCode};

/// HTTP method used for digest lookups during one operation.
///
/// Starts as `Head`; a 405 switches it to `Get` for the rest of that
/// operation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupMethod {
    #[default]
    Head,
    Get,
}

/// Result of a digest lookup
#[derive(Debug, Clone)]
pub struct ManifestHead {
    pub digest: String,
    pub manifest_type: Option<ManifestType>,
    /// Present when the lookup had to GET the full manifest
    pub manifest: Option<Manifest>,
}

#[derive(Clone)]
pub struct ManifestOperations {
    client: RegistryClient,
    output: Logger,
}

impl ManifestOperations {
    pub fn new(client: RegistryClient) -> Self {
        let output = client.logger().clone();
        Self { client, output }
    }

    /// Fetch and decode a manifest, keeping its exact body and headers
    pub async fn get_manifest(&self, repository: &str, reference: &str) -> Result<Manifest> {
        self.output
            .detail(&format!("Fetching manifest {}:{}", repository, reference));

        let response = self
            .client
            .send(manifest_request(Method::GET, repository, reference)?)
            .await
            .context(format!("{}:{}", repository, reference))?;
        let headers = response.headers.clone();
        let body = response.bytes().await?;

        Manifest::from_parts(body, headers).map_err(|e| match e {
            RegistryError::UnsupportedSchemaVersion { found, .. } => RegistryError::UnsupportedSchemaVersion {
                reference: format!("{}:{}", repository, reference),
                found,
            },
            other => other.with_context(format!("{}:{}", repository, reference)),
        })
    }

    /// Resolve `reference` to its canonical digest via `Docker-Content-Digest`.
    ///
    /// A registry answering HEAD with 405 downgrades `method` to GET, so later
    /// lookups sharing the same `method` skip the failing HEAD.
    pub async fn lookup(
        &self,
        repository: &str,
        reference: &str,
        method: &mut LookupMethod,
    ) -> Result<ManifestHead> {
        if *method == LookupMethod::Head {
            match self.head_manifest(repository, reference).await {
                Err(RegistryError::MethodNotSupported { .. }) => {
                    self.output
                        .verbose("Registry rejected manifest HEAD, using GET for the rest of this operation");
                    *method = LookupMethod::Get;
                }
                other => return other,
            }
        }

        let manifest = self.get_manifest(repository, reference).await?;
        let digest = required_digest(manifest.headers(), repository, reference)?;
        Ok(ManifestHead {
            digest,
            manifest_type: ManifestType::from_media_type(&manifest.media_type()),
            manifest: Some(manifest),
        })
    }

    async fn head_manifest(&self, repository: &str, reference: &str) -> Result<ManifestHead> {
        let response = self
            .client
            .send(manifest_request(Method::HEAD, repository, reference)?)
            .await
            .context(format!("{}:{}", repository, reference))?;

        let digest = required_digest(&response.headers, repository, reference)?;
        let manifest_type = response
            .header(CONTENT_TYPE.as_str())
            .and_then(ManifestType::from_media_type);

        Ok(ManifestHead {
            digest,
            manifest_type,
            manifest: None,
        })
    }

    /// Canonical digest of `reference`, or of the platform entry `filter`
    /// selects when the reference is a manifest list.
    ///
    /// Lists are returned whole when `filter` lacks architecture or os, and
    /// as the matching entries when more than one entry matches.
    pub async fn digest(
        &self,
        repository: &str,
        reference: &str,
        filter: &PlatformFilter,
    ) -> Result<DigestResolution> {
        let mut method = LookupMethod::Head;
        let head = self
            .lookup(repository, reference, &mut method)
            .await
            .map_err(|e| e.with_context(filter.describe()))?;

        let manifest = match head.manifest {
            Some(manifest) => manifest,
            None if head.manifest_type.is_some_and(|t| !t.is_list()) => {
                return Ok(DigestResolution::Digest(head.digest));
            }
            None => self.get_manifest(repository, &head.digest).await?,
        };

        match manifest.kind() {
            ManifestKind::List(list) => {
                self.output.detail(&format!(
                    "{}:{} is a manifest list with {} entries",
                    repository,
                    reference,
                    list.manifests.len()
                ));
                list.select(filter, repository, reference)
            }
            ManifestKind::V1(_) | ManifestKind::V2(_) => Ok(DigestResolution::Digest(head.digest)),
        }
    }

    /// Upload `body` verbatim; returns the digest the registry reports
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &str,
        body: Bytes,
        media_type: &str,
    ) -> Result<Option<String>> {
        self.output.detail(&format!(
            "Uploading manifest {}:{} ({}, {} bytes)",
            repository,
            reference,
            media_type,
            body.len()
        ));

        let request = RegistryRequest::put(manifest_path(repository, reference), body)
            .with_header(CONTENT_TYPE, media_type)?;
        let response = self
            .client
            .send(request)
            .await
            .context(format!("{}:{}", repository, reference))?;

        Ok(response.header(DOCKER_CONTENT_DIGEST).map(str::to_string))
    }

    /// Copy `repository:reference` to `new_repository:new_reference` without
    /// re-serializing, so the digest is unchanged
    pub async fn tag(
        &self,
        repository: &str,
        reference: &str,
        new_repository: &str,
        new_reference: &str,
    ) -> Result<Option<String>> {
        let manifest = self.get_manifest(repository, reference).await?;
        if manifest.schema_version() != 2 {
            return Err(RegistryError::UnsupportedSchemaVersion {
                reference: format!("{}:{}", repository, reference),
                found: manifest.schema_version(),
            });
        }

        self.put_manifest(
            new_repository,
            new_reference,
            manifest.body().clone(),
            &manifest.media_type(),
        )
        .await
    }

    /// Delete the manifest stored under `digest`
    pub async fn delete_manifest(&self, repository: &str, digest: &str) -> Result<StatusCode> {
        let response = self
            .client
            .send(RegistryRequest::delete(manifest_path(repository, digest)))
            .await
            .context(format!("{}@{}", repository, digest))?;
        Ok(response.status)
    }
}

pub(crate) fn manifest_path(repository: &str, reference: &str) -> String {
    format!("/v2/{}/manifests/{}", repository, reference)
}

fn manifest_request(method: Method, repository: &str, reference: &str) -> Result<RegistryRequest> {
    RegistryRequest::new(method, manifest_path(repository, reference))
        .with_header(ACCEPT, &ManifestType::accept_header())
}

fn required_digest(headers: &HeaderMap, repository: &str, reference: &str) -> Result<String> {
    headers
        .get(DOCKER_CONTENT_DIGEST)
        .and_then(|v| v.to_str().ok())
        .filter(|digest| !digest.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            RegistryError::MalformedResponse(format!(
                "{}:{}: response has no Docker-Content-Digest header",
                repository, reference
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_request_accepts_all_flavors() {
        let request = manifest_request(Method::HEAD, "library/alpine", "3.19").unwrap();
        assert_eq!(request.path, "/v2/library/alpine/manifests/3.19");

        let accept = request.headers.get(ACCEPT).unwrap().to_str().unwrap();
        let offered: Vec<&str> = accept.split(',').collect();
        assert_eq!(offered, ManifestType::ACCEPTED.to_vec());
    }

    #[test]
    fn test_required_digest() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            required_digest(&headers, "app", "latest"),
            Err(RegistryError::MalformedResponse(_))
        ));

        headers.insert(DOCKER_CONTENT_DIGEST, "sha256:abc".parse().unwrap());
        assert_eq!(required_digest(&headers, "app", "latest").unwrap(), "sha256:abc");
    }

    #[test]
    fn test_lookup_method_defaults_to_head() {
        assert_eq!(LookupMethod::default(), LookupMethod::Head);
    }
}
