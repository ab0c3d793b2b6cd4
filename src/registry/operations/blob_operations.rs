//! Blob operations for registry client
//!
//! Implements Docker Registry v2 blob operations:
//! - Blob download into memory or streamed to a file (GET /v2/{name}/blobs/{digest})
//! - Blob size lookup (HEAD /v2/{name}/blobs/{digest})
//! - Layer pulls into a digest-addressed directory

use crate::error::{RegistryError, Result, ResultExt};
use crate::image::digest::{DigestUtils, DigestVerifier};
use crate::image::manifest::Manifest;
use crate::logging::Logger;
use crate::registry::client::{RegistryClient, RegistryRequest};
use crate::registry::transport::BodyStream;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// A blob held in memory
#[derive(Debug, Clone)]
pub struct Blob {
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct BlobOperations {
    client: RegistryClient,
    output: Logger,
}

impl BlobOperations {
    pub fn new(client: RegistryClient) -> Self {
        let output = client.logger().clone();
        Self { client, output }
    }

    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<Blob> {
        let response = self
            .client
            .send(RegistryRequest::get(blob_path(repository, digest)))
            .await
            .context(format!("{}@{}", repository, digest))?;
        let headers = response.headers.clone();
        let body = response.bytes().await?;
        Ok(Blob { headers, body })
    }

    /// Stream a blob to `destination`.
    ///
    /// Every call writes its own temporary file next to `destination` and
    /// renames it into place once complete, so `destination` only ever holds
    /// a whole blob. sha256 digests are verified on the way.
    pub async fn fetch_blob_to(&self, repository: &str, digest: &str, destination: &Path) -> Result<PathBuf> {
        let directory = match destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| RegistryError::io(parent, e))?;
                parent.to_path_buf()
            }
            None => PathBuf::from("."),
        };

        let started = Instant::now();
        let response = self
            .client
            .send(RegistryRequest::get(blob_path(repository, digest)))
            .await
            .context(format!("{}@{}", repository, digest))?;

        // Dropping `partial` on any error below removes it.
        let partial = partial_file(&directory, destination)?;
        let written = self
            .write_body(response.into_parts().2, digest, &partial)
            .await
            .map_err(|e| e.with_context(format!("{}@{}", repository, digest)))?;

        partial
            .persist(destination)
            .map_err(|e| RegistryError::io(destination, e.error))?;

        self.output.detail(&format!(
            "Fetched {} ({}) in {}",
            digest,
            self.output.format_size(written),
            self.output.format_duration(started.elapsed())
        ));
        Ok(destination.to_path_buf())
    }

    async fn write_body(
        &self,
        mut body: BodyStream,
        digest: &str,
        partial: &NamedTempFile,
    ) -> Result<u64> {
        let path = partial.path();
        let handle = partial.reopen().map_err(|e| RegistryError::io(path, e))?;
        let mut file = fs::File::from_std(handle);
        let mut verifier = DigestVerifier::for_digest(digest);
        let mut written = 0u64;

        while let Some(chunk) = body.try_next().await? {
            file.write_all(&chunk)
                .await
                .map_err(|e| RegistryError::io(path, e))?;
            if let Some(verifier) = verifier.as_mut() {
                verifier.update(&chunk);
            }
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| RegistryError::io(path, e))?;
        file.sync_all().await.map_err(|e| RegistryError::io(path, e))?;
        drop(file);

        if let Some(verifier) = verifier {
            verifier.finish()?;
        }
        Ok(written)
    }

    /// Size in bytes from the `Content-Length` of a HEAD request
    pub async fn blob_size(&self, repository: &str, digest: &str) -> Result<u64> {
        let response = self
            .client
            .send(RegistryRequest::head(blob_path(repository, digest)))
            .await
            .context(format!("{}@{}", repository, digest))?;

        let length = response.header(CONTENT_LENGTH.as_str()).ok_or_else(|| {
            RegistryError::MalformedResponse(format!("{}@{}: no Content-Length header", repository, digest))
        })?;
        length.trim().parse::<u64>().map_err(|_| {
            RegistryError::MalformedResponse(format!(
                "{}@{}: invalid Content-Length '{}'",
                repository, digest, length
            ))
        })
    }

    /// Download every layer of `manifest` into `directory`, one file per
    /// digest. Layers whose file already exists are not downloaded again.
    ///
    /// Returns the path of every layer file, fetched or skipped.
    pub async fn pull_layers(&self, repository: &str, manifest: &Manifest, directory: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(directory)
            .await
            .map_err(|e| RegistryError::io(directory, e))?;

        let digests = manifest.layer_digests()?;
        let mut layer_files = Vec::with_capacity(digests.len());
        let mut fetched = 0usize;

        for (index, digest) in digests.iter().enumerate() {
            let layer_file = directory.join(DigestUtils::file_name(digest)?);

            if is_file(&layer_file).await {
                self.output.detail(&format!(
                    "Layer {}/{} {} already present, skipping",
                    index + 1,
                    digests.len(),
                    digest
                ));
            } else {
                self.output
                    .step(&format!("Pulling layer {}/{}: {}", index + 1, digests.len(), digest));
                self.fetch_blob_to(repository, digest, &layer_file).await?;
                fetched += 1;
            }
            layer_files.push(layer_file);
        }

        self.output.success(&format!(
            "Pulled {} layers into {} ({} downloaded, {} already present)",
            layer_files.len(),
            directory.display(),
            fetched,
            layer_files.len() - fetched
        ));
        Ok(layer_files)
    }
}

pub(crate) fn blob_path(repository: &str, digest: &str) -> String {
    format!("/v2/{}/blobs/{}", repository, digest)
}

/// Unique hidden temp file in `directory`, named after `destination`
fn partial_file(directory: &Path, destination: &Path) -> Result<NamedTempFile> {
    let mut prefix = OsString::from(".");
    prefix.push(destination.file_name().unwrap_or_default());
    prefix.push(".");
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".partial")
        .tempfile_in(directory)
        .map_err(|e| RegistryError::io(directory, e))
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}
