//! Manifest model for Docker v1, Docker v2, Docker manifest lists and OCI
//! manifests/indexes
//!
//! A [`Manifest`] keeps the exact response body and headers next to the typed
//! view so that digest-preserving operations (retagging) can re-upload the
//! original bytes.

use crate::error::{RegistryError, Result};
use crate::image::digest::DigestUtils;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Manifest media types understood by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestType {
    DockerV1,
    DockerV1Signed,
    DockerV2,
    DockerList,
    OciManifest,
    OciIndex,
}

impl ManifestType {
    /// Media types sent in `Accept`, most preferred first
    pub const ACCEPTED: [&'static str; 5] = [
        "application/vnd.docker.distribution.manifest.v2+json",
        "application/vnd.docker.distribution.manifest.list.v2+json",
        "application/vnd.oci.image.manifest.v1+json",
        "application/vnd.oci.image.index.v1+json",
        "application/json",
    ];

    pub fn accept_header() -> String {
        Self::ACCEPTED.join(",")
    }

    /// Recognize a media type, ignoring parameters such as `charset`
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or_default().trim();
        match essence {
            "application/vnd.docker.distribution.manifest.v1+json" => Some(ManifestType::DockerV1),
            "application/vnd.docker.distribution.manifest.v1+prettyjws" => Some(ManifestType::DockerV1Signed),
            "application/vnd.docker.distribution.manifest.v2+json" => Some(ManifestType::DockerV2),
            "application/vnd.docker.distribution.manifest.list.v2+json" => Some(ManifestType::DockerList),
            "application/vnd.oci.image.manifest.v1+json" => Some(ManifestType::OciManifest),
            "application/vnd.oci.image.index.v1+json" => Some(ManifestType::OciIndex),
            _ => None,
        }
    }

    pub fn to_content_type(self) -> &'static str {
        match self {
            ManifestType::DockerV1 => "application/vnd.docker.distribution.manifest.v1+json",
            ManifestType::DockerV1Signed => "application/vnd.docker.distribution.manifest.v1+prettyjws",
            ManifestType::DockerV2 => "application/vnd.docker.distribution.manifest.v2+json",
            ManifestType::DockerList => "application/vnd.docker.distribution.manifest.list.v2+json",
            ManifestType::OciManifest => "application/vnd.oci.image.manifest.v1+json",
            ManifestType::OciIndex => "application/vnd.oci.image.index.v1+json",
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, ManifestType::DockerList | ManifestType::OciIndex)
    }
}

/// Content descriptor of a config blob or layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(rename = "os.features", default, skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
}

/// One entry of a manifest list or OCI index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V1History {
    pub v1_compatibility: String,
}

/// Schema 1 manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV1 {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub fs_layers: Vec<FsLayer>,
    #[serde(default)]
    pub history: Vec<V1History>,
}

/// Schema 2 single-platform manifest (Docker v2 or OCI image manifest)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV2 {
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// Docker manifest list or OCI index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<PlatformDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestKind {
    V1(ManifestV1),
    V2(ManifestV2),
    List(ManifestList),
}

/// A fetched manifest: typed view plus the raw body and response headers
#[derive(Debug, Clone)]
pub struct Manifest {
    kind: ManifestKind,
    body: Bytes,
    headers: HeaderMap,
    json: Value,
}

impl Manifest {
    /// Decode a manifest response.
    ///
    /// The response `Content-Type` decides between list and single manifests
    /// when it names a known type; otherwise the shape of the body does.
    pub fn from_parts(body: Bytes, headers: HeaderMap) -> Result<Self> {
        let json: Value = serde_json::from_slice(&body)
            .map_err(|e| RegistryError::MalformedResponse(format!("manifest is not valid JSON: {}", e)))?;

        let schema_version = json
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .ok_or_else(|| RegistryError::MalformedResponse("manifest has no schemaVersion".to_string()))?;

        let declared = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(ManifestType::from_media_type);
        let is_list = match declared {
            Some(manifest_type) if manifest_type.is_list() => true,
            Some(ManifestType::DockerV2 | ManifestType::OciManifest) => false,
            _ => json.get("manifests").is_some(),
        };

        let kind = match schema_version {
            1 => ManifestKind::V1(decode(&json, "schema 1 manifest")?),
            2 if is_list => ManifestKind::List(decode(&json, "manifest list")?),
            2 => ManifestKind::V2(decode(&json, "schema 2 manifest")?),
            found => {
                return Err(RegistryError::UnsupportedSchemaVersion {
                    reference: "manifest".to_string(),
                    found,
                });
            }
        };

        Ok(Self {
            kind,
            body,
            headers,
            json,
        })
    }

    pub fn kind(&self) -> &ManifestKind {
        &self.kind
    }

    pub fn schema_version(&self) -> u64 {
        match self.kind {
            ManifestKind::V1(_) => 1,
            ManifestKind::V2(_) | ManifestKind::List(_) => 2,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, ManifestKind::List(_))
    }

    /// Exact bytes returned by the registry
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn json(&self) -> &Value {
        &self.json
    }

    /// Media type to upload this manifest with: the response `Content-Type`
    /// when recognized, else the body's `mediaType`, else the kind's default
    pub fn media_type(&self) -> String {
        if let Some(content_type) = self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            if ManifestType::from_media_type(content_type).is_some() {
                return content_type.to_string();
            }
        }
        if let Some(media_type) = self.json.get("mediaType").and_then(Value::as_str) {
            return media_type.to_string();
        }
        match self.kind {
            ManifestKind::V1(_) => ManifestType::DockerV1Signed.to_content_type().to_string(),
            ManifestKind::V2(_) => ManifestType::DockerV2.to_content_type().to_string(),
            ManifestKind::List(_) => ManifestType::DockerList.to_content_type().to_string(),
        }
    }

    /// Canonical digest as reported by the registry
    pub fn docker_content_digest(&self) -> Option<&str> {
        self.headers
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
    }

    /// sha256 of the raw body
    pub fn computed_digest(&self) -> String {
        DigestUtils::compute_docker_digest(&self.body)
    }

    /// Digests of the layer blobs, in manifest order
    pub fn layer_digests(&self) -> Result<Vec<&str>> {
        match &self.kind {
            ManifestKind::V1(v1) => Ok(v1.fs_layers.iter().map(|l| l.blob_sum.as_str()).collect()),
            ManifestKind::V2(v2) => Ok(v2.layers.iter().map(|l| l.digest.as_str()).collect()),
            ManifestKind::List(_) => Err(RegistryError::UnsupportedManifest(
                "a manifest list has no layers; resolve a platform digest first".to_string(),
            )),
        }
    }

    /// Total size of all layers. Only schema 2 manifests record sizes.
    pub fn layer_size_sum(&self) -> Result<u64> {
        match &self.kind {
            ManifestKind::V2(v2) => Ok(v2.layers.iter().map(|l| l.size).sum()),
            ManifestKind::V1(_) => Err(RegistryError::UnsupportedSchemaVersion {
                reference: "manifest".to_string(),
                found: 1,
            }),
            ManifestKind::List(_) => Err(RegistryError::UnsupportedManifest(
                "a manifest list has no layers".to_string(),
            )),
        }
    }

    pub fn platforms(&self) -> Option<&[PlatformDescriptor]> {
        match &self.kind {
            ManifestKind::List(list) => Some(&list.manifests),
            _ => None,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(json: &Value, what: &str) -> Result<T> {
    T::deserialize(json).map_err(|e| RegistryError::MalformedResponse(format!("invalid {}: {}", what, e)))
}

/// Platform criteria for picking an entry of a manifest list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformFilter {
    pub architecture: Option<String>,
    pub os: Option<String>,
    pub variant: Option<String>,
}

impl PlatformFilter {
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: Some(architecture.into()),
            os: Some(os.into()),
            variant: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Filtering only happens when both architecture and os are given
    pub fn is_selective(&self) -> bool {
        self.architecture.is_some() && self.os.is_some()
    }

    pub fn matches(&self, platform: &Platform) -> bool {
        let field = |wanted: &Option<String>, actual: Option<&str>| match wanted {
            Some(wanted) => actual == Some(wanted.as_str()),
            None => true,
        };
        field(&self.architecture, Some(platform.architecture.as_str()))
            && field(&self.os, Some(platform.os.as_str()))
            && field(&self.variant, platform.variant.as_deref())
    }

    /// Human description used in not-found messages
    pub fn describe(&self) -> String {
        let mut text = format!(
            "os {} and architecture {}",
            self.os.as_deref().unwrap_or("-"),
            self.architecture.as_deref().unwrap_or("-")
        );
        if let Some(variant) = &self.variant {
            text.push_str(&format!(" (variant {})", variant));
        }
        text
    }
}

/// Outcome of resolving a reference to a digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DigestResolution {
    /// A single manifest digest
    Digest(String),
    /// Candidate entries of a manifest list: either unfiltered, or several
    /// entries matched the filter
    Descriptors(Vec<PlatformDescriptor>),
}

impl DigestResolution {
    pub fn digest(&self) -> Option<&str> {
        match self {
            DigestResolution::Digest(digest) => Some(digest),
            DigestResolution::Descriptors(_) => None,
        }
    }
}

impl ManifestList {
    /// Apply `filter` to the list entries.
    ///
    /// `image` and `reference` only feed the not-found message.
    pub fn select(&self, filter: &PlatformFilter, image: &str, reference: &str) -> Result<DigestResolution> {
        if !filter.is_selective() {
            return Ok(DigestResolution::Descriptors(self.manifests.clone()));
        }

        let mut matching: Vec<PlatformDescriptor> = self
            .manifests
            .iter()
            .filter(|entry| entry.platform.as_ref().is_some_and(|p| filter.matches(p)))
            .cloned()
            .collect();

        match matching.len() {
            0 => Err(RegistryError::NotFound(format!(
                "no manifest for image {}:{} with {}",
                image,
                reference,
                filter.describe()
            ))),
            1 => Ok(DigestResolution::Digest(matching.remove(0).digest)),
            _ => Ok(DigestResolution::Descriptors(matching)),
        }
    }
}
