//! Image content model
//!
//! Manifests in their four flavors, platform selection over manifest lists,
//! and content digest helpers.

pub mod digest;
pub mod manifest;

pub use digest::{DigestUtils, DigestVerifier};
pub use manifest::{
    DigestResolution, Manifest, ManifestKind, ManifestList, ManifestType, ManifestV1, ManifestV2, Platform,
    PlatformDescriptor, PlatformFilter,
};
