//! Content digest utilities
//!
//! Digests have the form `algorithm:encoded` (e.g. `sha256:e3b0c4...`) and are
//! the identity of every manifest and blob. They also name the files written
//! by blob downloads, so they are validated before touching the filesystem.

use crate::error::{RegistryError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Utilities for working with digests in registry context
pub struct DigestUtils;

impl DigestUtils {
    /// Compute SHA256 digest from byte data, hex encoded
    pub fn compute_sha256(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Compute full digest (with sha256: prefix) from byte data
    pub fn compute_docker_digest(data: &[u8]) -> String {
        format!("sha256:{}", Self::compute_sha256(data))
    }

    /// Check the OCI `algorithm:encoded` digest grammar
    pub fn is_valid_digest(digest: &str) -> bool {
        static DIGEST: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$").unwrap());

        if !DIGEST.is_match(digest) {
            return false;
        }
        match digest.split_once(':') {
            Some(("sha256", hex_part)) => hex_part.len() == 64 && hex_part.chars().all(|c| c.is_ascii_hexdigit()),
            Some(("sha512", hex_part)) => hex_part.len() == 128 && hex_part.chars().all(|c| c.is_ascii_hexdigit()),
            _ => true,
        }
    }

    pub fn validate(digest: &str) -> Result<()> {
        if Self::is_valid_digest(digest) {
            Ok(())
        } else {
            Err(RegistryError::MalformedResponse(format!("invalid digest '{}'", digest)))
        }
    }

    /// File name a blob is stored under: the digest itself, once validated
    pub fn file_name(digest: &str) -> Result<String> {
        Self::validate(digest)?;
        Ok(digest.to_string())
    }
}

/// Incremental check of streamed content against its expected digest.
///
/// Only `sha256` is verified; other algorithms are accepted as-is.
pub struct DigestVerifier {
    expected: String,
    hasher: Sha256,
}

impl DigestVerifier {
    /// `None` when the digest uses an algorithm we do not verify
    pub fn for_digest(expected: &str) -> Option<Self> {
        expected.strip_prefix("sha256:").map(|hex_part| Self {
            expected: hex_part.to_ascii_lowercase(),
            hasher: Sha256::new(),
        })
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> Result<()> {
        let actual = hex::encode(self.hasher.finalize());
        if actual == self.expected {
            Ok(())
        } else {
            Err(RegistryError::MalformedResponse(format!(
                "digest mismatch: expected sha256:{}, got sha256:{}",
                self.expected, actual
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_LAYER_DIGEST_FULL: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_compute_docker_digest() {
        let digest = DigestUtils::compute_docker_digest(b"hello world");
        assert_eq!(
            digest,
            "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(DigestUtils::compute_docker_digest(b""), EMPTY_LAYER_DIGEST_FULL);
    }

    #[test]
    fn test_validate_digest() {
        assert!(DigestUtils::is_valid_digest(EMPTY_LAYER_DIGEST_FULL));
        assert!(DigestUtils::is_valid_digest("multihash+base58:QmRZxt2b1FVZPNqd8hsiykDL3TdBDeTSPX9Kv46HmX4Gx8"));
        assert!(!DigestUtils::is_valid_digest("sha256:invalid"));
        assert!(!DigestUtils::is_valid_digest("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"));
        assert!(!DigestUtils::is_valid_digest("sha256:../../etc/passwd"));
    }

    #[test]
    fn test_file_name_rejects_path_traversal() {
        assert!(DigestUtils::file_name("../../escape:abc").is_err());
        assert_eq!(
            DigestUtils::file_name(EMPTY_LAYER_DIGEST_FULL).unwrap(),
            EMPTY_LAYER_DIGEST_FULL
        );
    }

    #[test]
    fn test_verifier() {
        let digest = DigestUtils::compute_docker_digest(b"hello world");
        let mut verifier = DigestVerifier::for_digest(&digest).unwrap();
        verifier.update(b"hello ");
        verifier.update(b"world");
        assert!(verifier.finish().is_ok());

        let mut verifier = DigestVerifier::for_digest(EMPTY_LAYER_DIGEST_FULL).unwrap();
        verifier.update(b"not empty");
        assert!(verifier.finish().is_err());

        assert!(DigestVerifier::for_digest("sha512:abcd").is_none());
    }
}
