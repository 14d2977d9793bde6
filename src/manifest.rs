//! Registry wire types.
//!
//! Only the fields the bootstrap needs are modelled; unknown fields are
//! ignored so both the Docker v2 and the OCI spellings decode into the same
//! structs.

use crate::constants::{
    DOCKER_MANIFEST_LIST_MEDIA_TYPE, MAX_LAYERS, OCI_IMAGE_INDEX_MEDIA_TYPE,
};
use crate::error::{Error, Result};
use crate::platform::Platform;
use serde::Deserialize;

/// Multi-platform manifest list (Docker) or image index (OCI).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    /// Present only in lists; a single manifest has `layers` instead.
    pub manifests: Vec<ManifestListEntry>,
}

/// One platform-specific entry of a manifest list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestListEntry {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
    /// Absent for some attestation entries.
    #[serde(default)]
    pub platform: Option<PlatformSpec>,
}

/// `platform` object of a manifest list entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformSpec {
    pub architecture: String,
    pub os: String,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Platform-specific image manifest.
///
/// ## Layer Order
///
/// `layers[0]` is the base layer, `layers[n-1]` the topmost. Extraction
/// applies them in this order, later layers overwriting earlier ones.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub layers: Vec<LayerDescriptor>,
}

/// Metadata about a layer blob.
///
/// The digest addresses the blob on the registry. It is untrusted input:
/// it is only ever used as a URL path segment and, when verification is
/// enabled, compared against the hash of the received bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub digest: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
}

/// Token endpoint response.
///
/// Docker's auth server sends both `token` and `access_token`; other
/// implementations send only one of them.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

impl TokenResponse {
    /// Returns the bearer token, preferring `token`.
    pub fn into_token(self) -> Option<String> {
        self.token
            .filter(|t| !t.is_empty())
            .or(self.access_token.filter(|t| !t.is_empty()))
    }
}

/// Returns true for the two multi-platform media types.
pub fn is_list_media_type(media_type: &str) -> bool {
    // Content-Type may carry parameters
    let base = media_type.split(';').next().unwrap_or("").trim();
    base == DOCKER_MANIFEST_LIST_MEDIA_TYPE || base == OCI_IMAGE_INDEX_MEDIA_TYPE
}

impl ManifestList {
    /// Decodes a manifest list body.
    pub fn decode(reference: &str, body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| Error::Resolution {
            reference: reference.to_string(),
            reason: format!("malformed manifest list: {}", e),
        })
    }

    /// Linear scan for the entry whose os/architecture equal the platform.
    ///
    /// No best-effort matching: an entry without a platform object never
    /// matches, and neither does a different variant of the same family.
    pub fn select(&self, platform: &Platform) -> Option<&ManifestListEntry> {
        self.manifests.iter().find(|m| {
            m.platform
                .as_ref()
                .is_some_and(|p| platform.matches(&p.os, &p.architecture))
        })
    }

    /// `os/arch` strings of every entry, for error messages.
    pub fn available_platforms(&self) -> Vec<String> {
        self.manifests
            .iter()
            .filter_map(|m| m.platform.as_ref())
            .map(|p| match &p.variant {
                Some(v) => format!("{}/{}/{}", p.os, p.architecture, v),
                None => format!("{}/{}", p.os, p.architecture),
            })
            .collect()
    }
}

impl Manifest {
    /// Decodes and validates a platform-specific manifest body.
    pub fn decode(reference: &str, body: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(body).map_err(|e| Error::Resolution {
            reference: reference.to_string(),
            reason: format!("malformed manifest: {}", e),
        })?;

        if manifest.layers.len() > MAX_LAYERS {
            return Err(Error::Resolution {
                reference: reference.to_string(),
                reason: format!("too many layers: {} > {}", manifest.layers.len(), MAX_LAYERS),
            });
        }

        if let Some(pos) = manifest.layers.iter().position(|l| l.digest.is_empty()) {
            return Err(Error::Resolution {
                reference: reference.to_string(),
                reason: format!("layer {} has an empty digest", pos),
            });
        }

        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os};

    const LIST: &str = r#"{
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {"mediaType": "application/vnd.oci.image.manifest.v1+json",
             "digest": "sha256:aaa", "size": 10,
             "platform": {"architecture": "arm", "os": "linux", "variant": "v7"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json",
             "digest": "sha256:unknown", "size": 10,
             "platform": {"architecture": "unknown", "os": "unknown"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json",
             "digest": "sha256:bbb", "size": 10,
             "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}}
        ]
    }"#;

    #[test]
    fn test_select_exact_platform() {
        let list = ManifestList::decode("alpine:latest", LIST.as_bytes()).unwrap();
        let arm64 = Platform {
            os: Os::Linux,
            arch: Arch::Arm64,
        };
        assert_eq!(list.select(&arm64).unwrap().digest, "sha256:bbb");

        let amd64 = Platform {
            os: Os::Linux,
            arch: Arch::Amd64,
        };
        assert!(list.select(&amd64).is_none());
        assert_eq!(list.available_platforms().len(), 3);
    }

    #[test]
    fn test_unsupported_host_skips_attestation_entry() {
        let list = ManifestList::decode("alpine:latest", LIST.as_bytes()).unwrap();
        let host = Platform {
            os: Os::Unknown,
            arch: Arch::Unknown,
        };
        assert!(list.select(&host).is_none());
    }

    #[test]
    fn test_manifest_rejects_empty_digest() {
        let body = br#"{"layers": [{"digest": "", "size": 1, "mediaType": "x"}]}"#;
        assert!(matches!(
            Manifest::decode("alpine:latest", body),
            Err(Error::Resolution { .. })
        ));
    }

    #[test]
    fn test_token_fallback() {
        let t: TokenResponse = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();
        assert_eq!(t.into_token().as_deref(), Some("abc"));

        let t: TokenResponse = serde_json::from_str(r#"{"token": ""}"#).unwrap();
        assert_eq!(t.into_token(), None);
    }

    #[test]
    fn test_list_media_type_with_params() {
        assert!(is_list_media_type(
            "application/vnd.docker.distribution.manifest.list.v2+json; charset=utf-8"
        ));
        assert!(!is_list_media_type("application/vnd.oci.image.manifest.v1+json"));
    }
}
