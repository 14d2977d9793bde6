//! # Bootstrap Constants
//!
//! Registry endpoints, media types, resource limits, and timeouts used by
//! the bootstrap pipeline. These constants are the single source of truth
//! for the bounds enforced while pulling and extracting an image.
//!
//! ## Cross-References
//!
//! - [`crate::registry`]: Uses endpoints, media types, and timeouts
//! - [`crate::assembler`]: Uses size limits for layer extraction
//! - [`crate::reference`]: Uses reference validation patterns
//! - [`crate::config`]: Uses the defaults as fallbacks for env overrides

use std::time::Duration;

// =============================================================================
// Registry Endpoints
// =============================================================================
//
// Defaults target Docker Hub. All three can be overridden through
// `RunConfig` (see `crate::config`), which is how the tests point the
// client at a local mock registry.
// =============================================================================

/// Token endpoint issuing pull-scoped bearer tokens.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";

/// `service` parameter sent to the token endpoint.
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";

/// Registry API base (the `/v2/` prefix is appended per request).
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";

/// Namespace applied to image names without an explicit one.
pub const DEFAULT_NAMESPACE: &str = "library";

/// Tag used when the image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

// =============================================================================
// Media Types
// =============================================================================
//
// Both the Docker and the OCI spellings are sent in `Accept` headers.
// Docker Hub serves whichever one the image was pushed with, and refuses
// to convert between list kinds.
// =============================================================================

/// Docker manifest list (multi-platform).
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Docker image manifest (single platform).
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// OCI Image Index media type (multi-platform manifest list).
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// OCI Image Manifest media type (single-platform image).
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker layer media type (gzip-compressed tar archive).
pub const DOCKER_LAYER_MEDIA_TYPE_GZIP: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// OCI layer media type (gzip-compressed tar archive).
pub const OCI_LAYER_MEDIA_TYPE_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

// =============================================================================
// Size Limits
// =============================================================================
//
// The cumulative worst case is MAX_LAYERS × MAX_LAYER_SIZE compressed, but
// MAX_ROOTFS_SIZE is the real extraction bound.
// =============================================================================

/// Maximum image reference length in bytes.
///
/// **Security**: Rejects absurd references before any of them reaches a URL.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Maximum size of a single compressed layer (512 MiB).
///
/// **Security**: Checked against the descriptor before download and against
/// the bytes actually received while spooling.
pub const MAX_LAYER_SIZE: u64 = 512 * 1024 * 1024;

/// Maximum total extracted rootfs size (4 GiB).
///
/// **Attack Vector**: Compression bombs (small compressed, huge uncompressed).
pub const MAX_ROOTFS_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Maximum number of layers in a manifest.
pub const MAX_LAYERS: usize = 128;

/// Maximum manifest or token response size (1 MiB).
pub const MAX_MANIFEST_SIZE: usize = 1024 * 1024;

/// Maximum number of response body bytes quoted in an error message.
pub const MAX_ERROR_BODY_LEN: usize = 2048;

// =============================================================================
// Timeouts
// =============================================================================

/// Deadline for the whole pull: token, manifests, and every layer (5 minutes).
///
/// **Rationale**: Accommodates large images on slow connections while
/// ensuring a hung registry eventually fails the run.
pub const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(300);

// =============================================================================
// Jail Layout
// =============================================================================

/// Prefix of the generated Jail Root directory name.
pub const JAIL_DIR_PREFIX: &str = "jailrun-";

/// Mode applied to a host binary copied into the jail.
pub const PROVISIONED_BINARY_MODE: u32 = 0o755;

/// Mode of directories created implicitly (parents of archive entries).
pub const IMPLICIT_DIR_MODE: u32 = 0o755;

/// Device directory inside the jail.
pub const DEV_DIR: &str = "dev";

/// Null device major/minor numbers on Linux.
pub const NULL_DEVICE_MAJOR: u32 = 1;
pub const NULL_DEVICE_MINOR: u32 = 3;

/// Whiteout file prefix marking a deletion from lower layers.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Opaque whiteout: the directory's lower-layer contents are hidden.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit status for usage errors and every bootstrap failure.
pub const EXIT_FAILURE: u8 = 1;

/// Exit status relayed when the target terminated without an exit code.
pub const EXIT_ABNORMAL: i32 = 1;

// =============================================================================
// Validation Patterns
// =============================================================================

/// Valid characters for image references.
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`, `/`, `:`, `@`
pub const IMAGE_REF_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_./:@";
