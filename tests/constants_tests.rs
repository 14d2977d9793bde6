//! Tests for constants module.
//!
//! Validates registry defaults and that resource limits are sane relative
//! to each other.

use jailrun::*;
use std::time::Duration;

// =============================================================================
// Registry Default Tests
// =============================================================================

#[test]
fn test_docker_hub_defaults() {
    assert_eq!(DEFAULT_AUTH_URL, "https://auth.docker.io/token");
    assert_eq!(DEFAULT_AUTH_SERVICE, "registry.docker.io");
    assert_eq!(DEFAULT_REGISTRY_URL, "https://registry.hub.docker.com");
    assert_eq!(DEFAULT_NAMESPACE, "library");
    assert_eq!(DEFAULT_TAG, "latest");
}

#[test]
fn test_media_types_distinct() {
    let types = [
        DOCKER_MANIFEST_LIST_MEDIA_TYPE,
        DOCKER_MANIFEST_MEDIA_TYPE,
        OCI_IMAGE_INDEX_MEDIA_TYPE,
        OCI_IMAGE_MANIFEST_MEDIA_TYPE,
    ];
    for (i, a) in types.iter().enumerate() {
        for b in &types[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

// =============================================================================
// Size Limit Tests
// =============================================================================

#[test]
fn test_image_ref_length_reasonable() {
    assert!(MAX_IMAGE_REF_LEN >= 256, "image ref limit too restrictive");
    assert!(MAX_IMAGE_REF_LEN <= 1024, "image ref limit too permissive");
}

#[test]
fn test_layer_size_within_rootfs_size() {
    assert!(
        MAX_LAYER_SIZE >= 100 * 1024 * 1024,
        "layer size limit too restrictive for base images"
    );
    assert!(
        MAX_LAYER_SIZE < MAX_ROOTFS_SIZE,
        "a single layer must fit in the rootfs budget"
    );
}

#[test]
fn test_layer_count_bounded() {
    assert!(MAX_LAYERS >= 32, "real images commonly exceed 20 layers");
    assert!(MAX_LAYERS <= 1024);
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[test]
fn test_pull_timeout_default() {
    assert_eq!(IMAGE_PULL_TIMEOUT, Duration::from_secs(300));
}

// =============================================================================
// Jail Layout Tests
// =============================================================================

#[test]
fn test_provisioned_binary_is_executable_by_all() {
    assert_eq!(PROVISIONED_BINARY_MODE & 0o111, 0o111);
    assert_eq!(PROVISIONED_BINARY_MODE & 0o022, 0, "must not be group/world writable");
}

#[test]
fn test_null_device_numbers() {
    assert_eq!((NULL_DEVICE_MAJOR, NULL_DEVICE_MINOR), (1, 3));
}

#[test]
fn test_whiteout_markers() {
    assert!(WHITEOUT_OPAQUE.starts_with(WHITEOUT_PREFIX));
}

#[test]
fn test_signal_exit_code() {
    assert_eq!(EXIT_ABNORMAL, 1);
}
