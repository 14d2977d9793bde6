//! Tests for jail construction: provisioning the target binary and the
//! null device.

use jailrun::{Error, Provisioned, ensure_null_device, ensure_runnable};
use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;
use tempfile::TempDir;

/// A binary every Linux host has.
const HOST_BINARY: &str = "/bin/sh";

fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o7777
}

// =============================================================================
// ensure_runnable Tests
// =============================================================================

#[test]
fn test_absent_binary_copied_from_host() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    let provisioned = ensure_runnable(root, Path::new(HOST_BINARY)).unwrap();

    assert_eq!(provisioned, Provisioned::Host);
    let copied = root.join("bin/sh");
    assert!(copied.is_file(), "binary should exist inside the root");
    assert_eq!(mode_of(&copied), 0o755, "provisioned binary must be executable");
    assert_eq!(
        fs::read(&copied).unwrap(),
        fs::read(HOST_BINARY).unwrap(),
        "contents should match the host binary"
    );
}

#[test]
fn test_image_binary_left_untouched() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("bin/sh"), b"image shell").unwrap();
    fs::set_permissions(root.join("bin/sh"), fs::Permissions::from_mode(0o700)).unwrap();

    let provisioned = ensure_runnable(root, Path::new(HOST_BINARY)).unwrap();

    assert_eq!(provisioned, Provisioned::Image);
    assert_eq!(fs::read(root.join("bin/sh")).unwrap(), b"image shell");
    assert_eq!(mode_of(&root.join("bin/sh")), 0o700, "mode must not change");
}

#[test]
fn test_symlink_resolving_in_root_counts_as_present() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::write(root.join("bin/busybox"), b"busybox").unwrap();
    symlink("busybox", root.join("bin/sh")).unwrap();

    let provisioned = ensure_runnable(root, Path::new(HOST_BINARY)).unwrap();

    assert_eq!(provisioned, Provisioned::Image);
    assert!(
        fs::symlink_metadata(root.join("bin/sh"))
            .unwrap()
            .file_type()
            .is_symlink()
    );
}

#[test]
fn test_dangling_symlink_replaced() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("bin")).unwrap();
    symlink("missing", root.join("bin/sh")).unwrap();

    let provisioned = ensure_runnable(root, Path::new(HOST_BINARY)).unwrap();

    assert_eq!(provisioned, Provisioned::Host);
    let meta = fs::symlink_metadata(root.join("bin/sh")).unwrap();
    assert!(meta.file_type().is_file(), "dangling link should be replaced");
}

#[test]
fn test_missing_on_host_and_image() {
    let temp = TempDir::new().unwrap();

    let err = ensure_runnable(temp.path(), Path::new("/no/such/jailrun-binary")).unwrap_err();

    match err {
        Error::Provision { path, .. } => {
            assert_eq!(path, Path::new("/no/such/jailrun-binary"));
        }
        other => panic!("expected Provision error, got {:?}", other),
    }
}

#[test]
fn test_relative_target_rejected() {
    let temp = TempDir::new().unwrap();

    let err = ensure_runnable(temp.path(), Path::new("bin/sh")).unwrap_err();
    assert!(matches!(err, Error::Provision { .. }), "got {:?}", err);
}

// =============================================================================
// ensure_null_device Tests
// =============================================================================

#[test]
fn test_existing_null_device_left_alone() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("dev")).unwrap();
    fs::write(root.join("dev/null"), b"placeholder").unwrap();

    assert!(ensure_null_device(root));
    assert_eq!(fs::read(root.join("dev/null")).unwrap(), b"placeholder");
}

#[test]
fn test_null_device_failure_is_not_fatal() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    // Succeeds with CAP_MKNOD, reports false without it; never panics.
    let created = ensure_null_device(root);
    assert!(root.join("dev").is_dir(), "dev directory should exist either way");
    if created {
        let meta = fs::symlink_metadata(root.join("dev/null")).unwrap();
        use std::os::unix::fs::FileTypeExt;
        assert!(meta.file_type().is_char_device());
    }
}
