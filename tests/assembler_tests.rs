//! Tests for layer extraction into a Jail Root.
//!
//! Layers are built in memory as gzip-compressed tarballs and applied to
//! scratch directories.
//!
//! Includes security tests for:
//! - Path traversal rejection
//! - Symlinked parents that point outside the root
//! - Whiteout handling

use flate2::Compression;
use flate2::write::GzEncoder;
use jailrun::{Error, LayerExtractor, apply_layer_archive};
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

enum Item<'a> {
    Dir(&'a str, u32),
    File(&'a str, &'a [u8], u32),
    Symlink(&'a str, &'a str),
    HardLink(&'a str, &'a str),
    Fifo(&'a str),
    /// Entry written with a raw name, bypassing the builder's path checks.
    RawFile(&'a str, &'a [u8]),
}

fn create_layer(items: &[Item]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for item in items {
        let mut header = Header::new_gnu();
        match item {
            Item::Dir(path, mode) => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                header.set_mode(*mode);
                builder.append_data(&mut header, path, io::empty()).unwrap();
            }
            Item::File(path, data, mode) => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(*mode);
                builder.append_data(&mut header, path, *data).unwrap();
            }
            Item::Symlink(path, target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder.append_link(&mut header, path, target).unwrap();
            }
            Item::HardLink(path, target) => {
                header.set_entry_type(EntryType::Link);
                header.set_size(0);
                header.set_mode(0o644);
                builder.append_link(&mut header, path, target).unwrap();
            }
            Item::Fifo(path) => {
                header.set_entry_type(EntryType::Fifo);
                header.set_size(0);
                header.set_mode(0o644);
                builder.append_data(&mut header, path, io::empty()).unwrap();
            }
            Item::RawFile(name, data) => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                let raw = &mut header.as_old_mut().name;
                raw[..name.len()].copy_from_slice(name.as_bytes());
                header.set_cksum();
                builder.append(&header, *data).unwrap();
            }
        }
    }

    builder.into_inner().unwrap().finish().unwrap()
}

fn apply(root: &Path, digest: &str, items: &[Item]) -> jailrun::Result<()> {
    apply_layer_archive(create_layer(items).as_slice(), digest, root)
}

fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o7777
}

// =============================================================================
// Layer Ordering Tests
// =============================================================================

#[test]
fn test_last_layer_wins() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:base",
        &[
            Item::Dir("etc", 0o755),
            Item::File("etc/motd", b"base", 0o644),
            Item::File("etc/hostname", b"base-host", 0o644),
        ],
    )
    .unwrap();
    apply(root, "sha256:top", &[Item::File("etc/motd", b"top", 0o644)]).unwrap();

    assert_eq!(fs::read_to_string(root.join("etc/motd")).unwrap(), "top");
    assert_eq!(
        fs::read_to_string(root.join("etc/hostname")).unwrap(),
        "base-host",
        "untouched files from lower layers should survive"
    );
}

#[test]
fn test_extractor_tracks_total_size() {
    let temp = TempDir::new().unwrap();
    let mut extractor = LayerExtractor::new(temp.path());

    extractor
        .apply(
            create_layer(&[Item::File("a", b"12345", 0o644)]).as_slice(),
            "sha256:one",
        )
        .unwrap();
    extractor
        .apply(
            create_layer(&[Item::File("b", b"678", 0o644)]).as_slice(),
            "sha256:two",
        )
        .unwrap();

    assert_eq!(extractor.total_size(), 8);
}

// =============================================================================
// Entry Type Tests
// =============================================================================

#[test]
fn test_file_permission_bits_applied() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:l",
        &[
            Item::File("bin/tool", b"#!/bin/sh\n", 0o755),
            Item::File("etc/shadow", b"root:*", 0o600),
        ],
    )
    .unwrap();

    assert_eq!(mode_of(&root.join("bin/tool")), 0o755);
    assert_eq!(mode_of(&root.join("etc/shadow")), 0o600);
}

#[test]
fn test_directory_created_with_parents_and_mode() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(root, "sha256:l", &[Item::Dir("var/lib/private", 0o700)]).unwrap();

    assert!(root.join("var/lib").is_dir(), "parents should be created");
    assert_eq!(mode_of(&root.join("var/lib/private")), 0o700);
}

#[test]
fn test_file_without_directory_entries() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(root, "sha256:l", &[Item::File("usr/share/doc/README", b"x", 0o644)]).unwrap();

    assert!(root.join("usr/share/doc/README").is_file());
}

#[test]
fn test_absolute_symlink_rewritten_relative_to_link_dir() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:l",
        &[
            Item::File("bin/busybox", b"ELF", 0o755),
            Item::Symlink("usr/bin/env", "/bin/busybox"),
            Item::Symlink("sh", "/bin/busybox"),
        ],
    )
    .unwrap();

    assert_eq!(
        fs::read_link(root.join("usr/bin/env")).unwrap(),
        PathBuf::from("../../bin/busybox")
    );
    assert_eq!(
        fs::read_link(root.join("sh")).unwrap(),
        PathBuf::from("bin/busybox")
    );
    assert_eq!(
        fs::read(root.join("usr/bin/env")).unwrap(),
        b"ELF",
        "rewritten link should resolve inside the root"
    );
}

#[test]
fn test_relative_symlink_kept() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:l",
        &[
            Item::File("bin/busybox", b"ELF", 0o755),
            Item::Symlink("bin/sh", "busybox"),
        ],
    )
    .unwrap();

    assert_eq!(
        fs::read_link(root.join("bin/sh")).unwrap(),
        PathBuf::from("busybox"),
        "sibling target should resolve against the link's own directory"
    );
    assert_eq!(fs::read(root.join("bin/sh")).unwrap(), b"ELF");
}

#[test]
fn test_file_replaces_symlink_from_lower_layer() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:base",
        &[
            Item::File("bin/busybox", b"ELF", 0o755),
            Item::Symlink("bin/sh", "busybox"),
        ],
    )
    .unwrap();
    apply(root, "sha256:top", &[Item::File("bin/sh", b"dash", 0o755)]).unwrap();

    let meta = fs::symlink_metadata(root.join("bin/sh")).unwrap();
    assert!(meta.file_type().is_file(), "symlink should be replaced");
    assert_eq!(
        fs::read(root.join("bin/busybox")).unwrap(),
        b"ELF",
        "the old link target must not be overwritten"
    );
}

#[test]
fn test_symlinked_parent_followed_inside_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    // merged-usr layout
    apply(
        root,
        "sha256:base",
        &[Item::Dir("usr/lib", 0o755), Item::Symlink("lib", "usr/lib")],
    )
    .unwrap();
    apply(root, "sha256:top", &[Item::File("lib/libc.so", b"libc", 0o755)]).unwrap();

    assert_eq!(fs::read(root.join("usr/lib/libc.so")).unwrap(), b"libc");
}

#[test]
fn test_hard_link() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:l",
        &[
            Item::File("bin/busybox", b"ELF", 0o755),
            Item::HardLink("bin/ls", "bin/busybox"),
        ],
    )
    .unwrap();

    let a = fs::metadata(root.join("bin/busybox")).unwrap();
    let b = fs::metadata(root.join("bin/ls")).unwrap();
    assert_eq!(a.ino(), b.ino(), "hard link should share the inode");
}

#[test]
fn test_unsupported_entry_skipped() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:l",
        &[Item::Fifo("run/pipe"), Item::File("etc/ok", b"ok", 0o644)],
    )
    .unwrap();

    assert!(!root.join("run/pipe").exists());
    assert!(root.join("etc/ok").is_file());
}

// =============================================================================
// Whiteout Tests
// =============================================================================

#[test]
fn test_whiteout_removes_lower_entry() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:base",
        &[
            Item::File("etc/motd", b"hi", 0o644),
            Item::File("opt/tool/bin", b"x", 0o755),
        ],
    )
    .unwrap();
    apply(
        root,
        "sha256:top",
        &[
            Item::File("etc/.wh.motd", b"", 0o644),
            Item::File("opt/.wh.tool", b"", 0o644),
        ],
    )
    .unwrap();

    assert!(!root.join("etc/motd").exists());
    assert!(!root.join("etc/.wh.motd").exists(), "marker is not materialized");
    assert!(!root.join("opt/tool").exists(), "directories are removed too");
}

#[test]
fn test_opaque_whiteout_clears_directory() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(
        root,
        "sha256:base",
        &[
            Item::File("app/old1", b"1", 0o644),
            Item::File("app/sub/old2", b"2", 0o644),
        ],
    )
    .unwrap();
    apply(
        root,
        "sha256:top",
        &[
            Item::Dir("app", 0o755),
            Item::File("app/.wh..wh..opq", b"", 0o644),
            Item::File("app/new", b"n", 0o644),
        ],
    )
    .unwrap();

    let names: Vec<String> = fs::read_dir(root.join("app"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["new".to_string()]);
}

// =============================================================================
// Security Tests
// =============================================================================

#[test]
fn test_path_traversal_rejected() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    fs::create_dir(&root).unwrap();

    let err = apply(&root, "sha256:evil", &[Item::RawFile("../escaped", b"pwned")]).unwrap_err();

    match err {
        Error::PathTraversal { digest, path } => {
            assert_eq!(digest, "sha256:evil");
            assert!(path.contains(".."));
        }
        other => panic!("expected PathTraversal, got {:?}", other),
    }
    assert!(!temp.path().join("escaped").exists());
}

#[test]
fn test_whiteout_of_parent_directory_rejected() {
    let temp = TempDir::new().unwrap();
    let outer = temp.path().join("outer");
    let root = outer.join("jail");
    fs::create_dir_all(root.join("etc")).unwrap();
    fs::write(outer.join("host_file"), b"host").unwrap();
    fs::write(root.join("etc/keep"), b"keep").unwrap();

    for name in [".wh...", "etc/.wh..", ".wh."] {
        let err = apply(&root, "sha256:evil", &[Item::RawFile(name, b"")]).unwrap_err();
        assert!(
            matches!(err, Error::PathTraversal { .. }),
            "{:?} should be rejected, got {:?}",
            name,
            err
        );
    }

    assert_eq!(fs::read(outer.join("host_file")).unwrap(), b"host");
    assert_eq!(fs::read(root.join("etc/keep")).unwrap(), b"keep");
}

#[test]
fn test_absolute_entry_path_lands_in_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    apply(root, "sha256:l", &[Item::RawFile("/etc/issue", b"jail")]).unwrap();

    assert_eq!(fs::read(root.join("etc/issue")).unwrap(), b"jail");
}

#[test]
fn test_symlink_escape_contained() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("root");
    fs::create_dir(&root).unwrap();

    apply(
        &root,
        "sha256:base",
        &[
            Item::Symlink("escape", "../../../../.."),
            Item::Symlink("abs", "/"),
        ],
    )
    .unwrap();
    apply(
        &root,
        "sha256:top",
        &[
            Item::File("escape/pwned", b"x", 0o644),
            Item::File("abs/pwned2", b"y", 0o644),
        ],
    )
    .unwrap();

    assert!(!temp.path().join("pwned").exists(), "write escaped the root");
    assert!(root.join("pwned").is_file(), "escape/ resolves to the root");
    assert!(root.join("pwned2").is_file(), "abs/ resolves to the root");
}

#[test]
fn test_corrupt_archive_names_layer() {
    let temp = TempDir::new().unwrap();

    let err = apply_layer_archive(&b"definitely not gzip"[..], "sha256:bad", temp.path())
        .unwrap_err();

    match err {
        Error::Extract { digest, .. } => assert_eq!(digest, "sha256:bad"),
        other => panic!("expected Extract, got {:?}", other),
    }
}
