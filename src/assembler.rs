//! # Filesystem Assembler
//!
//! Builds the Jail Root from an image's layers.
//!
//! ## Layer Semantics
//!
//! Layers are applied strictly in manifest order and each entry is
//! recreated at `<root>/<entry path>`, so the last layer to write a path
//! wins:
//!
//! | Entry type     | Action                                                 |
//! |----------------|--------------------------------------------------------|
//! | directory      | create (with parents), apply declared mode             |
//! | regular file   | replace whatever was there, write, apply declared mode |
//! | symlink        | absolute targets rewritten relative to the link's dir  |
//! | hard link      | link to the already-extracted path inside the root     |
//! | `.wh.<name>`   | remove `<name>` from lower layers                      |
//! | `.wh..wh..opq` | empty the directory of lower-layer content             |
//! | anything else  | skipped                                                |
//!
//! ## Symlink Rewriting
//!
//! An absolute target like `/bin/busybox` is meaningless before the root
//! change and points at the host afterwards if left alone. Targets are
//! rewritten as `../` × depth-of-link-directory + target, which resolves
//! identically before and after the chroot.
//!
//! ## Security
//!
//! Extraction happens before confinement, with host paths, so:
//! - entry paths with `..` components are rejected ([`Error::PathTraversal`])
//! - parent directories are resolved inside the root: symlinks planted by a
//!   lower layer are followed as if the root were `/` and can never lead
//!   outside it
//! - total extracted size is bounded by `MAX_ROOTFS_SIZE`
//!
//! Failures are not repaired: a failed layer leaves a partially populated
//! root behind and the error names the layer digest and entry path.

use crate::constants::{
    DOCKER_LAYER_MEDIA_TYPE_GZIP, IMPLICIT_DIR_MODE, JAIL_DIR_PREFIX, MAX_ROOTFS_SIZE,
    OCI_LAYER_MEDIA_TYPE_GZIP, WHITEOUT_OPAQUE, WHITEOUT_PREFIX,
};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::reference::ImageReference;
use crate::registry::{AccessToken, RegistryClient};
use flate2::read::GzDecoder;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::{self, DirBuilder, File, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on symlink hops while resolving a path inside the root.
const MAX_SYMLINK_HOPS: usize = 40;

// =============================================================================
// Jail Root
// =============================================================================

/// The private directory that becomes the target's `/`.
///
/// Uniquely named under the system temp dir. Removed on drop unless the run
/// asked to keep it for inspection.
#[derive(Debug)]
pub struct JailRoot {
    path: PathBuf,
    keep: bool,
}

impl JailRoot {
    /// Creates a fresh Jail Root under the system temp directory.
    pub fn create(keep: bool) -> Result<Self> {
        Self::create_in(std::env::temp_dir(), keep)
    }

    /// Creates a fresh Jail Root under `parent`.
    pub fn create_in(parent: impl AsRef<Path>, keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(JAIL_DIR_PREFIX)
            .disable_cleanup(true)
            .tempdir_in(parent)?;
        let path = dir.path().to_path_buf();

        // The jail's "/" must be traversable by non-root targets.
        fs::set_permissions(&path, Permissions::from_mode(IMPLICIT_DIR_MODE))?;

        debug!(path = %path.display(), "created jail root");
        Ok(Self { path, keep })
    }

    /// Host path of the root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the directory survives the drop.
    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Leaves the directory on disk when dropped.
    pub fn keep_on_disk(&mut self) {
        self.keep = true;
    }
}

impl Drop for JailRoot {
    fn drop(&mut self) {
        if self.keep {
            info!(path = %self.path.display(), "keeping jail root");
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove jail root");
        }
    }
}

// =============================================================================
// Layer Application
// =============================================================================

/// Fetches every layer of `manifest` and merges it into `dest_root`, in
/// manifest order.
///
/// Each blob is fully downloaded (and, if `verify_digests`, checked against
/// its digest) before its first entry is extracted; the next download only
/// starts once the previous layer is fully applied.
pub async fn apply_layers(
    client: &RegistryClient,
    manifest: &Manifest,
    image: &ImageReference,
    token: &AccessToken,
    dest_root: &Path,
    verify_digests: bool,
    deadline: Instant,
) -> Result<()> {
    let mut extractor = LayerExtractor::new(dest_root);
    let total = manifest.layers.len();

    for (index, layer) in manifest.layers.iter().enumerate() {
        if !layer.media_type.is_empty()
            && layer.media_type != DOCKER_LAYER_MEDIA_TYPE_GZIP
            && layer.media_type != OCI_LAYER_MEDIA_TYPE_GZIP
        {
            warn!(
                digest = %layer.digest,
                media_type = %layer.media_type,
                "unexpected layer media type, decoding as tar+gzip"
            );
        }

        let blob = client
            .fetch_layer_blob(image, layer, token, deadline)
            .await?;

        if verify_digests {
            blob.verify()?;
        } else if blob.digest() != blob.computed_digest() {
            warn!(
                digest = %layer.digest,
                computed = %blob.computed_digest(),
                "digest verification disabled, extracting unverified layer"
            );
        }

        let size = blob.size();
        extractor.apply(blob.into_reader(), &layer.digest)?;

        info!(
            layer = index + 1,
            of = total,
            digest = %layer.digest,
            bytes = size,
            "applied layer"
        );
    }

    Ok(())
}

/// Applies a single gzip-compressed layer archive to `dest_root`.
pub fn apply_layer_archive<R: Read>(reader: R, digest: &str, dest_root: &Path) -> Result<()> {
    LayerExtractor::new(dest_root).apply(reader, digest)
}

/// Extracts layer archives into one root, tracking the total size across
/// layers.
#[derive(Debug)]
pub struct LayerExtractor {
    root: PathBuf,
    total_size: u64,
}

impl LayerExtractor {
    /// Creates an extractor writing into `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            total_size: 0,
        }
    }

    /// Bytes of regular-file content written so far.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Decompresses and applies one layer archive.
    pub fn apply<R: Read>(&mut self, reader: R, digest: &str) -> Result<()> {
        let mut archive = Archive::new(GzDecoder::new(reader));
        let entries = archive
            .entries()
            .map_err(|e| extract_err(digest, "<archive>", e))?;

        for entry in entries {
            let mut entry = entry.map_err(|e| extract_err(digest, "<archive>", e))?;

            let raw_path = entry
                .path()
                .map_err(|e| extract_err(digest, "<entry header>", e))?
                .into_owned();
            let entry_path = raw_path.display().to_string();

            let Some(rel) = sanitize_entry_path(&raw_path) else {
                return Err(Error::PathTraversal {
                    digest: digest.to_string(),
                    path: entry_path,
                });
            };
            // "./" itself
            let Some(name) = rel.file_name().map(|n| n.to_os_string()) else {
                continue;
            };

            let parent = resolve_in_root(&self.root, rel.parent().unwrap_or(Path::new("")))
                .map_err(|e| extract_err(digest, &entry_path, e))?;

            if let Some(name) = name.to_str() {
                if name == WHITEOUT_OPAQUE {
                    clear_directory(&parent).map_err(|e| extract_err(digest, &entry_path, e))?;
                    continue;
                }
                if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
                    if matches!(hidden, "" | "." | "..") || hidden.contains('/') {
                        return Err(Error::PathTraversal {
                            digest: digest.to_string(),
                            path: entry_path,
                        });
                    }
                    remove_existing(&parent.join(hidden))
                        .map_err(|e| extract_err(digest, &entry_path, e))?;
                    continue;
                }
            }

            let target = parent.join(&name);
            let entry_type = entry.header().entry_type();
            let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;

            let result = match entry_type {
                EntryType::Directory => make_directory(&parent, &target, mode),
                EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                    self.total_size += entry.size();
                    if self.total_size > MAX_ROOTFS_SIZE {
                        return Err(Error::ImageTooLarge {
                            size: self.total_size,
                            limit: MAX_ROOTFS_SIZE,
                        });
                    }
                    write_file(&mut entry, &parent, &target, mode)
                }
                EntryType::Symlink => match entry.link_name() {
                    Ok(Some(link)) => {
                        let link = link.into_owned();
                        make_symlink(&self.root, &parent, &target, &link)
                    }
                    Ok(None) => Err(io::Error::other("symlink without target")),
                    Err(e) => Err(e),
                },
                EntryType::Link => {
                    let source = match entry.link_name() {
                        Ok(Some(link)) => sanitize_entry_path(&link).ok_or_else(|| {
                            Error::PathTraversal {
                                digest: digest.to_string(),
                                path: link.display().to_string(),
                            }
                        })?,
                        Ok(None) => {
                            let e = io::Error::other("hard link without target");
                            return Err(extract_err(digest, &entry_path, e));
                        }
                        Err(e) => return Err(extract_err(digest, &entry_path, e)),
                    };
                    make_hard_link(&self.root, &parent, &target, &source)
                }
                other => {
                    debug!(path = %entry_path, entry_type = ?other, "skipping unsupported entry");
                    Ok(())
                }
            };

            result.map_err(|e| extract_err(digest, &entry_path, e))?;
        }

        Ok(())
    }
}

// =============================================================================
// Entry Handlers
// =============================================================================

fn make_directory(parent: &Path, target: &Path, mode: u32) -> io::Result<()> {
    create_parents(parent)?;
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            remove_existing(target)?;
            DirBuilder::new().mode(mode).create(target)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            DirBuilder::new().mode(mode).create(target)?;
        }
        Err(e) => return Err(e),
    }
    // DirBuilder's mode is filtered by the umask
    fs::set_permissions(target, Permissions::from_mode(mode))
}

fn write_file<R: Read>(reader: &mut R, parent: &Path, target: &Path, mode: u32) -> io::Result<()> {
    create_parents(parent)?;
    // Unlink rather than truncate: the old path may be a symlink or a hard
    // link shared with another file.
    remove_existing(target)?;

    let mut file = File::create(target)?;
    io::copy(reader, &mut file)?;
    file.set_permissions(Permissions::from_mode(mode))
}

fn make_hard_link(root: &Path, parent: &Path, target: &Path, source: &Path) -> io::Result<()> {
    let Some(source_name) = source.file_name() else {
        return Err(io::Error::other("hard link to the root directory"));
    };
    let source_parent = resolve_in_root(root, source.parent().unwrap_or(Path::new("")))?;

    create_parents(parent)?;
    remove_existing(target)?;
    fs::hard_link(source_parent.join(source_name), target)
}

fn make_symlink(root: &Path, parent: &Path, target: &Path, link: &Path) -> io::Result<()> {
    create_parents(parent)?;
    remove_existing(target)?;

    let depth = parent
        .strip_prefix(root)
        .map(|p| p.components().count())
        .unwrap_or(0);
    let link_target = rewrite_link_target(link, depth);

    symlink(&link_target, target)
}

/// Rewrites an absolute link target relative to a link directory `depth`
/// levels below the root. Relative targets already are relative to the
/// link's own directory and are returned unchanged.
pub fn rewrite_link_target(link: &Path, depth: usize) -> PathBuf {
    if !link.has_root() {
        return link.to_path_buf();
    }

    let mut normalized = PathBuf::new();
    for component in link.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                normalized.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    let mut relative = PathBuf::new();
    for _ in 0..depth {
        relative.push("..");
    }
    relative.push(normalized);

    if relative.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        relative
    }
}

// =============================================================================
// Path Helpers
// =============================================================================

/// Normalizes an archive path to a root-relative one.
///
/// Leading `/` and `.` components are dropped; any `..` rejects the entry.
fn sanitize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// Resolves `rel` inside `root` as if `root` were `/`.
///
/// Symlinks met along the way are followed, with absolute targets restarting
/// at `root` and `..` clamped at `root`. Components that do not exist yet
/// are appended as-is.
pub fn resolve_in_root(root: &Path, rel: &Path) -> io::Result<PathBuf> {
    let mut resolved = PathBuf::new();
    let mut pending: VecDeque<OsString> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect();
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            resolved.pop();
            continue;
        }

        let candidate = resolved.join(&part);
        let host_path = root.join(&candidate);

        match fs::symlink_metadata(&host_path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::other(format!(
                        "too many levels of symbolic links at {}",
                        candidate.display()
                    )));
                }

                let link = fs::read_link(&host_path)?;
                if link.has_root() {
                    resolved = PathBuf::new();
                }
                for component in link.components().rev() {
                    match component {
                        Component::Normal(p) => pending.push_front(p.to_os_string()),
                        Component::ParentDir => pending.push_front(OsString::from("..")),
                        _ => {}
                    }
                }
            }
            Ok(_) => resolved = candidate,
            Err(e) if e.kind() == io::ErrorKind::NotFound => resolved = candidate,
            Err(e) => return Err(e),
        }
    }

    Ok(root.join(resolved))
}

fn create_parents(dir: &Path) -> io::Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(IMPLICIT_DIR_MODE)
        .create(dir)
}

/// Removes whatever is at `path`, if anything. Symlinks are never followed.
fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn clear_directory(dir: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        remove_existing(&entry?.path())?;
    }
    Ok(())
}

fn extract_err(digest: &str, path: &str, e: io::Error) -> Error {
    Error::Extract {
        digest: digest.to_string(),
        path: path.to_string(),
        reason: e.to_string(),
    }
}
