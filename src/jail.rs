//! Jail construction: the last touches before the root change.
//!
//! After the layers are merged the root may still lack what launching the
//! target needs:
//!
//! - the target itself, when the image does not ship it. The host binary at
//!   the same absolute path is copied in. Statically linked binaries are the
//!   typical case; a dynamically linked one would also need its loader and
//!   libraries, which are not provisioned.
//! - `/dev/null`, which many programs open unconditionally.

use crate::assembler::resolve_in_root;
use crate::constants::{
    DEV_DIR, IMPLICIT_DIR_MODE, NULL_DEVICE_MAJOR, NULL_DEVICE_MINOR, PROVISIONED_BINARY_MODE,
};
use crate::error::{Error, Result};
use std::ffi::CString;
use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the target binary inside the jail came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The image already contained it; left untouched.
    Image,
    /// Copied from the host.
    Host,
}

/// Makes sure `target_path` exists inside `dest_root`.
///
/// An existing file (or a symlink resolving inside the root) is used as-is.
/// Otherwise the host's file at the same absolute path is copied in and made
/// executable. A dangling symlink counts as absent and is replaced.
pub fn ensure_runnable(dest_root: &Path, target_path: &Path) -> Result<Provisioned> {
    let provision_err = |reason: String| Error::Provision {
        path: target_path.to_path_buf(),
        reason,
    };

    let rel = jail_relative(target_path)
        .ok_or_else(|| provision_err("expected an absolute path without '..'".to_string()))?;
    let name = rel
        .file_name()
        .ok_or_else(|| provision_err("path names the root directory".to_string()))?;

    let parent = resolve_in_root(dest_root, rel.parent().unwrap_or(Path::new("")))
        .map_err(|e| provision_err(e.to_string()))?;
    let dest = parent.join(name);

    match fs::symlink_metadata(&dest) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let resolved =
                resolve_in_root(dest_root, &rel).map_err(|e| provision_err(e.to_string()))?;
            if resolved.exists() {
                debug!(path = %target_path.display(), "target provided by image (symlink)");
                return Ok(Provisioned::Image);
            }
            debug!(path = %target_path.display(), "replacing dangling symlink");
            fs::remove_file(&dest).map_err(|e| provision_err(e.to_string()))?;
        }
        Ok(_) => {
            debug!(path = %target_path.display(), "target provided by image");
            return Ok(Provisioned::Image);
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(provision_err(e.to_string())),
    }

    copy_host_binary(target_path, &parent, &dest).map_err(|e| provision_err(e.to_string()))?;

    info!(
        path = %target_path.display(),
        dest = %dest.display(),
        "provisioned host binary into jail"
    );
    Ok(Provisioned::Host)
}

fn copy_host_binary(source: &Path, parent: &Path, dest: &Path) -> io::Result<()> {
    if !source.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "not in the image and no such file on the host",
        ));
    }

    DirBuilder::new()
        .recursive(true)
        .mode(IMPLICIT_DIR_MODE)
        .create(parent)?;
    fs::copy(source, dest)?;
    // The copy carries the host mode; the jail always gets rwxr-xr-x.
    fs::set_permissions(dest, Permissions::from_mode(PROVISIONED_BINARY_MODE))
}

/// Creates `<root>/dev/null` as the null character device, if missing.
///
/// Creating device nodes needs `CAP_MKNOD`, so failures are logged and
/// otherwise ignored. Returns whether the node exists afterwards.
pub fn ensure_null_device(dest_root: &Path) -> bool {
    match try_null_device(dest_root) {
        Ok(created) => {
            if created {
                debug!(root = %dest_root.display(), "created /dev/null");
            }
            true
        }
        Err(e) => {
            warn!(root = %dest_root.display(), error = %e, "could not create /dev/null in jail");
            false
        }
    }
}

fn try_null_device(dest_root: &Path) -> io::Result<bool> {
    let dev = resolve_in_root(dest_root, Path::new(DEV_DIR))?;
    let node = dev.join("null");

    if fs::symlink_metadata(&node).is_ok() {
        return Ok(false);
    }

    DirBuilder::new()
        .recursive(true)
        .mode(IMPLICIT_DIR_MODE)
        .create(&dev)?;

    let c_path = CString::new(node.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of
    // the call.
    let rc = unsafe {
        libc::mknod(
            c_path.as_ptr(),
            libc::S_IFCHR | 0o666,
            libc::makedev(NULL_DEVICE_MAJOR, NULL_DEVICE_MINOR),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // mknod's mode is filtered by the umask
    fs::set_permissions(&node, Permissions::from_mode(0o666))?;
    Ok(true)
}

/// `/usr/bin/env` -> `usr/bin/env`; `None` for relative paths or `..`.
fn jail_relative(path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    let mut rel = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(rel)
}
