//! # Isolation Launcher
//!
//! Confines the launcher process to the Jail Root and starts the target in
//! fresh PID and UTS namespaces.
//!
//! ## Sequence
//!
//! ```text
//! Unconfined ──chroot──► Confined ──unshare──► Isolated ──spawn──► Running
//!     │                      │                     │                  │
//!     │ RootChangeFailed     │ NamespaceFailed     │ SpawnFailed      │
//!     ▼                      ▼                     ▼                  ▼
//!                       (no partial cleanup)                      bridge::run
//! ```
//!
//! 1. `chroot(dest_root)`, then `chdir("/")`.
//! 2. `unshare(2)` each requested namespace in the launcher. A new PID
//!    namespace applies to children created afterwards, so the target
//!    becomes PID 1 of its namespace; the UTS namespace is inherited by it.
//! 3. Spawn the target by its absolute path, now resolved inside the jail.
//!
//! ## Threads
//!
//! After `unshare(CLONE_NEWPID)` the kernel refuses to create threads in
//! the calling process. The launcher therefore runs only after the async
//! runtime used for pulling has been shut down.
//!
//! ## Returning to the Host Root
//!
//! [`RootGuard`] holds a descriptor on the host `/` taken before the root
//! change. Once the target has exited, [`RootGuard::restore`] escapes back
//! via `fchdir` + `chroot(".")` so the Jail Root can be removed.

use crate::bridge::{ProcessHandle, StdioMode};
use crate::error::LaunchError;
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::chroot;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Namespaces the target is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Target sees itself as PID 1 and no host processes.
    Pid,
    /// Private hostname.
    Uts,
}

impl Namespace {
    /// Returns the `clone(2)` flag for this namespace.
    pub fn clone_flag(self) -> libc::c_int {
        match self {
            Namespace::Pid => libc::CLONE_NEWPID,
            Namespace::Uts => libc::CLONE_NEWUTS,
        }
    }

    /// Name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Pid => "pid",
            Namespace::Uts => "uts",
        }
    }
}

/// What to run inside the jail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Absolute path inside the jail.
    pub target: PathBuf,
    pub args: Vec<String>,
    pub namespaces: Vec<Namespace>,
    /// Set inside the UTS namespace; ignored without one.
    pub hostname: Option<String>,
}

impl LaunchSpec {
    /// A spec with the default PID + UTS isolation.
    pub fn new(target: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            target: target.into(),
            args,
            namespaces: vec![Namespace::Pid, Namespace::Uts],
            hostname: None,
        }
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }
}

/// Handle on the host root directory, taken before the root change.
#[derive(Debug)]
pub struct RootGuard {
    old_root: File,
}

impl RootGuard {
    /// Opens the current `/`.
    pub fn capture() -> io::Result<Self> {
        Ok(Self {
            old_root: File::open("/")?,
        })
    }

    /// Moves the process back to the root captured by [`RootGuard::capture`].
    pub fn restore(self) -> io::Result<()> {
        // SAFETY: fchdir on a descriptor owned by self.
        if unsafe { libc::fchdir(self.old_root.as_raw_fd()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        chroot(".")?;
        std::env::set_current_dir("/")?;
        debug!("returned to host root");
        Ok(())
    }
}

/// Confines this process to `dest_root` and spawns the target.
///
/// Must be called from a single-threaded process. Leaves the process
/// confined; restore with a [`RootGuard`] captured beforehand.
pub fn launch(
    dest_root: &Path,
    spec: &LaunchSpec,
    stdio: StdioMode,
) -> Result<ProcessHandle, LaunchError> {
    let target = spec.target.display().to_string();

    // Opened on the host: the jail may lack /dev/null
    let handles = stdio.open().map_err(|source| LaunchError::SpawnFailed {
        target: target.clone(),
        source,
    })?;

    chroot(dest_root).map_err(|source| LaunchError::RootChangeFailed {
        root: dest_root.to_path_buf(),
        source,
    })?;
    std::env::set_current_dir("/").map_err(LaunchError::ChdirFailed)?;
    debug!(root = %dest_root.display(), "changed root");

    for namespace in &spec.namespaces {
        unshare(*namespace)?;
    }
    if let Some(hostname) = &spec.hostname
        && spec.namespaces.contains(&Namespace::Uts)
    {
        set_hostname(hostname).map_err(|source| LaunchError::NamespaceFailed {
            namespace: Namespace::Uts.as_str(),
            source,
        })?;
    }

    let (stdin, stdout, stderr) = handles.stdio().map_err(|source| LaunchError::SpawnFailed {
        target: target.clone(),
        source,
    })?;

    let child = Command::new(&spec.target)
        .args(&spec.args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|source| LaunchError::SpawnFailed {
            target: target.clone(),
            source,
        })?;

    info!(target = %target, pid = child.id(), "started target");
    Ok(ProcessHandle::from_child(child, target))
}

fn unshare(namespace: Namespace) -> Result<(), LaunchError> {
    // SAFETY: unshare only takes flags; no memory is passed.
    if unsafe { libc::unshare(namespace.clone_flag()) } != 0 {
        return Err(LaunchError::NamespaceFailed {
            namespace: namespace.as_str(),
            source: io::Error::last_os_error(),
        });
    }
    debug!(namespace = namespace.as_str(), "unshared namespace");
    Ok(())
}

fn set_hostname(hostname: &str) -> io::Result<()> {
    let name = CString::new(hostname.as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "hostname contains NUL"))?;
    // SAFETY: name outlives the call and len excludes the terminator.
    if unsafe { libc::sethostname(name.as_ptr(), name.as_bytes().len()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespaces() {
        let spec = LaunchSpec::new("/bin/sh", vec!["-c".into(), "true".into()]);
        assert_eq!(spec.namespaces, vec![Namespace::Pid, Namespace::Uts]);
        assert!(spec.hostname.is_none());
    }

    #[test]
    fn test_clone_flags() {
        assert_eq!(Namespace::Pid.clone_flag(), libc::CLONE_NEWPID);
        assert_eq!(Namespace::Uts.clone_flag(), libc::CLONE_NEWUTS);
    }
}
