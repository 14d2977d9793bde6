//! Error types for the bootstrap pipeline.

use crate::constants::EXIT_FAILURE;
use std::path::PathBuf;

/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a run.
///
/// Every variant is fatal: the pipeline never retries. The binary prints
/// the display form on stderr and exits with [`Error::exit_code`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Invocation Errors
    // =========================================================================
    /// Malformed command line.
    #[error("{0}")]
    Usage(String),

    /// Invalid environment configuration.
    #[error("invalid configuration {key}={value:?}: {reason}")]
    Config {
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to parse image reference.
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidImageReference { reference: String, reason: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Token request rejected or token payload malformed.
    #[error("authentication for '{repository}' failed: {reason}")]
    Auth { repository: String, reason: String },

    /// Manifest list or platform manifest could not be resolved.
    #[error("failed to resolve manifest for '{reference}': {reason}")]
    Resolution { reference: String, reason: String },

    /// Layer blob download failed.
    #[error("failed to fetch blob {digest}{}: {reason}", http_status(.status))]
    Fetch {
        digest: String,
        status: Option<u16>,
        reason: String,
    },

    /// Downloaded blob does not hash to its digest.
    #[error("digest mismatch for blob {expected}: computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    /// Layer or rootfs size exceeded limits.
    #[error("image exceeds size limit: {size} > {limit} bytes")]
    ImageTooLarge { size: u64, limit: u64 },

    // =========================================================================
    // Filesystem Errors
    // =========================================================================
    /// Path traversal attempt detected in a layer archive.
    #[error("path traversal detected in layer {digest}: {path}")]
    PathTraversal { digest: String, path: String },

    /// Archive decode or filesystem write failure.
    #[error("failed to extract layer {digest} at '{path}': {reason}")]
    Extract {
        digest: String,
        path: String,
        reason: String,
    },

    /// Target binary could not be provisioned into the jail.
    #[error("failed to provision {path}: {reason}")]
    Provision { path: PathBuf, reason: String },

    // =========================================================================
    // Launch Errors
    // =========================================================================
    /// Root change, namespace creation, or exec failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation missed its deadline.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit status for this error.
    ///
    /// All bootstrap failures share one status; only a target that actually
    /// ran gets to choose its own.
    pub fn exit_code(&self) -> u8 {
        EXIT_FAILURE
    }
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Failures of the isolation launcher, one per state transition.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// chroot(2) failed, usually for lack of `CAP_SYS_CHROOT`.
    #[error("failed to change root to {root}: {source}")]
    RootChangeFailed {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// chdir("/") after the root change failed.
    #[error("failed to enter new root: {0}")]
    ChdirFailed(#[source] std::io::Error),

    /// Namespace request rejected by the kernel.
    #[error("failed to create {namespace} namespace: {source}")]
    NamespaceFailed {
        namespace: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Process creation or image replacement failed.
    #[error("failed to execute {target}: {source}")]
    SpawnFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// waitpid on the target failed.
    #[error("failed to wait for {target}: {source}")]
    WaitFailed {
        target: String,
        #[source]
        source: std::io::Error,
    },
}
