//! # jailrun
//!
//! **Minimal container runner: registry image → chroot jail → exec**
//!
//! Given an image reference and an absolute executable path, jailrun pulls
//! the image from a Docker Registry v2 endpoint, merges its layers into a
//! private directory, and runs the executable there in new PID and UTS
//! namespaces. The executable's exit code becomes jailrun's exit code.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            jailrun                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  invocation   run <image[:tag]> <abs-path> [args]                │
//! │       │                                                          │
//! │  ┌────▼─────────────── pipeline::prepare (async) ─────────────┐  │
//! │  │ registry    token → manifest list → platform manifest      │  │
//! │  │ assembler   blobs → verify → gunzip → tar → Jail Root      │  │
//! │  │ jail        provision target binary, /dev/null             │  │
//! │  └────┬───────────────────────────────────────────────────────┘  │
//! │       │ async runtime shut down                                  │
//! │  ┌────▼─────────── pipeline::launch_prepared (sync) ──────────┐  │
//! │  │ launcher    chroot → chdir / → unshare(PID, UTS) → spawn    │  │
//! │  │ bridge      wait → exit code (signal → 1)                  │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Security Model
//!
//! jailrun is a teaching-grade runner, not a sandbox:
//!
//! - **Filesystem**: chroot only. No mount namespace, no pivot_root.
//! - **Processes**: PID namespace hides host processes from the target.
//! - **Hostname**: UTS namespace, optional custom hostname.
//! - **Not isolated**: network, IPC, users, cgroups, capabilities.
//!
//! Layer extraction rejects `..` paths and resolves parent directories
//! inside the root, so a hostile image cannot write outside its jail.
//! Layer blobs are verified against their sha256 digest before extraction
//! unless `JAILRUN_VERIFY_DIGESTS=0`.
//!
//! # Privileges
//!
//! chroot, unshare and mknod need root (or `CAP_SYS_CHROOT`,
//! `CAP_SYS_ADMIN`, `CAP_MKNOD`). Pulling and assembly do not.

pub mod assembler;
pub mod bridge;
pub mod config;
pub mod constants;
pub mod error;
pub mod invocation;
pub mod jail;
pub mod launcher;
pub mod manifest;
pub mod pipeline;
pub mod platform;
pub mod reference;
pub mod registry;

// Re-exports
pub use assembler::{JailRoot, LayerExtractor, apply_layer_archive, apply_layers};
pub use bridge::{ProcessHandle, StdioMode};
pub use config::RunConfig;
pub use constants::*;
pub use error::{Error, LaunchError, Result};
pub use invocation::{Command, Invocation};
pub use jail::{Provisioned, ensure_null_device, ensure_runnable};
pub use launcher::{LaunchSpec, Namespace, RootGuard, launch};
pub use manifest::{LayerDescriptor, Manifest, ManifestList};
pub use pipeline::{PreparedJail, launch_prepared, prepare};
pub use platform::{Arch, Os, Platform};
pub use reference::ImageReference;
pub use registry::{AccessToken, LayerBlob, RegistryClient};
