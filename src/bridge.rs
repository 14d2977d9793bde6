//! Execution bridge: wires the target's standard streams and relays its
//! exit status.

use crate::constants::EXIT_ABNORMAL;
use crate::error::{LaunchError, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus, Stdio};
use tracing::debug;

/// How the target's stdin/stdout/stderr are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Share the launcher's terminal.
    #[default]
    Inherit,
    /// Connect all three to `/dev/null` (non-interactive runs).
    Null,
}

/// Stream handles opened ahead of the root change, while the host's
/// `/dev/null` is still reachable.
#[derive(Debug)]
pub struct StdioHandles {
    null: Option<File>,
}

impl StdioMode {
    /// Opens whatever the mode needs on the host side.
    pub fn open(self) -> io::Result<StdioHandles> {
        let null = match self {
            StdioMode::Inherit => None,
            StdioMode::Null => Some(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open("/dev/null")?,
            ),
        };
        Ok(StdioHandles { null })
    }
}

impl StdioHandles {
    /// Returns `(stdin, stdout, stderr)` for a command.
    pub fn stdio(&self) -> io::Result<(Stdio, Stdio, Stdio)> {
        match &self.null {
            None => Ok((Stdio::inherit(), Stdio::inherit(), Stdio::inherit())),
            Some(file) => Ok((
                Stdio::from(file.try_clone()?),
                Stdio::from(file.try_clone()?),
                Stdio::from(file.try_clone()?),
            )),
        }
    }
}

/// A running target process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    target: String,
}

impl ProcessHandle {
    /// Wraps a spawned child running `target`.
    pub fn from_child(child: Child, target: impl Into<String>) -> Self {
        Self {
            child,
            target: target.into(),
        }
    }

    /// Host PID of the target.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Target path, as given on the command line.
    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Blocks until the target exits and returns the code to exit with.
pub fn run(mut handle: ProcessHandle) -> Result<i32> {
    let status = handle
        .child
        .wait()
        .map_err(|source| LaunchError::WaitFailed {
            target: handle.target.clone(),
            source,
        })?;

    debug!(target = %handle.target, status = %status, "target exited");
    Ok(exit_code_from_status(status))
}

/// The target's own exit code, or 1 when it has none (killed by a signal).
pub fn exit_code_from_status(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => {
            if let Some(signal) = status.signal() {
                debug!(signal, "target terminated by signal");
            }
            EXIT_ABNORMAL
        }
    }
}
