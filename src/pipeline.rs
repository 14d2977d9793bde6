//! The bootstrap pipeline.
//!
//! ```text
//! prepare (async)                          launch_prepared (sync)
//! ─────────────────────────────────────    ─────────────────────────────
//! pull ─► JailRoot ─► apply_layers ─►      RootGuard ─► launch ─► run
//!   ensure_runnable ─► ensure_null_device      ─► restore ─► cleanup
//! ```
//!
//! The two halves are split so the caller can shut the async runtime down
//! in between: launching unshares a PID namespace, after which this
//! process may no longer create threads.

use crate::assembler::{JailRoot, apply_layers};
use crate::bridge;
use crate::config::RunConfig;
use crate::error::{Error, LaunchError, Result};
use crate::invocation::Invocation;
use crate::jail::{self, Provisioned};
use crate::launcher::{self, LaunchSpec, RootGuard};
use crate::registry::RegistryClient;
use std::path::Path;
use tracing::{info, warn};

/// A fully assembled jail, ready to launch.
#[derive(Debug)]
pub struct PreparedJail {
    root: JailRoot,
    spec: LaunchSpec,
    provisioned: Provisioned,
}

impl PreparedJail {
    /// Host path of the assembled root.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// What will be launched inside the root.
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// Whether the target came from the image or the host.
    pub fn provisioned(&self) -> Provisioned {
        self.provisioned
    }
}

/// Pulls the image and builds the jail.
pub async fn prepare(config: &RunConfig, invocation: &Invocation) -> Result<PreparedJail> {
    let client = RegistryClient::new(config)?;
    prepare_with(&client, config, invocation).await
}

/// [`prepare`] with a caller-supplied registry client.
pub async fn prepare_with(
    client: &RegistryClient,
    config: &RunConfig,
    invocation: &Invocation,
) -> Result<PreparedJail> {
    let deadline = client.deadline();
    let image = &invocation.image;

    let (manifest, token) = client.pull(image, deadline).await?;

    let root = JailRoot::create(config.keep_jail)?;
    info!(
        image = %image,
        root = %root.path().display(),
        layers = manifest.layers.len(),
        "assembling jail"
    );

    apply_layers(
        client,
        &manifest,
        image,
        &token,
        root.path(),
        config.verify_digests,
        deadline,
    )
    .await?;

    let provisioned = jail::ensure_runnable(root.path(), &invocation.target)?;
    jail::ensure_null_device(root.path());

    let spec = LaunchSpec::new(&invocation.target, invocation.args.clone())
        .with_hostname(config.hostname.clone());

    Ok(PreparedJail {
        root,
        spec,
        provisioned,
    })
}

/// Runs the target in the prepared jail and returns its exit code.
///
/// Must be called from a single-threaded process.
pub fn launch_prepared(prepared: PreparedJail, config: &RunConfig) -> Result<i32> {
    let PreparedJail { mut root, spec, .. } = prepared;

    let guard = RootGuard::capture()?;
    let result = launcher::launch(root.path(), &spec, config.stdio)
        .map_err(Error::from)
        .and_then(bridge::run);

    let confined = !matches!(
        result,
        Err(Error::Launch(LaunchError::RootChangeFailed { .. }))
    );
    if confined && let Err(e) = guard.restore() {
        // Still inside the jail: a host path removal would miss
        warn!(error = %e, "failed to return to host root");
        root.keep_on_disk();
    }

    result
}
