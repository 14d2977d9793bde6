//! Run configuration.
//!
//! Everything about a run that is not part of the command line. Defaults
//! come from [`crate::constants`]; each field can be overridden through a
//! `JAILRUN_*` environment variable:
//!
//! | Variable                    | Field            | Values                   |
//! |-----------------------------|------------------|--------------------------|
//! | `JAILRUN_REGISTRY_URL`      | `registry_url`   | URL                      |
//! | `JAILRUN_AUTH_URL`          | `auth_url`       | URL                      |
//! | `JAILRUN_AUTH_SERVICE`      | `auth_service`   | string                   |
//! | `JAILRUN_PULL_TIMEOUT_SECS` | `pull_timeout`   | seconds, > 0             |
//! | `JAILRUN_KEEP_JAIL`         | `keep_jail`      | bool                     |
//! | `JAILRUN_STDIO`             | `stdio`          | `inherit` \| `null`      |
//! | `JAILRUN_VERIFY_DIGESTS`    | `verify_digests` | bool                     |
//! | `JAILRUN_HOSTNAME`          | `hostname`       | string                   |

use crate::bridge::StdioMode;
use crate::constants::{
    DEFAULT_AUTH_SERVICE, DEFAULT_AUTH_URL, DEFAULT_REGISTRY_URL, IMAGE_PULL_TIMEOUT,
};
use crate::error::{Error, Result};
use std::time::Duration;

pub const ENV_REGISTRY_URL: &str = "JAILRUN_REGISTRY_URL";
pub const ENV_AUTH_URL: &str = "JAILRUN_AUTH_URL";
pub const ENV_AUTH_SERVICE: &str = "JAILRUN_AUTH_SERVICE";
pub const ENV_PULL_TIMEOUT_SECS: &str = "JAILRUN_PULL_TIMEOUT_SECS";
pub const ENV_KEEP_JAIL: &str = "JAILRUN_KEEP_JAIL";
pub const ENV_STDIO: &str = "JAILRUN_STDIO";
pub const ENV_VERIFY_DIGESTS: &str = "JAILRUN_VERIFY_DIGESTS";
pub const ENV_HOSTNAME: &str = "JAILRUN_HOSTNAME";

/// Configuration for one bootstrap-and-exec run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Registry API base URL, without the `/v2` suffix.
    pub registry_url: String,
    /// Bearer token endpoint.
    pub auth_url: String,
    /// `service` parameter for the token endpoint.
    pub auth_service: String,
    /// Budget for the whole pull (token, manifests, layers).
    pub pull_timeout: Duration,
    /// Leave the Jail Root on disk after the run.
    pub keep_jail: bool,
    /// How the target's standard streams are wired.
    pub stdio: StdioMode,
    /// Check each blob's sha256 against its digest before extracting it.
    pub verify_digests: bool,
    /// Hostname set inside the new UTS namespace.
    pub hostname: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            auth_service: DEFAULT_AUTH_SERVICE.to_string(),
            pull_timeout: IMAGE_PULL_TIMEOUT,
            keep_jail: false,
            stdio: StdioMode::Inherit,
            verify_digests: true,
            hostname: None,
        }
    }
}

impl RunConfig {
    /// Builds a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// Unset keys keep their defaults; set-but-invalid keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_REGISTRY_URL) {
            config.registry_url = parse_url(ENV_REGISTRY_URL, url)?;
        }
        if let Some(url) = lookup(ENV_AUTH_URL) {
            config.auth_url = parse_url(ENV_AUTH_URL, url)?;
        }
        if let Some(service) = lookup(ENV_AUTH_SERVICE) {
            config.auth_service = service;
        }
        if let Some(secs) = lookup(ENV_PULL_TIMEOUT_SECS) {
            config.pull_timeout = match secs.trim().parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => return Err(invalid(ENV_PULL_TIMEOUT_SECS, secs, "expected seconds > 0")),
            };
        }
        if let Some(value) = lookup(ENV_KEEP_JAIL) {
            config.keep_jail = parse_bool(ENV_KEEP_JAIL, value)?;
        }
        if let Some(value) = lookup(ENV_STDIO) {
            config.stdio = match value.trim() {
                "inherit" => StdioMode::Inherit,
                "null" => StdioMode::Null,
                _ => return Err(invalid(ENV_STDIO, value, "expected 'inherit' or 'null'")),
            };
        }
        if let Some(value) = lookup(ENV_VERIFY_DIGESTS) {
            config.verify_digests = parse_bool(ENV_VERIFY_DIGESTS, value)?;
        }
        if let Some(hostname) = lookup(ENV_HOSTNAME) {
            // Linux HOST_NAME_MAX
            if hostname.is_empty() || hostname.len() > 64 {
                return Err(invalid(ENV_HOSTNAME, hostname, "expected 1-64 bytes"));
            }
            config.hostname = Some(hostname);
        }

        Ok(config)
    }
}

fn invalid(key: &str, value: String, reason: &str) -> Error {
    Error::Config {
        key: key.to_string(),
        value,
        reason: reason.to_string(),
    }
}

fn parse_bool(key: &str, value: String) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected a boolean")),
    }
}

fn parse_url(key: &str, value: String) -> Result<String> {
    if !(value.starts_with("https://") || value.starts_with("http://")) {
        return Err(invalid(key, value, "expected an http(s) URL"));
    }
    Ok(value.trim_end_matches('/').to_string())
}
