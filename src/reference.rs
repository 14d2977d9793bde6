//! Image reference parsing.
//!
//! Accepts the short forms people type on a command line:
//!
//! | Input                      | Repository            | Reference     |
//! |----------------------------|-----------------------|---------------|
//! | `alpine`                   | `library/alpine`      | `latest`      |
//! | `alpine:3.19`              | `library/alpine`      | `3.19`        |
//! | `bitnami/redis:7`          | `bitnami/redis`       | `7`           |
//! | `alpine@sha256:ab..`       | `library/alpine`      | `sha256:ab..` |
//!
//! Registry hosts are not part of the reference; the registry comes from
//! [`RunConfig`](crate::config::RunConfig).

use crate::constants::{DEFAULT_NAMESPACE, DEFAULT_TAG, IMAGE_REF_VALID_CHARS, MAX_IMAGE_REF_LEN};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A parsed image reference. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    name: String,
    tag: String,
}

impl ImageReference {
    /// Parses `name[:tag]` or `name@digest`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidImageReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(invalid("empty reference"));
        }
        if input.len() > MAX_IMAGE_REF_LEN {
            return Err(invalid(&format!("exceeds {} bytes", MAX_IMAGE_REF_LEN)));
        }
        if !input.chars().all(|c| IMAGE_REF_VALID_CHARS.contains(c)) {
            return Err(invalid("contains invalid characters"));
        }

        let (name, tag) = if let Some((name, digest)) = input.split_once('@') {
            if !digest.contains(':') {
                return Err(invalid("digest must be <algorithm>:<hex>"));
            }
            (name, digest)
        } else {
            // A colon before the last '/' would be a registry port, which
            // this tool does not accept in references.
            match input.rsplit_once(':') {
                Some((name, tag)) if !tag.contains('/') => (name, tag),
                Some(_) => return Err(invalid("registry hosts are not supported")),
                None => (input, DEFAULT_TAG),
            }
        };

        if name.is_empty() {
            return Err(invalid("missing image name"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if name.contains(':') || name.split('/').any(str::is_empty) {
            return Err(invalid("malformed image name"));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Image name as given (without the default namespace).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag or digest used for the first manifest request.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// True if the reference pins a digest instead of a tag.
    pub fn is_digest(&self) -> bool {
        self.tag.contains(':')
    }

    /// Repository path on the registry, namespaced when needed.
    pub fn repository(&self) -> String {
        if self.name.contains('/') {
            self.name.clone()
        } else {
            format!("{}/{}", DEFAULT_NAMESPACE, self.name)
        }
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_digest() {
            write!(f, "{}@{}", self.name, self.tag)
        } else {
            write!(f, "{}:{}", self.name, self.tag)
        }
    }
}
