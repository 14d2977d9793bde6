//! # Registry Client
//!
//! Speaks the subset of the Docker Registry HTTP API v2 needed to pull one
//! image for the host platform:
//!
//! ```text
//!   GET <auth>?service=<svc>&scope=repository:<repo>:pull   → {token}
//!   GET <registry>/v2/<repo>/manifests/<tag>                → manifest list
//!   GET <registry>/v2/<repo>/manifests/<digest>             → manifest
//!   GET <registry>/v2/<repo>/blobs/<digest>                 → layer.tar.gz
//! ```
//!
//! ## Manifest Resolution
//!
//! Resolution always goes through the manifest list:
//! 1. Detect the host platform (OS + arch)
//! 2. Find the exactly matching entry in the list
//! 3. Pull the platform-specific manifest by digest
//!
//! If no entry matches, the error lists the available platforms and
//! nothing else is fetched. There is no fallback platform.
//!
//! ## Deadlines
//!
//! Every call takes an explicit `deadline`. The pipeline computes one
//! deadline per pull from [`RunConfig::pull_timeout`], so token, manifests,
//! and all layer downloads share a single budget. Nothing is retried.
//!
//! ## Layer Blobs
//!
//! Blobs are streamed to an anonymous temp file while their sha256 is
//! computed, so a layer never sits in memory and its digest can be checked
//! before a single entry is extracted.
//!
//! [`RunConfig::pull_timeout`]: crate::config::RunConfig::pull_timeout

use crate::config::RunConfig;
use crate::constants::{
    DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE, MAX_ERROR_BODY_LEN,
    MAX_LAYER_SIZE, MAX_MANIFEST_SIZE, OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
};
use crate::error::{Error, Result};
use crate::manifest::{LayerDescriptor, Manifest, ManifestList, TokenResponse, is_list_media_type};
use crate::platform::Platform;
use crate::reference::ImageReference;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::future::Future;
use std::io::{Seek, SeekFrom};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info};

/// Pull-scoped bearer token for one repository.
///
/// Lives in memory for the duration of a run and is never written out.
/// `Debug` does not print the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<redacted, {} bytes>)", self.0.len())
    }
}

/// A downloaded layer, spooled to disk and rewound.
#[derive(Debug)]
pub struct LayerBlob {
    file: File,
    digest: String,
    computed: String,
    size: u64,
}

impl LayerBlob {
    /// Digest the blob was requested by.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// `sha256:<hex>` of the bytes actually received.
    pub fn computed_digest(&self) -> &str {
        &self.computed
    }

    /// Number of compressed bytes received.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checks the received bytes against the requested digest.
    ///
    /// Only sha256 digests can be verified; anything else is a mismatch.
    pub fn verify(&self) -> Result<()> {
        if self.digest != self.computed {
            return Err(Error::DigestMismatch {
                expected: self.digest.clone(),
                computed: self.computed.clone(),
            });
        }
        Ok(())
    }

    /// Gives up the spooled archive for reading.
    pub fn into_reader(self) -> File {
        self.file
    }
}

/// Registry client bound to one registry and one platform.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    registry_url: String,
    auth_url: String,
    auth_service: String,
    platform: Platform,
    pull_timeout: Duration,
}

impl RegistryClient {
    /// Creates a client for the registry named in `config`, matching the
    /// host platform.
    pub fn new(config: &RunConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("jailrun/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(std::io::Error::other)?;

        Ok(Self {
            http,
            registry_url: config.registry_url.clone(),
            auth_url: config.auth_url.clone(),
            auth_service: config.auth_service.clone(),
            platform: Platform::detect(),
            pull_timeout: config.pull_timeout,
        })
    }

    /// Overrides the platform used for manifest selection.
    ///
    /// The CLI never calls this; the selector always comes from the host.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Platform used for manifest selection.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Deadline for a pull starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.pull_timeout
    }

    /// Requests a pull-scoped bearer token for the image's repository.
    pub async fn authenticate(
        &self,
        image: &ImageReference,
        deadline: Instant,
    ) -> Result<AccessToken> {
        let repository = image.repository();
        let scope = format!("repository:{}:pull", repository);
        let auth_err = |reason: String| Error::Auth {
            repository: repository.clone(),
            reason,
        };

        debug!(repository = %repository, "requesting pull token");

        self.within(deadline, || format!("authenticate {}", repository), async {
            let response = self
                .http
                .get(&self.auth_url)
                .query(&[("service", self.auth_service.as_str()), ("scope", scope.as_str())])
                .send()
                .await
                .map_err(|e| auth_err(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = error_body(response).await;
                return Err(auth_err(format!("HTTP {}: {}", status.as_u16(), body)));
            }

            let body = read_capped(response, MAX_MANIFEST_SIZE)
                .await
                .map_err(|e| auth_err(e.to_string()))?;
            let payload: TokenResponse = serde_json::from_slice(&body)
                .map_err(|e| auth_err(format!("malformed token response: {}", e)))?;

            payload
                .into_token()
                .map(AccessToken::new)
                .ok_or_else(|| auth_err("token response carries no token".to_string()))
        })
        .await
    }

    /// Fetches the manifest list for the image's tag and returns the digest
    /// of the entry matching this client's platform.
    pub async fn resolve_platform_manifest(
        &self,
        image: &ImageReference,
        token: &AccessToken,
        deadline: Instant,
    ) -> Result<String> {
        let reference = image.to_string();
        let resolution_err = |reason: String| Error::Resolution {
            reference: reference.clone(),
            reason,
        };

        let url = self.manifest_url(image, image.tag());
        let accept = format!(
            "{}, {}",
            DOCKER_MANIFEST_LIST_MEDIA_TYPE, OCI_IMAGE_INDEX_MEDIA_TYPE
        );

        debug!(url = %url, "fetching manifest list");

        let list = self
            .within(deadline, || format!("fetch manifest list for {}", reference), async {
                let response = self
                    .get_manifest(&url, &accept, token)
                    .await
                    .map_err(|e| resolution_err(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = error_body(response).await;
                    return Err(resolution_err(format!(
                        "manifest list request returned HTTP {}: {}",
                        status.as_u16(),
                        body
                    )));
                }

                if let Some(media_type) = content_type(&response)
                    && is_single_manifest(&media_type)
                {
                    return Err(resolution_err(format!(
                        "tag resolves to a single-platform manifest ({}), not a manifest list",
                        media_type
                    )));
                }

                let body = read_capped(response, MAX_MANIFEST_SIZE)
                    .await
                    .map_err(|e| resolution_err(e.to_string()))?;
                ManifestList::decode(&reference, &body)
            })
            .await?;

        let entry = list.select(&self.platform).ok_or_else(|| {
            resolution_err(format!(
                "no manifest for {}. Available: {}",
                self.platform,
                list.available_platforms().join(", ")
            ))
        })?;

        info!(image = %reference, platform = %self.platform, digest = %entry.digest, "resolved platform manifest");
        Ok(entry.digest.clone())
    }

    /// Fetches a platform-specific manifest by digest (or tag).
    pub async fn fetch_manifest(
        &self,
        image: &ImageReference,
        digest_or_tag: &str,
        token: &AccessToken,
        deadline: Instant,
    ) -> Result<Manifest> {
        let reference = format!("{}@{}", image.name(), digest_or_tag);
        let resolution_err = |reason: String| Error::Resolution {
            reference: reference.clone(),
            reason,
        };

        let url = self.manifest_url(image, digest_or_tag);
        let accept = format!(
            "{}, {}",
            DOCKER_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE
        );

        debug!(url = %url, "fetching manifest");

        let manifest = self
            .within(deadline, || format!("fetch manifest {}", reference), async {
                let response = self
                    .get_manifest(&url, &accept, token)
                    .await
                    .map_err(|e| resolution_err(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = error_body(response).await;
                    return Err(resolution_err(format!(
                        "manifest request returned HTTP {}: {}",
                        status.as_u16(),
                        body
                    )));
                }

                let body = read_capped(response, MAX_MANIFEST_SIZE)
                    .await
                    .map_err(|e| resolution_err(e.to_string()))?;
                Manifest::decode(&reference, &body)
            })
            .await?;

        debug!(image = %reference, layers = manifest.layers.len(), "manifest decoded");
        Ok(manifest)
    }

    /// Downloads one layer blob into an anonymous temp file.
    ///
    /// ## Errors
    ///
    /// - [`Error::ImageTooLarge`]: descriptor or received size over `MAX_LAYER_SIZE`
    /// - [`Error::Fetch`]: transport failure or non-success status (body quoted)
    /// - [`Error::Timeout`]: `deadline` elapsed mid-download
    pub async fn fetch_layer_blob(
        &self,
        image: &ImageReference,
        layer: &LayerDescriptor,
        token: &AccessToken,
        deadline: Instant,
    ) -> Result<LayerBlob> {
        if layer.size > MAX_LAYER_SIZE {
            return Err(Error::ImageTooLarge {
                size: layer.size,
                limit: MAX_LAYER_SIZE,
            });
        }

        let digest = layer.digest.clone();
        let fetch_err = |status: Option<StatusCode>, reason: String| Error::Fetch {
            digest: digest.clone(),
            status: status.map(|s| s.as_u16()),
            reason,
        };

        let url = format!(
            "{}/v2/{}/blobs/{}",
            self.registry_url,
            image.repository(),
            layer.digest
        );

        debug!(digest = %layer.digest, size = layer.size, "pulling layer");

        self.within(deadline, || format!("pull layer {}", digest), async {
            let mut response = self
                .http
                .get(&url)
                .header(AUTHORIZATION, token.bearer())
                .send()
                .await
                .map_err(|e| fetch_err(None, e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = error_body(response).await;
                return Err(fetch_err(Some(status), body));
            }

            let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
            let mut hasher = Sha256::new();
            let mut size = 0u64;

            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| fetch_err(Some(status), e.to_string()))?
            {
                size += chunk.len() as u64;
                if size > MAX_LAYER_SIZE {
                    return Err(Error::ImageTooLarge {
                        size,
                        limit: MAX_LAYER_SIZE,
                    });
                }
                hasher.update(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;

            let mut file = file.into_std().await;
            file.seek(SeekFrom::Start(0))?;

            Ok(LayerBlob {
                file,
                digest: digest.clone(),
                computed: format!("sha256:{}", hex::encode(hasher.finalize())),
                size,
            })
        })
        .await
    }

    /// Authenticates, resolves the platform manifest, and fetches it.
    pub async fn pull(
        &self,
        image: &ImageReference,
        deadline: Instant,
    ) -> Result<(Manifest, AccessToken)> {
        info!(image = %image, platform = %self.platform, "pulling image");

        let token = self.authenticate(image, deadline).await?;
        let digest = self.resolve_platform_manifest(image, &token, deadline).await?;
        let manifest = self.fetch_manifest(image, &digest, &token, deadline).await?;
        Ok((manifest, token))
    }

    fn manifest_url(&self, image: &ImageReference, reference: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url,
            image.repository(),
            reference
        )
    }

    async fn get_manifest(
        &self,
        url: &str,
        accept: &str,
        token: &AccessToken,
    ) -> reqwest::Result<Response> {
        self.http
            .get(url)
            .header(ACCEPT, accept)
            .header(AUTHORIZATION, token.bearer())
            .send()
            .await
    }

    /// Runs `fut` against `deadline`.
    async fn within<T, F>(
        &self,
        deadline: Instant,
        operation: impl FnOnce() -> String,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| Error::Timeout {
                operation: operation(),
                duration: self.pull_timeout,
            })?
    }
}

fn content_type(response: &Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_single_manifest(content_type: &str) -> bool {
    let base = content_type.split(';').next().unwrap_or("").trim();
    !is_list_media_type(base)
        && (base == DOCKER_MANIFEST_MEDIA_TYPE || base == OCI_IMAGE_MANIFEST_MEDIA_TYPE)
}

/// Reads a response body, refusing bodies larger than `limit`.
async fn read_capped(mut response: Response, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(std::io::Error::other)? {
        if body.len() + chunk.len() > limit {
            return Err(std::io::Error::other(format!(
                "response body exceeds {} bytes",
                limit
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Best-effort, truncated response body for diagnostics.
async fn error_body(response: Response) -> String {
    match response.text().await {
        Ok(text) if text.len() > MAX_ERROR_BODY_LEN => {
            let mut end = MAX_ERROR_BODY_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &text[..end])
        }
        Ok(text) if text.trim().is_empty() => "<empty body>".to_string(),
        Ok(text) => text.trim().to_string(),
        Err(e) => format!("<unreadable body: {}>", e),
    }
}
