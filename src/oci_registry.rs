use crate::config::Config;
use crate::image_reference::ImageReference;
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use reqwest::header::ACCEPT;
use reqwest::{Certificate, Client, StatusCode};
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use tracing::{debug, info, warn};

static MANIFEST_MEDIA_TYPES: &str =
    "application/vnd.docker.distribution.manifest.v2+json, application/vnd.oci.image.manifest.v1+json";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("registry {registry} returned error status {status} for {url}")]
    Status {
        registry: String,
        url: String,
        status: StatusCode,
    },
    #[error("failed to decode manifest returned by {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("manifest returned by {url} does not contain config.digest")]
    MissingDigest { url: String },
}

impl RegistryError {
    fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Request { .. } => true,
            RegistryError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            RegistryError::Decode { source, .. } => source.is_timeout(),
            RegistryError::MissingDigest { .. } => false,
        }
    }
}

/// Anything that can map a tagged image reference to its content digest.
pub trait DigestSource {
    async fn fetch_digest(&self, image_reference: &ImageReference)
    -> Result<String, RegistryError>;
}

#[derive(Deserialize)]
struct Manifest {
    config: Option<ManifestConfig>,
}

#[derive(Deserialize)]
struct ManifestConfig {
    digest: Option<String>,
}

pub struct RegistryClient {
    http_client: Client,
    insecure_registries: GlobSet,
    max_attempts: u32,
    initial_backoff: Duration,
}

pub fn create_client(config: &Config) -> Result<RegistryClient> {
    info!("Initializing OCI Registry HTTP client");
    // System certificates are loaded automatically with rustls-tls-native-roots
    let mut client_builder = Client::builder().timeout(config.request_timeout());

    for file_path in &config.tls.ca_certificate_paths {
        let file_content = fs::read(file_path)
            .with_context(|| format!("Failed to read file {}", file_path.display()))?;
        let cert = Certificate::from_pem(&file_content).context("Failed to parse certificate")?;
        client_builder = client_builder.add_root_certificate(cert);
    }

    let mut insecure_registries = GlobSetBuilder::new();
    for pattern in &config.insecure_registries {
        let glob = Glob::new(pattern)
            .with_context(|| format!("Invalid insecure registry pattern {}", pattern))?;
        insecure_registries.add(glob);
    }

    Ok(RegistryClient {
        http_client: client_builder
            .build()
            .context("Failed to build HTTP client")?,
        insecure_registries: insecure_registries
            .build()
            .context("Failed to build insecure registry patterns")?,
        max_attempts: config.max_attempts,
        initial_backoff: config.initial_backoff(),
    })
}

impl RegistryClient {
    fn scheme_for(&self, registry: &str) -> &'static str {
        if self.insecure_registries.is_match(registry) {
            "http"
        } else {
            "https"
        }
    }

    async fn fetch_manifest_digest(
        &self,
        image_reference: &ImageReference,
        url: &str,
    ) -> Result<String, RegistryError> {
        debug!("Fetching docker manifest from URL {}", url);
        let response = self
            .http_client
            .get(url)
            .header(ACCEPT, MANIFEST_MEDIA_TYPES)
            .send()
            .await
            .map_err(|source| RegistryError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(RegistryError::Status {
                registry: image_reference.registry.clone(),
                url: url.to_string(),
                status: response.status(),
            });
        }

        let manifest: Manifest = response
            .json()
            .await
            .map_err(|source| RegistryError::Decode {
                url: url.to_string(),
                source,
            })?;

        manifest
            .config
            .and_then(|config| config.digest)
            .ok_or_else(|| RegistryError::MissingDigest {
                url: url.to_string(),
            })
    }
}

impl DigestSource for RegistryClient {
    async fn fetch_digest(
        &self,
        image_reference: &ImageReference,
    ) -> Result<String, RegistryError> {
        let url = image_reference.manifest_url(self.scheme_for(&image_reference.registry));

        let mut attempt = 1;
        loop {
            match self.fetch_manifest_digest(image_reference, &url).await {
                Ok(digest) => {
                    info!("Found image digest {} for {}", digest, image_reference);
                    return Ok(digest);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self
                        .initial_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        "Attempt {}/{} to fetch manifest for {} failed: {}, retrying in {:?}",
                        attempt, self.max_attempts, image_reference, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
