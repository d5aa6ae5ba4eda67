use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::services::downstream::{send_and_decode, DownstreamError};
use crate::types::ConfResponse;

const SERVICE: &str = "Configuration service";

/// The service that renders per-host Nebula configuration and knows which
/// hostnames belong to the mesh.
#[async_trait]
pub trait ConfClient: Send + Sync {
    async fn get_config(&self, hostname: &str) -> Result<ConfResponse, DownstreamError>;

    /// Whether `hostname` is one the Configuration service can render.
    async fn is_known_host(&self, hostname: &str) -> Result<bool, DownstreamError>;
}

pub struct HttpConfClient {
    base_url: String,
    client: Client,
    /// Newline-separated hostname list maintained by the Configuration service.
    hostnames_file: PathBuf,
}

impl HttpConfClient {
    pub fn new(base_url: &str, hostnames_file: PathBuf, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create Configuration HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            hostnames_file,
        })
    }
}

#[async_trait]
impl ConfClient for HttpConfClient {
    async fn get_config(&self, hostname: &str) -> Result<ConfResponse, DownstreamError> {
        let url = format!("{}/configs/{}", self.base_url, hostname);
        info!("Requesting Nebula configuration for {} from {}", hostname, url);

        send_and_decode(SERVICE, self.client.get(&url)).await
    }

    async fn is_known_host(&self, hostname: &str) -> Result<bool, DownstreamError> {
        // Re-read on every check: the Configuration service adds hosts at runtime.
        let contents = tokio::fs::read_to_string(&self.hostnames_file)
            .await
            .map_err(|e| DownstreamError::Unavailable {
                service: SERVICE,
                detail: format!("cannot read {:?}: {}", self.hostnames_file, e),
            })?;

        let known = contents.lines().any(|line| line.trim() == hostname);
        debug!("Hostname {} known to Configuration service: {}", hostname, known);
        Ok(known)
    }
}
