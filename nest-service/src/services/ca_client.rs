use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

use crate::services::downstream::{send_and_decode, DownstreamError};
use crate::types::{CaResponse, NebulaCsr};

const SERVICE: &str = "CA service";

/// The certificate authority that actually signs Nebula certificates.
#[async_trait]
pub trait CaClient: Send + Sync {
    /// Sign the public key carried by the CSR.
    async fn sign(&self, csr: &NebulaCsr) -> Result<CaResponse, DownstreamError>;

    /// Generate a keypair for the CSR's hostname and sign its public key.
    async fn generate(&self, csr: &NebulaCsr) -> Result<CaResponse, DownstreamError>;
}

pub struct HttpCaClient {
    base_url: String,
    client: Client,
}

impl HttpCaClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create CA HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_csr(&self, path: &str, csr: &NebulaCsr) -> Result<CaResponse, DownstreamError> {
        let url = format!("{}{}", self.base_url, path);
        info!("Sending Nebula CSR for {} to {}", csr.hostname, url);

        send_and_decode(SERVICE, self.client.post(&url).json(csr)).await
    }
}

#[async_trait]
impl CaClient for HttpCaClient {
    async fn sign(&self, csr: &NebulaCsr) -> Result<CaResponse, DownstreamError> {
        self.post_csr("/ncsr/sign", csr).await
    }

    async fn generate(&self, csr: &NebulaCsr) -> Result<CaResponse, DownstreamError> {
        self.post_csr("/ncsr/generate", csr).await
    }
}
