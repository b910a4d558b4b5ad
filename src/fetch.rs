// SPDX-License-Identifier: MIT
//! Manifest transport.
//!
//! [`ManifestFetcher`] is the seam between the resolver and the network so
//! tests (and air-gapped hosts) can supply an in-memory or filesystem
//! implementation without touching the caching/coalescing logic.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::HostConfig;

/// Fetches the raw manifest document at a URL.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP-backed fetcher used by production hosts.
pub struct HttpManifestFetcher {
    client: reqwest::Client,
}

impl HttpManifestFetcher {
    pub fn new(config: &HostConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(format!("weft/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?
            .text()
            .await
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(body)
    }
}
