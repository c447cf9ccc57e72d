//! Reads assets and catalogs from local paths or HTTP(S) URLs.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::instrument;

use seesay_core::answer::MaskBitmap;
use seesay_core::catalog::{load_catalog, parse_catalog_str, Catalog};
use seesay_core::traits::{ImageFetcher, MaskSource};

use crate::error::AssetError;
use crate::mask::decode_mask;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Whether `location` should be fetched over HTTP.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Fetches images and masks for the session, from disk or over HTTP
/// depending on the location.
#[derive(Debug, Clone)]
pub struct AssetClient {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl AssetClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }

    /// Read the bytes at `location`.
    pub async fn read(&self, location: &str) -> Result<Vec<u8>> {
        if is_remote(location) {
            self.get(location).await
        } else {
            tokio::fs::read(location).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    AssetError::NotFound(location.to_string()).into()
                } else {
                    anyhow::Error::new(e).context(format!("failed to read {location}"))
                }
            })
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AssetError::Timeout(self.timeout_secs)
            } else {
                AssetError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status == 404 {
            return Err(AssetError::NotFound(url.to_string()).into());
        }
        if status >= 400 {
            return Err(AssetError::Http {
                status,
                url: url.to_string(),
            }
            .into());
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AssetError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// Load a catalog from a CSV file or URL.
    #[instrument(skip(self))]
    pub async fn load_catalog(&self, source: &str) -> Result<Catalog> {
        let catalog = if is_remote(source) {
            let bytes = self.get(source).await?;
            let content = String::from_utf8(bytes).context("catalog is not valid UTF-8")?;
            parse_catalog_str(&content).with_context(|| format!("failed to parse catalog: {source}"))?
        } else {
            load_catalog(Path::new(source))?
        };
        tracing::info!("loaded {} questions from {source}", catalog.len());
        Ok(catalog)
    }
}

#[async_trait]
impl ImageFetcher for AssetClient {
    async fn fetch(&self, url: &str) -> anyhow::Result<()> {
        let bytes = self.read(url).await?;
        tracing::debug!("fetched {url} ({} bytes)", bytes.len());
        Ok(())
    }
}

#[async_trait]
impl MaskSource for AssetClient {
    async fn load_mask(&self, url: &str) -> anyhow::Result<MaskBitmap> {
        let bytes = self.read(url).await?;
        decode_mask(&bytes).map_err(|e| {
            AssetError::Decode {
                url: url.to_string(),
                message: format!("{e:#}"),
            }
            .into()
        })
    }
}
