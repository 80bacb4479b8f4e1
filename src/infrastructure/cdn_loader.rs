// CDN loader - fetches the mapping library's script and stylesheet
use crate::application::library_loader::{LibraryAssets, LibraryLoader};
use crate::infrastructure::config::MapSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct CdnLoader {
    client: reqwest::Client,
    script_url: String,
    style_url: String,
}

impl CdnLoader {
    pub fn new(settings: &MapSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.library_timeout())
            .build()
            .context("Failed to build map library HTTP client")?;
        Ok(Self {
            client,
            script_url: settings.script_url.clone(),
            style_url: settings.style_url.clone(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        if !response.status().is_success() {
            anyhow::bail!("Fetching {} failed with status {}", url, response.status());
        }

        response
            .bytes()
            .await
            .with_context(|| format!("Failed to read {}", url))
    }
}

#[async_trait]
impl LibraryLoader for CdnLoader {
    async fn load(&self) -> Result<LibraryAssets> {
        let (script, style) = tokio::try_join!(self.fetch(&self.script_url), self.fetch(&self.style_url))?;
        tracing::info!(script_bytes = script.len(), style_bytes = style.len(), "Map library loaded");
        Ok(LibraryAssets { script, style })
    }
}
