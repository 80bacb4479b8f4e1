// Project list client - RegionSource over the upstream projects endpoint
use crate::application::region_source::{ProjectRecord, RegionSource};
use crate::infrastructure::config::RegionSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ProjectsResponse {
    #[serde(default)]
    projects: Vec<ProjectRecord>,
}

#[derive(Debug, Clone)]
pub struct ProjectsClient {
    client: reqwest::Client,
    url: String,
}

impl ProjectsClient {
    pub fn new(settings: &RegionSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build project list HTTP client")?;
        Ok(Self {
            client,
            url: settings.source_url.clone(),
        })
    }
}

fn parse_projects(body: &str) -> Result<Vec<ProjectRecord>> {
    let parsed: ProjectsResponse = serde_json::from_str(body).context("Failed to parse project list")?;
    Ok(parsed.projects)
}

#[async_trait]
impl RegionSource for ProjectsClient {
    async fn fetch_projects(&self) -> Result<Vec<ProjectRecord>> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to project list")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Project list request failed with status {}", status);
        }

        let body = response.text().await.context("Failed to read project list body")?;
        let projects = parse_projects(&body)?;
        tracing::debug!(count = projects.len(), "Fetched project list");
        Ok(projects)
    }
}
