// Region source trait and project-to-region mapping
use crate::domain::region::{Region, RegionStatus, parse_coordinates};
use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

/// A project as delivered by the upstream project list.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub coordinates: Option<String>,
}

#[async_trait]
pub trait RegionSource: Send + Sync {
    /// Fetch the current project list
    async fn fetch_projects(&self) -> anyhow::Result<Vec<ProjectRecord>>;
}

/// Map up to `max_regions` projects into regions with positional ids starting at 1.
pub fn projects_to_regions<R: Rng + ?Sized>(
    projects: Vec<ProjectRecord>,
    max_regions: usize,
    rng: &mut R,
) -> Vec<Region> {
    projects
        .into_iter()
        .take(max_regions)
        .enumerate()
        .map(|(idx, project)| {
            let (latitude, longitude) = parse_coordinates(project.coordinates.as_deref());
            let coverage = rng.random_range(0.0..30.0) + 60.0 * (1.0 - idx as f64 / 10.0);
            Region {
                id: idx as u32 + 1,
                source_project_id: Some(project.id),
                name: project.name,
                country: project.country.unwrap_or_default(),
                latitude,
                longitude,
                status: RegionStatus::Healthy,
                coverage_percent: coverage.round(),
            }
        })
        .collect()
}
