// Region domain model
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identity of a monitored region.
///
/// Regions that come from the project list are keyed by the project id so that
/// a reordered refetch keeps telemetry attached to the right project. Regions
/// without an upstream id fall back to their positional id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegionKey {
    Project(String),
    Position(u32),
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKey::Project(id) => write!(f, "project:{}", id),
            RegionKey::Position(id) => write!(f, "region:{}", id),
        }
    }
}

impl FromStr for RegionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("project:") {
            if id.is_empty() {
                return Err("empty project id".to_string());
            }
            return Ok(RegionKey::Project(id.to_string()));
        }
        if let Some(id) = s.strip_prefix("region:") {
            return id
                .parse::<u32>()
                .map(RegionKey::Position)
                .map_err(|e| format!("invalid region id '{}': {}", id, e));
        }
        Err(format!("unrecognized region key '{}'", s))
    }
}

impl Serialize for RegionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: u32,
    pub source_project_id: Option<String>,
    pub name: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: RegionStatus,
    pub coverage_percent: f64,
}

impl Region {
    pub fn key(&self) -> RegionKey {
        match &self.source_project_id {
            Some(project_id) => RegionKey::Project(project_id.clone()),
            None => RegionKey::Position(self.id),
        }
    }
}

/// Parse a `"lat, lng"` coordinate string. Anything unusable maps to `(0.0, 0.0)`.
pub fn parse_coordinates(raw: Option<&str>) -> (f64, f64) {
    let Some(raw) = raw else {
        return (0.0, 0.0);
    };

    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return (0.0, 0.0);
    }

    match (parts[0].parse::<f64>(), parts[1].parse::<f64>()) {
        (Ok(lat), Ok(lng)) if lat.is_finite() && lng.is_finite() => (lat, lng),
        _ => (0.0, 0.0),
    }
}

/// Regions shown when the project list is empty or unreachable.
pub fn fallback_regions() -> Vec<Region> {
    let seed = [
        ("Amazon Basin North", "Brazil", -3.4653, -62.2159, RegionStatus::Critical, 45.2),
        ("Congo Rainforest", "DRC", 0.0, 25.0, RegionStatus::Warning, 78.5),
        ("Borneo Highlands", "Malaysia", 1.5535, 110.3593, RegionStatus::Healthy, 82.1),
        ("Sumatra Forest Reserve", "Indonesia", -0.5897, 101.3431, RegionStatus::Healthy, 88.7),
    ];

    seed.into_iter()
        .enumerate()
        .map(|(idx, (name, country, latitude, longitude, status, coverage_percent))| Region {
            id: idx as u32 + 1,
            source_project_id: None,
            name: name.to_string(),
            country: country.to_string(),
            latitude,
            longitude,
            status,
            coverage_percent,
        })
        .collect()
}
