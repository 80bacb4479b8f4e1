// Map domain model
use super::region::RegionStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapView {
    pub center: LatLng,
    pub zoom: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSize {
    pub width: u32,
    pub height: u32,
}

impl ContainerSize {
    pub fn is_laid_out(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseLayer {
    #[default]
    Satellite,
    Terrain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSource {
    pub url: String,
    pub attribution: String,
}

/// Pin style keyed by region severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerStyle {
    RedPin,
    OrangePin,
    GreenPin,
}

impl From<RegionStatus> for MarkerStyle {
    fn from(status: RegionStatus) -> Self {
        match status {
            RegionStatus::Critical => MarkerStyle::RedPin,
            RegionStatus::Warning => MarkerStyle::OrangePin,
            RegionStatus::Healthy => MarkerStyle::GreenPin,
        }
    }
}

/// Externally visible state of the map lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MapStatus {
    Unloaded,
    Loading,
    Retrying {
        attempt: u32,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    Ready,
    Error { message: String },
}

impl MapStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, MapStatus::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MapStatus::Error { .. })
    }
}
