use crate::domain::map::{BaseLayer, TileSource};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub server: ServerSettings,
    pub regions: RegionSettings,
    pub weather: WeatherSettings,
    pub sampling: SamplingSettings,
    pub map: MapSettings,
    pub selection: SelectionSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegionSettings {
    pub source_url: String,
    pub max_regions: usize,
    /// Periodic refetch of the project list; `None` fetches once at startup.
    pub refresh_secs: Option<u64>,
    pub timeout_secs: u64,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            source_url: "http://localhost:3000/api/projects".to_string(),
            max_regions: 5,
            refresh_secs: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherSettings {
    pub url_template: String,
    pub timeout_secs: u64,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            url_template: "https://api.open-meteo.com/v1/forecast?latitude=${lat}&longitude=${lon}&current_weather=true&hourly=relativehumidity_2m&timezone=UTC".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingSettings {
    pub fine_interval_minutes: u64,
    pub window_minutes: u64,
    pub coarse_days: usize,
    pub tick_secs: u64,
    pub coarse_check_secs: u64,
    pub temperature_step: f64,
    pub humidity_step: f64,
    pub soil_moisture_step: f64,
    pub soil_temperature_step: f64,
    pub vegetation_step: f64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            fine_interval_minutes: 15,
            window_minutes: 90,
            coarse_days: 7,
            tick_secs: 5,
            coarse_check_secs: 3600,
            temperature_step: 0.75,
            humidity_step: 1.5,
            soil_moisture_step: 0.75,
            soil_temperature_step: 0.4,
            vegetation_step: 0.01,
        }
    }
}

impl SamplingSettings {
    pub fn fine_interval(&self) -> Duration {
        Duration::from_secs(self.fine_interval_minutes.max(1) * 60)
    }

    /// Number of fine samples shown: `ceil(window / interval)`, at least one.
    pub fn visual_samples(&self) -> usize {
        let interval = self.fine_interval_minutes.max(1);
        self.window_minutes.div_ceil(interval).max(1) as usize
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn coarse_check(&self) -> Duration {
        Duration::from_secs(self.coarse_check_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapSettings {
    pub script_url: String,
    pub style_url: String,
    pub label_zoom: f64,
    pub min_zoom: f64,
    pub initial_zoom: f64,
    pub max_attempts: u32,
    pub layout_backoff_ms: u64,
    pub construct_backoff_ms: u64,
    pub settle_delay_ms: u64,
    pub base_layer: BaseLayer,
    pub satellite: TileSource,
    pub terrain: TileSource,
    /// Whether the renderer can swap a tile layer's URL in place.
    pub supports_set_url: bool,
    /// Upper bound on one library load; past it the map goes to `Error`.
    pub library_timeout_secs: u64,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            script_url: "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js".to_string(),
            style_url: "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css".to_string(),
            label_zoom: 7.0,
            min_zoom: 5.0,
            initial_zoom: 5.0,
            max_attempts: 6,
            layout_backoff_ms: 200,
            construct_backoff_ms: 300,
            settle_delay_ms: 200,
            base_layer: BaseLayer::Satellite,
            satellite: TileSource {
                url: "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}".to_string(),
                attribution: "Tiles © Esri".to_string(),
            },
            terrain: TileSource {
                url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
                attribution: "&copy; OpenStreetMap contributors".to_string(),
            },
            supports_set_url: true,
            library_timeout_secs: 20,
        }
    }
}

impl MapSettings {
    pub fn tile_source(&self, layer: BaseLayer) -> &TileSource {
        match layer {
            BaseLayer::Satellite => &self.satellite,
            BaseLayer::Terrain => &self.terrain,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn library_timeout(&self) -> Duration {
        Duration::from_secs(self.library_timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SelectionSettings {
    /// Project id to select once it shows up in the region list (deep link).
    pub project_hint: Option<String>,
}

pub fn load_monitor_config() -> anyhow::Result<MonitorConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/monitor").required(false))
        .add_source(
            config::Environment::with_prefix("MONITOR")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

/// Replace `${name}` placeholders in a URL template with URL-encoded values.
pub fn prepare_url(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, &urlencoding::encode(value));
    }
    result
}
