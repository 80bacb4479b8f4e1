// Telemetry data domain models
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub value: f64,
    pub label: String,
}

impl SeriesPoint {
    pub fn new(value: f64, label: String) -> Self {
        Self { value, label }
    }
}

/// Inclusive physical bounds of a simulated variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const TEMPERATURE_C: Bounds = Bounds { min: -10.0, max: 45.0 };
    pub const PERCENT: Bounds = Bounds { min: 0.0, max: 100.0 };
    pub const VEGETATION_INDEX: Bounds = Bounds { min: -1.0, max: 1.0 };

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Fixed-capacity sliding window; appending to a full window evicts the oldest point.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingSeries {
    capacity: usize,
    points: VecDeque<SeriesPoint>,
}

impl RollingSeries {
    /// A window holding `capacity` copies of `value`, labelled oldest to newest.
    pub fn flat(capacity: usize, value: f64, labels: Vec<String>) -> Self {
        let capacity = capacity.max(1);
        let mut points: VecDeque<SeriesPoint> = labels
            .into_iter()
            .take(capacity)
            .map(|label| SeriesPoint::new(value, label))
            .collect();
        while points.len() < capacity {
            points.push_front(SeriesPoint::new(value, String::new()));
        }
        Self { capacity, points }
    }

    pub fn push(&mut self, point: SeriesPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn latest(&self) -> Option<f64> {
        self.points.back().map(|p| p.value)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn points(&self) -> impl Iterator<Item = &SeriesPoint> {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<SeriesPoint> {
        self.points.iter().cloned().collect()
    }

    /// Replace every value with `value`, keeping labels.
    pub fn fill(&mut self, value: f64) {
        for point in self.points.iter_mut() {
            point.value = value;
        }
    }

    /// Move every value by `delta`, clamped to `bounds`. Labels are kept.
    pub fn shift(&mut self, delta: f64, bounds: Bounds) {
        for point in self.points.iter_mut() {
            point.value = bounds.clamp(point.value + delta);
        }
    }

    pub fn summary(&self) -> SeriesSummary {
        let mut values = self.points.iter().map(|p| p.value);
        let first = values.next().unwrap_or(0.0);
        let (min, max) = values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        SeriesSummary {
            current: self.latest().unwrap_or(0.0),
            min,
            max,
        }
    }

    /// Relative change between the oldest and newest value, in percent.
    pub fn trend_percent(&self) -> f64 {
        let first = self.points.front().map(|p| p.value).unwrap_or(0.0);
        let current = self.latest().unwrap_or(0.0);
        let base = if first == 0.0 { 1.0 } else { first.abs() };
        (current - first) / base * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub current: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoilSnapshot {
    pub moisture_percent: f64,
    pub ph: f64,
    pub organic_percent: f64,
    pub nitrogen_ppm: f64,
    pub phosphorus_ppm: f64,
    pub potassium_ppm: f64,
    pub temperature_c: f64,
}

impl Default for SoilSnapshot {
    fn default() -> Self {
        Self {
            moisture_percent: 68.0,
            ph: 6.5,
            organic_percent: 4.2,
            nitrogen_ppm: 45.0,
            phosphorus_ppm: 22.0,
            potassium_ppm: 156.0,
            temperature_c: 24.0,
        }
    }
}

/// Starting values used when the weather lookup has nothing for a region.
pub const DEFAULT_TEMPERATURE_C: f64 = 26.0;
pub const DEFAULT_HUMIDITY_PERCENT: f64 = 70.0;

/// Vegetation index seed derived from latitude so neighbouring regions differ.
pub fn vegetation_seed(latitude: f64) -> f64 {
    let lat_seed = (latitude % 10.0).abs() / 10.0;
    Bounds::VEGETATION_INDEX.clamp(0.55 + (lat_seed - 0.5) * 0.1)
}

/// One bounded random-walk step: `clamp(previous + offset)` where `offset` is
/// expected to lie in `[-half_range, half_range]`.
pub fn walk(previous: f64, offset: f64, bounds: Bounds) -> f64 {
    bounds.clamp(previous + offset)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySeries {
    pub temperature: RollingSeries,
    pub humidity: RollingSeries,
    pub vegetation_index: RollingSeries,
    pub soil: SoilSnapshot,
    /// Fine commits applied since seeding.
    pub fine_commits: u64,
    pub weather_patched: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryLatest {
    pub temperature_c: f64,
    pub humidity_percent: f64,
    pub vegetation_index: f64,
    pub soil_moisture_percent: f64,
}

impl TelemetrySeries {
    pub fn latest(&self) -> TelemetryLatest {
        TelemetryLatest {
            temperature_c: self.temperature.latest().unwrap_or(DEFAULT_TEMPERATURE_C),
            humidity_percent: self.humidity.latest().unwrap_or(DEFAULT_HUMIDITY_PERCENT),
            vegetation_index: self.vegetation_index.latest().unwrap_or(0.0),
            soil_moisture_percent: self.soil.moisture_percent,
        }
    }
}
