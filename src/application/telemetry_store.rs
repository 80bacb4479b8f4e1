// Telemetry store - per-region rolling series and sampling cursors
use crate::application::clock::{DAY, bucket_index};
use crate::application::weather_lookup::WeatherSample;
use crate::domain::region::{Region, RegionKey};
use crate::domain::telemetry::{
    Bounds, DEFAULT_HUMIDITY_PERCENT, DEFAULT_TEMPERATURE_C, RollingSeries, SeriesPoint,
    SoilSnapshot, TelemetrySeries, vegetation_seed, walk,
};
use crate::infrastructure::config::SamplingSettings;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeMap;

pub fn fine_label(at: DateTime<Utc>) -> String {
    at.format("%-I:%M %p").to_string()
}

pub fn coarse_label(at: DateTime<Utc>) -> String {
    at.format("%-m/%-d/%Y").to_string()
}

fn step<R: Rng + ?Sized>(rng: &mut R, half_range: f64) -> f64 {
    if half_range > 0.0 {
        rng.random_range(-half_range..=half_range)
    } else {
        0.0
    }
}

pub struct TelemetryStore {
    settings: SamplingSettings,
    series: BTreeMap<RegionKey, TelemetrySeries>,
    /// Shared cursors: every region is committed in the same pass.
    fine_cursor: i64,
    coarse_cursor: i64,
}

impl TelemetryStore {
    /// Cursors start at the current buckets, so the first commit happens on the next boundary.
    pub fn new(settings: SamplingSettings, now: DateTime<Utc>) -> Self {
        let fine_cursor = bucket_index(now, settings.fine_interval());
        let coarse_cursor = bucket_index(now, DAY);
        Self {
            settings,
            series: BTreeMap::new(),
            fine_cursor,
            coarse_cursor,
        }
    }

    pub fn settings(&self) -> &SamplingSettings {
        &self.settings
    }

    pub fn contains(&self, key: &RegionKey) -> bool {
        self.series.contains_key(key)
    }

    pub fn get(&self, key: &RegionKey) -> Option<&TelemetrySeries> {
        self.series.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RegionKey, &TelemetrySeries)> {
        self.series.iter()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn fine_cursor(&self) -> i64 {
        self.fine_cursor
    }

    pub fn coarse_cursor(&self) -> i64 {
        self.coarse_cursor
    }

    /// Create a flat series for a region seen for the first time.
    ///
    /// Returns `false` when the region already has a series; existing history is never replaced.
    pub fn ensure_seeded(&mut self, region: &Region, now: DateTime<Utc>) -> bool {
        let key = region.key();
        if self.series.contains_key(&key) {
            return false;
        }

        let samples = self.settings.visual_samples();
        let interval = chrono::Duration::from_std(self.settings.fine_interval())
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let fine_labels: Vec<String> = (0..samples)
            .map(|i| fine_label(now - interval * (samples - 1 - i) as i32))
            .collect();

        let days = self.settings.coarse_days.max(1);
        let coarse_labels: Vec<String> = (0..days)
            .map(|i| coarse_label(now - chrono::Duration::days((days - 1 - i) as i64)))
            .collect();

        let series = TelemetrySeries {
            temperature: RollingSeries::flat(samples, DEFAULT_TEMPERATURE_C, fine_labels.clone()),
            humidity: RollingSeries::flat(samples, DEFAULT_HUMIDITY_PERCENT, fine_labels),
            vegetation_index: RollingSeries::flat(days, vegetation_seed(region.latitude), coarse_labels),
            soil: SoilSnapshot::default(),
            fine_commits: 0,
            weather_patched: false,
        };

        tracing::debug!(region = %key, samples, days, "Seeded telemetry series");
        self.series.insert(key, series);
        true
    }

    /// Late patch from the weather lookup.
    ///
    /// Each series moves by the gap between the observed value and its seed.
    /// Before any commit that equals a refill; afterwards the simulated history
    /// keeps its shape. A region is patched at most once.
    pub fn apply_weather(&mut self, key: &RegionKey, sample: WeatherSample) -> bool {
        let Some(series) = self.series.get_mut(key) else {
            tracing::warn!(region = %key, "Weather patch for unknown region ignored");
            return false;
        };
        if sample.is_empty() || series.weather_patched {
            return false;
        }

        if let Some(observed) = sample.temperature_c {
            let temperature = Bounds::TEMPERATURE_C.clamp(observed);
            series
                .temperature
                .shift(temperature - DEFAULT_TEMPERATURE_C, Bounds::TEMPERATURE_C);
            let soil_seed = SoilSnapshot::default().temperature_c;
            series.soil.temperature_c =
                Bounds::TEMPERATURE_C.clamp(series.soil.temperature_c + temperature - soil_seed);
        }
        if let Some(observed) = sample.humidity_percent {
            let humidity = Bounds::PERCENT.clamp(observed);
            series.humidity.shift(humidity - DEFAULT_HUMIDITY_PERCENT, Bounds::PERCENT);
        }
        series.weather_patched = true;
        tracing::debug!(region = %key, commits = series.fine_commits, "Weather patch applied");
        true
    }

    /// Append one fine sample to every region if `bucket` is past the cursor.
    pub fn commit_fine<R: Rng + ?Sized>(&mut self, bucket: i64, now: DateTime<Utc>, rng: &mut R) -> bool {
        if bucket <= self.fine_cursor {
            return false;
        }
        self.fine_cursor = bucket;

        let label = fine_label(now);
        let s = &self.settings;
        for series in self.series.values_mut() {
            let previous = series.temperature.latest().unwrap_or(DEFAULT_TEMPERATURE_C);
            let temperature = walk(previous, step(rng, s.temperature_step), Bounds::TEMPERATURE_C);
            series.temperature.push(SeriesPoint::new(temperature, label.clone()));

            let previous = series.humidity.latest().unwrap_or(DEFAULT_HUMIDITY_PERCENT);
            let humidity = walk(previous, step(rng, s.humidity_step), Bounds::PERCENT);
            series.humidity.push(SeriesPoint::new(humidity, label.clone()));

            series.soil.moisture_percent =
                walk(series.soil.moisture_percent, step(rng, s.soil_moisture_step), Bounds::PERCENT);
            series.soil.temperature_c =
                walk(series.soil.temperature_c, step(rng, s.soil_temperature_step), Bounds::TEMPERATURE_C);

            series.fine_commits += 1;
        }
        true
    }

    /// Append one vegetation-index sample to every region if `day` is past the cursor.
    pub fn commit_coarse<R: Rng + ?Sized>(&mut self, day: i64, now: DateTime<Utc>, rng: &mut R) -> bool {
        if day <= self.coarse_cursor {
            return false;
        }
        self.coarse_cursor = day;

        let label = coarse_label(now);
        let half_range = self.settings.vegetation_step;
        for series in self.series.values_mut() {
            let previous = series.vegetation_index.latest().unwrap_or(0.0);
            let value = walk(previous, step(rng, half_range), Bounds::VEGETATION_INDEX);
            series.vegetation_index.push(SeriesPoint::new(value, label.clone()));
        }
        true
    }
}
