// Open-Meteo client - WeatherLookup for seeding starting temperature and humidity
use crate::application::weather_lookup::{WeatherLookup, WeatherSample};
use crate::infrastructure::config::{WeatherSettings, prepare_url};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current_weather: Option<CurrentWeather>,
    #[serde(default)]
    hourly: Option<Hourly>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Hourly {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    relativehumidity_2m: Vec<Option<f64>>,
}

impl ForecastResponse {
    /// Humidity is the last hourly value, trusted only when the series lines up with its timestamps.
    fn into_sample(self) -> WeatherSample {
        let temperature_c = self.current_weather.and_then(|c| c.temperature);
        let humidity_percent = self.hourly.and_then(|h| {
            if h.time.is_empty() || h.time.len() != h.relativehumidity_2m.len() {
                return None;
            }
            h.relativehumidity_2m.last().copied().flatten()
        });
        WeatherSample {
            temperature_c,
            humidity_percent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    url_template: String,
}

impl OpenMeteoClient {
    pub fn new(settings: &WeatherSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to build weather HTTP client")?;
        Ok(Self {
            client,
            url_template: settings.url_template.clone(),
        })
    }

    fn build_url(&self, latitude: f64, longitude: f64) -> String {
        let vars = HashMap::from([
            ("lat".to_string(), latitude.to_string()),
            ("lon".to_string(), longitude.to_string()),
        ]);
        prepare_url(&self.url_template, &vars)
    }
}

#[async_trait]
impl WeatherLookup for OpenMeteoClient {
    async fn current(&self, latitude: f64, longitude: f64) -> Result<WeatherSample> {
        let url = self.build_url(latitude, longitude);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request to weather service")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Weather request failed with status {}", status);
        }

        let forecast = response
            .json::<ForecastResponse>()
            .await
            .context("Failed to parse weather response")?;
        Ok(forecast.into_sample())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(body: &str) -> WeatherSample {
        serde_json::from_str::<ForecastResponse>(body).unwrap().into_sample()
    }

    #[test]
    fn test_reads_current_temperature_and_last_humidity() {
        let body = r#"{
            "current_weather": {"temperature": 27.4, "windspeed": 3.1},
            "hourly": {"time": ["t0", "t1", "t2"], "relativehumidity_2m": [81, 77, 74]}
        }"#;
        let s = sample(body);
        assert_eq!(s.temperature_c, Some(27.4));
        assert_eq!(s.humidity_percent, Some(74.0));
    }

    #[test]
    fn test_mismatched_hourly_lengths_drop_humidity() {
        let body = r#"{
            "current_weather": {"temperature": 19.0},
            "hourly": {"time": ["t0", "t1"], "relativehumidity_2m": [60]}
        }"#;
        let s = sample(body);
        assert_eq!(s.temperature_c, Some(19.0));
        assert_eq!(s.humidity_percent, None);
    }

    #[test]
    fn test_empty_response_is_empty_sample() {
        assert!(sample("{}").is_empty());
    }

    #[test]
    fn test_url_substitutes_coordinates() {
        let client = OpenMeteoClient::new(&WeatherSettings::default()).unwrap();
        let url = client.build_url(-3.4653, 25.0);
        assert!(url.contains("latitude=-3.4653&longitude=25&"));
        assert!(!url.contains("${"));
    }
}
