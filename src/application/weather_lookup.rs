// Weather lookup trait used to seed starting values
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeatherSample {
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
}

impl WeatherSample {
    pub fn is_empty(&self) -> bool {
        self.temperature_c.is_none() && self.humidity_percent.is_none()
    }
}

#[async_trait]
pub trait WeatherLookup: Send + Sync {
    /// Current conditions near the given coordinates. Errors mean "no data".
    async fn current(&self, latitude: f64, longitude: f64) -> anyhow::Result<WeatherSample>;
}
