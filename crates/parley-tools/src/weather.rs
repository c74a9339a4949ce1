//! Weather lookup tool backed by an Open-Meteo style forecast API.

use crate::registry::{ToolHandler, ToolSpec};
use parley_types::ToolOutcome;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Configuration for the forecast provider. The default provider requires
/// no API key.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WeatherArgs {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: CurrentConditions,
}

#[derive(Debug, Default, Deserialize)]
struct CurrentConditions {
    #[serde(default)]
    temperature_2m: f64,
    #[serde(default)]
    wind_speed_10m: f64,
    #[serde(default)]
    relative_humidity_2m: f64,
    #[serde(default)]
    weather_code: i64,
}

/// Looks up current weather conditions for a coordinate pair.
pub struct WeatherTool {
    config: WeatherConfig,
    client: reqwest::Client,
}

impl WeatherTool {
    pub fn new(config: WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait::async_trait]
impl ToolHandler for WeatherTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "weather",
            "Returns current weather conditions for a latitude/longitude pair",
            json!({
                "type": "object",
                "properties": {
                    "latitude": { "type": "number" },
                    "longitude": { "type": "number" }
                },
                "required": ["latitude", "longitude"]
            }),
        )
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let args: WeatherArgs = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolOutcome::err(format!("invalid arguments: {e}")),
        };
        if !(-90.0..=90.0).contains(&args.latitude) || !(-180.0..=180.0).contains(&args.longitude)
        {
            return ToolOutcome::err("latitude/longitude out of range");
        }

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&[
                ("latitude", args.latitude.to_string()),
                ("longitude", args.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,wind_speed_10m,relative_humidity_2m,weather_code".to_string(),
                ),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => return ToolOutcome::err(format!("weather request failed: {e}")),
        };
        if !response.status().is_success() {
            return ToolOutcome::err(format!(
                "weather provider returned status {}",
                response.status()
            ));
        }

        match response.json::<ForecastResponse>().await {
            Ok(body) => ToolOutcome::ok(json!({
                "latitude": args.latitude,
                "longitude": args.longitude,
                "temperature_c": body.current.temperature_2m,
                "wind_speed_kmh": body.current.wind_speed_10m,
                "relative_humidity": body.current.relative_humidity_2m,
                "weather_code": body.current.weather_code,
            })),
            Err(e) => ToolOutcome::err(format!("weather response was not valid JSON: {e}")),
        }
    }
}
