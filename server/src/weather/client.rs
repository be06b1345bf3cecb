//! OpenWeatherMap current-weather client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::WeatherConfig;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Please provide a location.")]
    MissingLocation,

    #[error("OPENWEATHER_API_KEY is not set in environment variables.")]
    MissingApiKey,

    #[error("OpenWeatherMap API error: {message}")]
    Upstream { status: u16, message: String },

    #[error("No response received from OpenWeatherMap API within {0:?}")]
    Timeout(Duration),

    #[error("No response received from OpenWeatherMap API: {0}")]
    Transport(String),
}

/// Source of current weather for a named location
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Upstream JSON, passed through unchanged
    async fn current(&self, location: &str) -> Result<Value, WeatherError>;
}

pub struct WeatherClient {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    units: String,
    timeout: Duration,
}

impl WeatherClient {
    pub fn new(client: reqwest::Client, config: &WeatherConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            units: config.units.clone(),
            timeout: config.request_timeout,
        }
    }
}

/// `message` field of an upstream error body
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "Unknown error".to_string())
}

#[async_trait]
impl WeatherSource for WeatherClient {
    async fn current(&self, location: &str) -> Result<Value, WeatherError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(WeatherError::MissingLocation);
        }
        let api_key = self.api_key.as_deref().ok_or(WeatherError::MissingApiKey)?;

        let start = Instant::now();
        counter!("fieldwatch_weather_requests_total").increment(1);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", location),
                ("appid", api_key),
                ("units", self.units.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WeatherError::Timeout(self.timeout)
                } else {
                    WeatherError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::Transport(e.to_string()))?;

        if !status.is_success() {
            counter!("fieldwatch_weather_failures_total").increment(1);
            warn!("OpenWeatherMap returned {} for '{}'", status, location);
            return Err(WeatherError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }

        histogram!("fieldwatch_weather_request_duration_seconds").record(start.elapsed());
        debug!("Weather fetched for '{}'", location);

        serde_json::from_str(&body).map_err(|e| WeatherError::Upstream {
            status: 502,
            message: format!("invalid JSON: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validation_precedes_network() {
        let config = WeatherConfig {
            base_url: "http://127.0.0.1:1/weather".to_string(),
            ..WeatherConfig::default()
        };
        let client = WeatherClient::new(reqwest::Client::new(), &config);

        assert!(matches!(
            client.current("  ").await,
            Err(WeatherError::MissingLocation)
        ));
        assert!(matches!(
            client.current("Graz").await,
            Err(WeatherError::MissingApiKey)
        ));
    }

    #[test]
    fn test_upstream_message() {
        assert_eq!(
            upstream_message(r#"{"cod":"404","message":"city not found"}"#),
            "city not found"
        );
        assert_eq!(upstream_message("<html>"), "Unknown error");
    }
}
