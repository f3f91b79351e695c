//! Current weather via Open-Meteo (geocoding + forecast, no API key).

use crate::error::{ToolError, ToolResult};
use serde::Deserialize;
use std::time::Duration;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current_weather: Option<CurrentWeather>,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
}

/// Conditions right now in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub place: String,
    pub temperature_c: f64,
    pub wind_kmh: f64,
}

impl std::fmt::Display for WeatherReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Weather in {}: {:.0}°C, wind {:.0} km/h.",
            self.place, self.temperature_c, self.wind_kmh
        )
    }
}

pub struct WeatherClient {
    client: reqwest::Client,
    timeout: Duration,
    language: String,
}

impl WeatherClient {
    pub fn new(client: reqwest::Client, timeout: Duration, language: impl Into<String>) -> Self {
        Self {
            client,
            timeout,
            language: language.into(),
        }
    }

    pub async fn current_weather(&self, city: &str) -> ToolResult<WeatherReport> {
        let city = city.trim();
        if city.is_empty() {
            return Err(ToolError::InvalidArguments("a city name is required".into()));
        }

        let geo: GeocodingResponse = self
            .client
            .get(GEOCODING_URL)
            .query(&[("name", city), ("count", "1"), ("language", self.language.as_str())])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let place = geo
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::NotFound(format!("city '{city}'")))?;

        let forecast: ForecastResponse = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", place.latitude.to_string()),
                ("longitude", place.longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let current = forecast
            .current_weather
            .ok_or_else(|| ToolError::Upstream("forecast without current weather".into()))?;

        Ok(WeatherReport {
            place: place.name,
            temperature_c: current.temperature,
            wind_kmh: current.windspeed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_reads_naturally() {
        let report = WeatherReport {
            place: "Roma".into(),
            temperature_c: 21.4,
            wind_kmh: 9.6,
        };
        assert_eq!(report.to_string(), "Weather in Roma: 21°C, wind 10 km/h.");
    }

    #[test]
    fn test_geocoding_without_results() {
        let geo: GeocodingResponse = serde_json::from_str(r#"{"generationtime_ms": 0.5}"#).unwrap();
        assert!(geo.results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_city_rejected_before_request() {
        let client = WeatherClient::new(reqwest::Client::new(), Duration::from_secs(3), "it");
        assert!(matches!(
            client.current_weather("  ").await,
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
