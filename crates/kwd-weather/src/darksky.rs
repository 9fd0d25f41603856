//! DarkSky forecast client.
//!
//! One request returns current conditions and the daily forecast; the
//! API key travels in the path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::provider::{self, SourceSettings, WeatherSource};
use crate::types::{
    Condition, CurrentConditions, DailyForecast, Forecast, Location, MoonPhase, Units, Vendor,
    WeatherError,
};

/// Blocks the renderer never reads
const EXCLUDE: &str = "minutely,hourly,alerts,flags";

pub struct DarkSkyClient {
    client: Client,
    api_key: String,
    base_url: String,
    units: Units,
    timezone: Option<Tz>,
}

impl DarkSkyClient {
    pub fn new(settings: SourceSettings) -> Result<Self, WeatherError> {
        Ok(Self {
            client: provider::http_client(settings.timeout)?,
            base_url: settings.base_url_for(Vendor::DarkSky),
            api_key: settings.api_key,
            units: settings.units,
            timezone: settings.timezone,
        })
    }

    /// Fetch the raw DarkSky payload.
    #[instrument(skip(self), level = "info")]
    pub async fn forecast(&self, location: &Location) -> Result<DarkSkyResponse, WeatherError> {
        let url = provider::endpoint(
            &self.base_url,
            &format!(
                "forecast/{}/{},{}",
                self.api_key, location.latitude, location.longitude
            ),
        )?;

        let response = self
            .client
            .get(url)
            .query(&[("units", self.units.us_si()), ("exclude", EXCLUDE)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return provider::decode_json(response, "DarkSky forecast").await;
        }
        if status.as_u16() == 429 {
            return Err(WeatherError::RateLimited(provider::retry_after(&response)));
        }

        let body: Option<DarkSkyError> = response.json().await.ok();
        let message = body
            .map(|b| b.error)
            .unwrap_or_else(|| status.to_string());
        if provider::is_auth_failure(status) {
            Err(WeatherError::Unauthorized {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(WeatherError::Api {
                status: status.as_u16(),
                code: None,
                message,
            })
        }
    }
}

#[async_trait]
impl WeatherSource for DarkSkyClient {
    fn vendor(&self) -> Vendor {
        Vendor::DarkSky
    }

    async fn fetch(&self, location: &Location) -> Result<Forecast, WeatherError> {
        let payload = self.forecast(location).await?;
        payload.into_forecast(self.units, self.timezone)
    }
}

#[derive(Debug, Deserialize)]
struct DarkSkyError {
    #[serde(default)]
    error: String,
}

/// DarkSky response, reduced to the blocks this crate reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DarkSkyResponse {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub currently: DarkSkyCurrently,
    #[serde(default)]
    pub daily: DarkSkyDaily,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DarkSkyCurrently {
    pub time: i64,
    pub summary: Option<String>,
    pub icon: Option<String>,
    pub temperature: Option<f64>,
    pub apparent_temperature: Option<f64>,
    /// Fraction 0-1
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    /// Absent when the wind is calm
    pub wind_bearing: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DarkSkyDaily {
    #[serde(default)]
    pub data: Vec<DarkSkyDay>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DarkSkyDay {
    pub time: i64,
    pub icon: Option<String>,
    pub temperature_high: Option<f64>,
    pub temperature_low: Option<f64>,
    pub temperature_max: Option<f64>,
    pub temperature_min: Option<f64>,
    pub sunrise_time: Option<i64>,
    pub sunset_time: Option<i64>,
    pub moon_phase: Option<f64>,
    pub precip_probability: Option<f64>,
}

impl DarkSkyResponse {
    /// Normalize into a [`Forecast`]. Day dates are taken in the payload's
    /// zone, falling back to `fallback_tz` and then UTC.
    pub fn into_forecast(
        self,
        units: Units,
        fallback_tz: Option<Tz>,
    ) -> Result<Forecast, WeatherError> {
        let payload_tz = self.timezone.as_deref().and_then(|name| match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(e) => {
                tracing::warn!(timezone = name, error = %e, "Ignoring unknown DarkSky timezone");
                None
            }
        });
        let zone = payload_tz.or(fallback_tz).unwrap_or(Tz::UTC);

        let currently = self.currently;
        let current = CurrentConditions {
            observed_at: unix(currently.time)?,
            temperature: currently
                .temperature
                .ok_or(WeatherError::MissingField("currently.temperature"))?,
            feels_like: currently.apparent_temperature,
            humidity: currently.humidity.map(|h| h * 100.0),
            wind_speed: currently.wind_speed.unwrap_or(0.0),
            wind_direction: currently.wind_bearing.unwrap_or(0.0),
            condition: currently
                .icon
                .as_deref()
                .map(Condition::from_darksky_icon)
                .unwrap_or_default(),
            summary: currently.summary,
        };

        let daily = self
            .daily
            .data
            .into_iter()
            .map(|day| day.normalize(zone))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Forecast::new(current, daily, payload_tz, units))
    }
}

impl DarkSkyDay {
    fn normalize(self, zone: Tz) -> Result<DailyForecast, WeatherError> {
        Ok(DailyForecast {
            date: unix(self.time)?.with_timezone(&zone).date_naive(),
            high: self
                .temperature_high
                .or(self.temperature_max)
                .ok_or(WeatherError::MissingField("daily.temperatureHigh"))?,
            low: self
                .temperature_low
                .or(self.temperature_min)
                .ok_or(WeatherError::MissingField("daily.temperatureLow"))?,
            condition: self
                .icon
                .as_deref()
                .map(Condition::from_darksky_icon)
                .unwrap_or_default(),
            sunrise: self.sunrise_time.map(unix).transpose()?,
            sunset: self.sunset_time.map(unix).transpose()?,
            moon_phase: self.moon_phase.and_then(MoonPhase::from_fraction),
            precipitation_probability: self.precip_probability.map(|p| p * 100.0),
        })
    }
}

fn unix(ts: i64) -> Result<DateTime<Utc>, WeatherError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| WeatherError::Decode(format!("timestamp out of range: {}", ts)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIXTURE: &str = include_str!("../tests/fixtures/darksky.json");

    fn client_for(server: &MockServer) -> DarkSkyClient {
        let mut settings = SourceSettings::new("secret");
        settings.base_url = Some(server.uri());
        DarkSkyClient::new(settings).unwrap()
    }

    #[test]
    fn test_fixture_normalizes() {
        let payload: DarkSkyResponse = serde_json::from_str(FIXTURE).unwrap();
        let forecast = payload.into_forecast(Units::Imperial, None).unwrap();

        assert_eq!(forecast.timezone, Some(chrono_tz::America::New_York));
        assert_eq!(forecast.current.temperature, 41.6);
        assert_eq!(forecast.current.wind_direction, 250.0);
        assert_eq!(forecast.current.condition, Condition::PartlyCloudy);
        assert_eq!(forecast.daily.len(), 5);

        let today = forecast.today().unwrap();
        assert_eq!(today.date, NaiveDate::from_ymd_opt(2020, 3, 6).unwrap());
        assert_eq!(today.moon_phase, Some(MoonPhase::WaxingGibbous));
        let sunrise = today.sunrise.unwrap().with_timezone(&chrono_tz::America::New_York);
        assert_eq!(sunrise.hour(), 6);
    }

    #[test]
    fn test_calm_wind_and_max_fallback() {
        let json = serde_json::json!({
            "timezone": "UTC",
            "currently": {"time": 1583470800, "temperature": 10.0, "icon": "wind"},
            "daily": {"data": [
                {"time": 1583452800, "temperatureMax": 12.0, "temperatureMin": 1.0}
            ]}
        });
        let payload: DarkSkyResponse = serde_json::from_value(json).unwrap();
        let forecast = payload.into_forecast(Units::Metric, None).unwrap();

        assert_eq!(forecast.current.wind_speed, 0.0);
        assert_eq!(forecast.current.wind_direction, 0.0);
        assert_eq!(forecast.current.condition, Condition::Wind);
        assert_eq!(forecast.daily[0].high, 12.0);
        assert_eq!(forecast.daily[0].low, 1.0);
        assert_eq!(forecast.daily[0].sunrise, None);
    }

    #[test]
    fn test_missing_temperature_fails() {
        let json = serde_json::json!({"currently": {"time": 1583470800}});
        let payload: DarkSkyResponse = serde_json::from_value(json).unwrap();
        assert!(matches!(
            payload.into_forecast(Units::Imperial, None),
            Err(WeatherError::MissingField("currently.temperature"))
        ));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast/secret/42.36,-71.06"))
            .and(query_param("units", "us"))
            .and(query_param("exclude", EXCLUDE))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIXTURE))
            .mount(&server)
            .await;

        let forecast = client_for(&server)
            .fetch(&Location::new(42.36, -71.06))
            .await
            .unwrap();
        assert_eq!(forecast.daily.len(), 5);
    }

    #[tokio::test]
    async fn test_fetch_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "code": 403,
                "error": "daily usage limit exceeded"
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).fetch(&Location::new(1.0, 2.0)).await;
        match result {
            Err(WeatherError::Unauthorized { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "daily usage limit exceeded");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_fetch_bad_location() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "code": 400,
                "error": "The given location is invalid."
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).fetch(&Location::new(1.0, 2.0)).await;
        assert!(matches!(result, Err(WeatherError::Api { status: 400, .. })));
    }

    #[tokio::test]
    async fn test_network_error_hides_key() {
        let mut settings = SourceSettings::new("SUPERSECRETKEY");
        settings.base_url = Some("http://127.0.0.1:1".to_string());
        let client = DarkSkyClient::new(settings).unwrap();

        let err = client.forecast(&Location::new(1.0, 2.0)).await.unwrap_err();
        assert!(matches!(err, WeatherError::Network(_)));
        assert!(!err.to_string().contains("SUPERSECRETKEY"));
        assert!(!format!("{:?}", err).contains("SUPERSECRETKEY"));
    }
}
