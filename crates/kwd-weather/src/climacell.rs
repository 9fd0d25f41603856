//! ClimaCell v3 client.
//!
//! Realtime and daily data come from two endpoints, fetched concurrently.
//! The v3 schema wraps every value in `{ "value": .., "units": .. }`,
//! reports daily extremes as a `[min, max]` array and switches the
//! observation time between instants and bare dates depending on the
//! endpoint; the payload types below absorb all of that.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use tracing::instrument;

use crate::provider::{self, SourceSettings, WeatherSource};
use crate::types::{
    Condition, CurrentConditions, DailyForecast, Forecast, Location, MoonPhase, Units, Vendor,
    WeatherError,
};

pub const REALTIME_FIELDS: &str = "temp,feels_like,humidity,wind_speed,wind_direction,weather_code";
pub const DAILY_FIELDS: &str =
    "temp,sunrise,sunset,moon_phase,weather_code,precipitation_probability";

pub struct ClimaCellClient {
    client: Client,
    api_key: String,
    base_url: String,
    units: Units,
    timezone: Option<Tz>,
}

impl ClimaCellClient {
    pub fn new(settings: SourceSettings) -> Result<Self, WeatherError> {
        Ok(Self {
            client: provider::http_client(settings.timeout)?,
            base_url: settings.base_url_for(Vendor::ClimaCell),
            api_key: settings.api_key,
            units: settings.units,
            timezone: settings.timezone,
        })
    }

    /// Current conditions.
    #[instrument(skip(self), level = "info")]
    pub async fn realtime(&self, location: &Location) -> Result<ClimaCellRealtime, WeatherError> {
        self.get("weather/realtime", REALTIME_FIELDS, location).await
    }

    /// Daily forecast, today first.
    #[instrument(skip(self), level = "info")]
    pub async fn daily(&self, location: &Location) -> Result<Vec<ClimaCellDay>, WeatherError> {
        self.get("weather/forecast/daily", DAILY_FIELDS, location)
            .await
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        fields: &str,
        location: &Location,
    ) -> Result<T, WeatherError> {
        let url = provider::endpoint(&self.base_url, endpoint)?;
        let lat = location.latitude.to_string();
        let lon = location.longitude.to_string();

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .header("apikey", &self.api_key)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("unit_system", self.units.us_si()),
                ("fields", fields),
            ])
            .send()
            .await?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => provider::decode_json(response, endpoint).await,
            400 | 401 | 403 | 404 | 500 => {
                let body = response.bytes().await?;
                let err: ErrorResponse = serde_json::from_slice(&body).map_err(|e| {
                    WeatherError::Decode(format!("deserializing weather error response: {}", e))
                })?;
                Err(err.into_error(status))
            }
            429 => Err(WeatherError::RateLimited(provider::retry_after(&response))),
            other => Err(WeatherError::UnexpectedStatus(other)),
        }
    }
}

#[async_trait]
impl WeatherSource for ClimaCellClient {
    fn vendor(&self) -> Vendor {
        Vendor::ClimaCell
    }

    async fn fetch(&self, location: &Location) -> Result<Forecast, WeatherError> {
        let (realtime, daily) =
            tokio::try_join!(self.realtime(location), self.daily(location))?;
        normalize(realtime, daily, self.units, self.timezone)
    }
}

/// Error body returned for 4xx/500 responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    /// Absent on 401 and 403; the HTTP status is used instead
    status_code: Option<u16>,
    error_code: Option<String>,
    #[serde(default)]
    message: String,
}

impl ErrorResponse {
    fn into_error(self, status: StatusCode) -> WeatherError {
        let status_code = if provider::is_auth_failure(status) {
            status.as_u16()
        } else {
            self.status_code.unwrap_or(status.as_u16())
        };
        WeatherError::Api {
            status: status_code,
            code: self.error_code.filter(|c| !c.is_empty()),
            message: self.message,
        }
    }
}

/// `{ "value": .., "units": .. }`; the unit key is spelled `unit` in places.
#[derive(Debug, Clone, Deserialize)]
pub struct Measure<T> {
    pub value: Option<T>,
    #[serde(default, alias = "unit")]
    pub units: Option<String>,
}

/// Observation times arrive as RFC 3339 instants or as bare dates, either
/// directly or wrapped in `{ "value": .. }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationTime {
    Instant(DateTime<Utc>),
    Date(NaiveDate),
}

impl ObservationTime {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Self::Instant(instant.with_timezone(&Utc)));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Self::Date)
            .map_err(|_| format!("unrecognized observation time '{}'", raw))
    }

    pub fn date_in(&self, zone: Tz) -> NaiveDate {
        match self {
            Self::Instant(instant) => instant.with_timezone(&zone).date_naive(),
            Self::Date(date) => *date,
        }
    }

    /// Dates resolve to midnight UTC
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            Self::Instant(instant) => *instant,
            Self::Date(date) => date.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }
}

impl<'de> Deserialize<'de> for ObservationTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bare(String),
            Wrapped { value: String },
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Bare(s) | Raw::Wrapped { value: s } => s,
        };
        ObservationTime::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClimaCellRealtime {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub observation_time: ObservationTime,
    pub temp: Option<Measure<f64>>,
    pub feels_like: Option<Measure<f64>>,
    pub humidity: Option<Measure<f64>>,
    pub wind_speed: Option<Measure<f64>>,
    pub wind_direction: Option<Measure<f64>>,
    pub weather_code: Option<Measure<String>>,
}

/// One side of a daily extreme: `{ observation_time, min }` or
/// `{ observation_time, max }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Extreme {
    pub observation_time: Option<ObservationTime>,
    pub min: Option<Measure<f64>>,
    pub max: Option<Measure<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MinMax(pub Vec<Extreme>);

impl MinMax {
    pub fn min(&self) -> Option<f64> {
        self.0.iter().find_map(|e| e.min.as_ref()?.value)
    }

    pub fn max(&self) -> Option<f64> {
        self.0.iter().find_map(|e| e.max.as_ref()?.value)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClimaCellDay {
    pub observation_time: ObservationTime,
    #[serde(default)]
    pub temp: MinMax,
    pub sunrise: Option<Measure<String>>,
    pub sunset: Option<Measure<String>>,
    pub moon_phase: Option<Measure<String>>,
    pub weather_code: Option<Measure<String>>,
    pub precipitation_probability: Option<Measure<f64>>,
}

fn value<T: Clone>(measure: &Option<Measure<T>>) -> Option<T> {
    measure.as_ref().and_then(|m| m.value.clone())
}

fn instant(measure: &Option<Measure<String>>) -> Option<DateTime<Utc>> {
    let raw = measure.as_ref()?.value.as_deref()?;
    match ObservationTime::parse(raw) {
        Ok(ObservationTime::Instant(at)) => Some(at),
        _ => {
            tracing::debug!(value = raw, "Ignoring non-instant sun time");
            None
        }
    }
}

/// Merge the realtime and daily payloads into a [`Forecast`]. ClimaCell
/// reports no timezone; instants are assigned to dates in `timezone`
/// (UTC when unset).
pub fn normalize(
    realtime: ClimaCellRealtime,
    days: Vec<ClimaCellDay>,
    units: Units,
    timezone: Option<Tz>,
) -> Result<Forecast, WeatherError> {
    let zone = timezone.unwrap_or(Tz::UTC);

    let current = CurrentConditions {
        observed_at: realtime.observation_time.instant(),
        temperature: value(&realtime.temp).ok_or(WeatherError::MissingField("temp"))?,
        feels_like: value(&realtime.feels_like),
        humidity: value(&realtime.humidity),
        wind_speed: value(&realtime.wind_speed).unwrap_or(0.0),
        wind_direction: value(&realtime.wind_direction).unwrap_or(0.0),
        condition: value(&realtime.weather_code)
            .map(|code| Condition::from_climacell_code(&code))
            .unwrap_or_default(),
        summary: None,
    };

    let daily = days
        .into_iter()
        .map(|day| {
            Ok(DailyForecast {
                date: day.observation_time.date_in(zone),
                high: day.temp.max().ok_or(WeatherError::MissingField("temp.max"))?,
                low: day.temp.min().ok_or(WeatherError::MissingField("temp.min"))?,
                condition: value(&day.weather_code)
                    .map(|code| Condition::from_climacell_code(&code))
                    .unwrap_or_default(),
                sunrise: instant(&day.sunrise),
                sunset: instant(&day.sunset),
                moon_phase: value(&day.moon_phase)
                    .and_then(|phase| MoonPhase::from_climacell(&phase)),
                precipitation_probability: value(&day.precipitation_probability),
            })
        })
        .collect::<Result<Vec<_>, WeatherError>>()?;

    Ok(Forecast::new(current, daily, None, units))
}
