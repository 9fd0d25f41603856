//! Tomorrow.io v4 timelines client.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::provider::{self, SourceSettings, WeatherSource};
use crate::types::{
    Condition, CurrentConditions, DailyForecast, Forecast, Location, MoonPhase, Units, Vendor,
    WeatherError,
};

pub const FIELDS: &str = "temperature,temperatureApparent,humidity,windSpeed,windDirection,\
weatherCode,temperatureMax,temperatureMin,sunriseTime,sunsetTime,moonPhase,precipitationProbability";
const TIMESTEPS: &str = "current,1d";
const END_TIME: &str = "nowPlus5d";

pub struct TomorrowClient {
    client: Client,
    api_key: String,
    base_url: String,
    units: Units,
    timezone: Option<Tz>,
}

impl TomorrowClient {
    pub fn new(settings: SourceSettings) -> Result<Self, WeatherError> {
        Ok(Self {
            client: provider::http_client(settings.timeout)?,
            base_url: settings.base_url_for(Vendor::Tomorrow),
            api_key: settings.api_key,
            units: settings.units,
            timezone: settings.timezone,
        })
    }

    /// Fetch the `current` and `1d` timelines.
    #[instrument(skip(self), level = "info")]
    pub async fn timelines(&self, location: &Location) -> Result<TimelinesResponse, WeatherError> {
        let url = provider::endpoint(&self.base_url, "timelines")?;
        let timezone = self.timezone.map(|tz| tz.name()).unwrap_or("UTC");

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .query(&[
                ("location", location.to_string().as_str()),
                ("fields", FIELDS),
                ("timesteps", TIMESTEPS),
                ("endTime", END_TIME),
                ("units", self.units.as_str()),
                ("timezone", timezone),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return provider::decode_json(response, "Tomorrow.io timelines").await;
        }
        if status.as_u16() == 429 {
            return Err(WeatherError::RateLimited(provider::retry_after(&response)));
        }

        let Ok(body) = response.json::<TomorrowError>().await else {
            return Err(WeatherError::UnexpectedStatus(status.as_u16()));
        };
        if provider::is_auth_failure(status) {
            return Err(WeatherError::Unauthorized {
                status: status.as_u16(),
                message: body.message,
            });
        }
        Err(WeatherError::Api {
            status: status.as_u16(),
            code: body.code.map(|c| c.to_string()).or(body.kind),
            message: body.message,
        })
    }
}

#[async_trait]
impl WeatherSource for TomorrowClient {
    fn vendor(&self) -> Vendor {
        Vendor::Tomorrow
    }

    async fn fetch(&self, location: &Location) -> Result<Forecast, WeatherError> {
        let payload = self.timelines(location).await?;
        payload.into_forecast(self.units, self.timezone)
    }
}

#[derive(Debug, Deserialize)]
struct TomorrowError {
    code: Option<i64>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelinesResponse {
    pub data: TimelinesData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimelinesData {
    #[serde(default)]
    pub timelines: Vec<Timeline>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub timestep: String,
    #[serde(default)]
    pub intervals: Vec<Interval>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    /// Carries the requested zone's offset
    pub start_time: DateTime<FixedOffset>,
    pub values: IntervalValues,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalValues {
    pub temperature: Option<f64>,
    pub temperature_apparent: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub weather_code: Option<i64>,
    pub temperature_max: Option<f64>,
    pub temperature_min: Option<f64>,
    pub sunrise_time: Option<DateTime<FixedOffset>>,
    pub sunset_time: Option<DateTime<FixedOffset>>,
    pub moon_phase: Option<i64>,
    pub precipitation_probability: Option<f64>,
}

impl TimelinesResponse {
    fn timeline(&self, step: &str) -> Option<&Timeline> {
        self.data.timelines.iter().find(|t| t.timestep == step)
    }

    /// Normalize the `current` and `1d` timelines. Without a configured
    /// zone, day dates follow the offset the API attached to each interval.
    pub fn into_forecast(self, units: Units, timezone: Option<Tz>) -> Result<Forecast, WeatherError> {
        let now = self
            .timeline("current")
            .and_then(|t| t.intervals.first())
            .ok_or(WeatherError::MissingField("timelines.current"))?;
        let values = &now.values;

        let current = CurrentConditions {
            observed_at: now.start_time.with_timezone(&Utc),
            temperature: values
                .temperature
                .ok_or(WeatherError::MissingField("current.temperature"))?,
            feels_like: values.temperature_apparent,
            humidity: values.humidity,
            wind_speed: values.wind_speed.unwrap_or(0.0),
            wind_direction: values.wind_direction.unwrap_or(0.0),
            condition: values
                .weather_code
                .map(Condition::from_tomorrow_code)
                .unwrap_or_default(),
            summary: None,
        };

        let daily = match self.timeline("1d") {
            Some(timeline) => timeline
                .intervals
                .iter()
                .map(|interval| daily_entry(interval, timezone))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Forecast::new(current, daily, None, units))
    }
}

fn daily_entry(interval: &Interval, timezone: Option<Tz>) -> Result<DailyForecast, WeatherError> {
    let values = &interval.values;
    let date: NaiveDate = match timezone {
        Some(tz) => interval.start_time.with_timezone(&tz).date_naive(),
        None => interval.start_time.date_naive(),
    };

    Ok(DailyForecast {
        date,
        high: values
            .temperature_max
            .ok_or(WeatherError::MissingField("1d.temperatureMax"))?,
        low: values
            .temperature_min
            .ok_or(WeatherError::MissingField("1d.temperatureMin"))?,
        condition: values
            .weather_code
            .map(Condition::from_tomorrow_code)
            .unwrap_or_default(),
        sunrise: values.sunrise_time.map(|t| t.with_timezone(&Utc)),
        sunset: values.sunset_time.map(|t| t.with_timezone(&Utc)),
        moon_phase: values.moon_phase.and_then(MoonPhase::from_tomorrow),
        precipitation_probability: values.precipitation_probability,
    })
}
