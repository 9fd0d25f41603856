use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Unit system requested from the vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Imperial,
    Metric,
}

impl Units {
    /// DarkSky and ClimaCell v3 both use `us` / `si`
    pub fn us_si(self) -> &'static str {
        match self {
            Self::Imperial => "us",
            Self::Metric => "si",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Imperial => "imperial",
            Self::Metric => "metric",
        }
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "imperial" | "us" => Ok(Self::Imperial),
            "metric" | "si" => Ok(Self::Metric),
            other => Err(format!("unknown unit system '{}'", other)),
        }
    }
}

/// Supported upstream weather APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    DarkSky,
    ClimaCell,
    Tomorrow,
}

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::DarkSky, Vendor::ClimaCell, Vendor::Tomorrow];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DarkSky => "darksky",
            Self::ClimaCell => "climacell",
            Self::Tomorrow => "tomorrow",
        }
    }

    /// Environment variable holding this vendor's API key
    pub fn key_var(self) -> &'static str {
        match self {
            Self::DarkSky => "DARKSKY_API_KEY",
            Self::ClimaCell => "CLIMACELL_API_KEY",
            Self::Tomorrow => "TOMORROW_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::DarkSky => "https://api.darksky.net",
            Self::ClimaCell => "https://api.climacell.co/v3",
            Self::Tomorrow => "https://api.tomorrow.io/v4",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "darksky" | "dark_sky" | "dark-sky" => Ok(Self::DarkSky),
            "climacell" => Ok(Self::ClimaCell),
            "tomorrow" | "tomorrow.io" | "tomorrowio" => Ok(Self::Tomorrow),
            other => Err(format!("unknown weather provider '{}'", other)),
        }
    }
}

/// Sky conditions normalized across vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Clear,
    MostlyClear,
    PartlyCloudy,
    MostlyCloudy,
    Cloudy,
    Fog,
    Drizzle,
    Rain,
    Snow,
    Sleet,
    Thunderstorm,
    Wind,
    #[default]
    Unknown,
}

impl Condition {
    /// Convert a DarkSky `icon` value
    pub fn from_darksky_icon(icon: &str) -> Self {
        match icon {
            "clear-day" | "clear-night" => Self::Clear,
            "rain" => Self::Rain,
            "snow" => Self::Snow,
            "sleet" => Self::Sleet,
            "wind" => Self::Wind,
            "fog" => Self::Fog,
            "cloudy" => Self::Cloudy,
            "partly-cloudy-day" | "partly-cloudy-night" => Self::PartlyCloudy,
            _ => Self::Unknown,
        }
    }

    /// Convert a ClimaCell v3 `weather_code` string
    pub fn from_climacell_code(code: &str) -> Self {
        match code {
            "freezing_rain_heavy" | "freezing_rain" | "freezing_rain_light" | "freezing_drizzle"
            | "ice_pellets_heavy" | "ice_pellets" | "ice_pellets_light" => Self::Sleet,
            "snow_heavy" | "snow" | "snow_light" | "flurries" => Self::Snow,
            "tstorm" => Self::Thunderstorm,
            "rain_heavy" | "rain" | "rain_light" => Self::Rain,
            "drizzle" => Self::Drizzle,
            "fog_light" | "fog" => Self::Fog,
            "cloudy" => Self::Cloudy,
            "mostly_cloudy" => Self::MostlyCloudy,
            "partly_cloudy" => Self::PartlyCloudy,
            "mostly_clear" => Self::MostlyClear,
            "clear" => Self::Clear,
            _ => Self::Unknown,
        }
    }

    /// Convert a Tomorrow.io v4 integer `weatherCode`
    /// See: https://docs.tomorrow.io/reference/data-layers-weather-codes
    pub fn from_tomorrow_code(code: i64) -> Self {
        match code {
            1000 => Self::Clear,
            1100 => Self::MostlyClear,
            1101 => Self::PartlyCloudy,
            1102 => Self::MostlyCloudy,
            1001 => Self::Cloudy,
            2000 | 2100 => Self::Fog,
            4000 => Self::Drizzle,
            4001 | 4200 | 4201 => Self::Rain,
            5000 | 5001 | 5100 | 5101 => Self::Snow,
            6000 | 6001 | 6200 | 6201 | 7000 | 7101 | 7102 => Self::Sleet,
            8000 => Self::Thunderstorm,
            _ => Self::Unknown,
        }
    }

    /// Icon identifier understood by the display template
    pub fn icon_code(&self) -> &'static str {
        match self {
            Self::Clear => "skc",
            Self::MostlyClear | Self::PartlyCloudy => "few",
            Self::MostlyCloudy | Self::Cloudy => "ovc",
            Self::Fog => "fg",
            Self::Drizzle | Self::Rain | Self::Thunderstorm => "ra",
            Self::Snow => "sn",
            Self::Sleet => "fzra",
            Self::Wind => "wind",
            Self::Unknown => "mist",
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Clear",
            Self::MostlyClear => "Mostly Clear",
            Self::PartlyCloudy => "Partly Cloudy",
            Self::MostlyCloudy => "Mostly Cloudy",
            Self::Cloudy => "Cloudy",
            Self::Fog => "Fog",
            Self::Drizzle => "Drizzle",
            Self::Rain => "Rain",
            Self::Snow => "Snow",
            Self::Sleet => "Sleet",
            Self::Thunderstorm => "Thunderstorm",
            Self::Wind => "Windy",
            Self::Unknown => "Unknown",
        }
    }
}

/// Lunar phase, normalized from fractions, strings or integer codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoonPhase {
    New,
    WaxingCrescent,
    FirstQuarter,
    WaxingGibbous,
    Full,
    WaningGibbous,
    LastQuarter,
    WaningCrescent,
}

impl MoonPhase {
    /// Lunation fraction as reported by DarkSky: 0 new, 0.25 first quarter,
    /// 0.5 full, 0.75 last quarter. Exact quarter values name the quarter,
    /// anything between falls into the surrounding phase.
    pub fn from_fraction(fraction: f64) -> Option<Self> {
        if fraction.is_nan() || fraction < 0.0 {
            return None;
        }
        let phase = if fraction == 0.0 {
            Self::New
        } else if fraction < 0.25 {
            Self::WaxingCrescent
        } else if fraction == 0.25 {
            Self::FirstQuarter
        } else if fraction < 0.5 {
            Self::WaxingGibbous
        } else if fraction == 0.5 {
            Self::Full
        } else if fraction < 0.75 {
            Self::WaningGibbous
        } else if fraction == 0.75 {
            Self::LastQuarter
        } else {
            Self::WaningCrescent
        };
        Some(phase)
    }

    /// ClimaCell v3 `moon_phase` string
    pub fn from_climacell(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "waxing_crescent" => Some(Self::WaxingCrescent),
            "first_quarter" => Some(Self::FirstQuarter),
            "waxing_gibbous" => Some(Self::WaxingGibbous),
            "full" => Some(Self::Full),
            "waning_gibbous" => Some(Self::WaningGibbous),
            "last_quarter" | "third_quarter" => Some(Self::LastQuarter),
            "waning_crescent" => Some(Self::WaningCrescent),
            _ => None,
        }
    }

    /// Tomorrow.io v4 `moonPhase` code (0-7)
    pub fn from_tomorrow(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::New),
            1 => Some(Self::WaxingCrescent),
            2 => Some(Self::FirstQuarter),
            3 => Some(Self::WaxingGibbous),
            4 => Some(Self::Full),
            5 => Some(Self::WaningGibbous),
            6 => Some(Self::LastQuarter),
            7 => Some(Self::WaningCrescent),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::WaxingCrescent => "Waxing Crescent",
            Self::FirstQuarter => "First Quarter",
            Self::WaxingGibbous => "Waxing Gibbous",
            Self::Full => "Full",
            Self::WaningGibbous => "Waning Gibbous",
            Self::LastQuarter => "Last Quarter",
            Self::WaningCrescent => "Waning Crescent",
        }
    }
}

/// Geographic location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Parse a `"lat,lon"` pair
    pub fn parse_pair(pair: &str) -> Result<Self, String> {
        let (lat, lon) = pair
            .split_once(',')
            .ok_or_else(|| format!("expected 'lat,lon', got '{}'", pair))?;
        let latitude = lat
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid latitude '{}': {}", lat.trim(), e))?;
        let longitude = lon
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid longitude '{}': {}", lon.trim(), e))?;
        Ok(Self::new(latitude, longitude))
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// Current weather conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub observed_at: DateTime<Utc>,
    pub temperature: f64,
    pub feels_like: Option<f64>,
    /// Relative humidity in percent (0-100)
    pub humidity: Option<f64>,
    pub wind_speed: f64,
    /// Degrees clockwise from north
    pub wind_direction: f64,
    pub condition: Condition,
    pub summary: Option<String>,
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
    pub condition: Condition,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub moon_phase: Option<MoonPhase>,
    /// Percent (0-100)
    pub precipitation_probability: Option<f64>,
}

/// Vendor-independent forecast consumed by the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub current: CurrentConditions,
    /// Sorted by date; the first entry is today
    pub daily: Vec<DailyForecast>,
    /// Timezone reported by the vendor, when it reports one
    pub timezone: Option<Tz>,
    pub units: Units,
    pub fetched_at: DateTime<Utc>,
}

impl Forecast {
    pub fn new(
        current: CurrentConditions,
        mut daily: Vec<DailyForecast>,
        timezone: Option<Tz>,
        units: Units,
    ) -> Self {
        daily.sort_by_key(|d| d.date);
        Self {
            current,
            daily,
            timezone,
            units,
            fetched_at: Utc::now(),
        }
    }

    pub fn day(&self, index: usize) -> Option<&DailyForecast> {
        self.daily.get(index)
    }

    pub fn today(&self) -> Option<&DailyForecast> {
        self.day(0)
    }

    /// Ensure at least `needed` days are present.
    pub fn require_days(&self, needed: usize) -> Result<&[DailyForecast], WeatherError> {
        if self.daily.len() < needed {
            return Err(WeatherError::InsufficientForecast {
                needed,
                got: self.daily.len(),
            });
        }
        Ok(&self.daily[..needed])
    }
}

/// Weather provider errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(reqwest::Error),
    #[error("{}", format_api_error(*status, code.as_deref(), message))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),
    #[error("Unexpected HTTP response status code: {0}")]
    UnexpectedStatus(u16),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Missing field in weather response: {0}")]
    MissingField(&'static str),
    #[error("Forecast has {got} days, need {needed}")]
    InsufficientForecast { needed: usize, got: usize },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Request URLs carry API keys (DarkSky path, Tomorrow query), so they are
/// stripped before the error can reach logs or `/health`.
impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.without_url())
    }
}

impl WeatherError {
    /// Whether the next scheduled attempt is likely to succeed without
    /// operator action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::UnexpectedStatus(status) => *status >= 500,
            _ => false,
        }
    }
}

fn format_api_error(status: u16, code: Option<&str>, message: &str) -> String {
    match code {
        Some(code) if !code.is_empty() => format!("{} ({}) API error: {}", status, code, message),
        _ => format!("{} API error: {}", status, message),
    }
}
