//! Template tokens and the values substituted for them.
//!
//! Day one is today, day two is tomorrow, day three is two days out and
//! day four is three days out. `ICON_ONE` follows the current conditions
//! rather than today's daily summary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use kwd_weather::Forecast;

use crate::error::RenderError;

/// Rendered in place of values the vendor did not report
pub const NOT_AVAILABLE: &str = "--";

/// Number of forecast days the display shows
pub const DISPLAY_DAYS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    TempNow,
    FeelsLike,
    Humidity,
    ConditionNow,
    WindSpeed,
    WindDir,
    Sunrise,
    Sunset,
    MoonPhase,
    HighOne,
    HighTwo,
    HighThree,
    HighFour,
    LowOne,
    LowTwo,
    LowThree,
    LowFour,
    DayTwo,
    DayThree,
    DayFour,
    IconOne,
    IconTwo,
    IconThree,
    IconFour,
    DateString,
}

impl Token {
    pub const ALL: [Token; 25] = [
        Token::TempNow,
        Token::FeelsLike,
        Token::Humidity,
        Token::ConditionNow,
        Token::WindSpeed,
        Token::WindDir,
        Token::Sunrise,
        Token::Sunset,
        Token::MoonPhase,
        Token::HighOne,
        Token::HighTwo,
        Token::HighThree,
        Token::HighFour,
        Token::LowOne,
        Token::LowTwo,
        Token::LowThree,
        Token::LowFour,
        Token::DayTwo,
        Token::DayThree,
        Token::DayFour,
        Token::IconOne,
        Token::IconTwo,
        Token::IconThree,
        Token::IconFour,
        Token::DateString,
    ];

    const HIGHS: [Token; DISPLAY_DAYS] = [
        Token::HighOne,
        Token::HighTwo,
        Token::HighThree,
        Token::HighFour,
    ];
    const LOWS: [Token; DISPLAY_DAYS] =
        [Token::LowOne, Token::LowTwo, Token::LowThree, Token::LowFour];
    const DAYS: [Token; 3] = [Token::DayTwo, Token::DayThree, Token::DayFour];
    const ICONS: [Token; 3] = [Token::IconTwo, Token::IconThree, Token::IconFour];

    /// The literal placeholder as it appears in the template
    pub fn placeholder(self) -> &'static str {
        match self {
            Self::TempNow => "TEMP_NOW",
            Self::FeelsLike => "FEELS_LIKE",
            Self::Humidity => "HUMIDITY",
            Self::ConditionNow => "CONDITION_NOW",
            Self::WindSpeed => "WIND_SPEED",
            Self::WindDir => "WIND_DIR",
            Self::Sunrise => "SUNRISE",
            Self::Sunset => "SUNSET",
            Self::MoonPhase => "MOON_PHASE",
            Self::HighOne => "HIGH_ONE",
            Self::HighTwo => "HIGH_TWO",
            Self::HighThree => "HIGH_THREE",
            Self::HighFour => "HIGH_FOUR",
            Self::LowOne => "LOW_ONE",
            Self::LowTwo => "LOW_TWO",
            Self::LowThree => "LOW_THREE",
            Self::LowFour => "LOW_FOUR",
            Self::DayTwo => "DAY_TWO",
            Self::DayThree => "DAY_THREE",
            Self::DayFour => "DAY_FOUR",
            Self::IconOne => "ICON_ONE",
            Self::IconTwo => "ICON_TWO",
            Self::IconThree => "ICON_THREE",
            Self::IconFour => "ICON_FOUR",
            Self::DateString => "DATE_STRING",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.placeholder())
    }
}

/// Zone used for weekday and clock formatting: the configured zone, else
/// the zone the vendor reported, else UTC.
pub fn display_zone(configured: Option<Tz>, forecast: &Forecast) -> Tz {
    configured.or(forecast.timezone).unwrap_or(Tz::UTC)
}

/// Formatted value for every [`Token`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenValues {
    values: BTreeMap<Token, String>,
}

impl TokenValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: Token, value: impl Into<String>) {
        self.values.insert(token, value.into());
    }

    pub fn get(&self, token: Token) -> Option<&str> {
        self.values.get(&token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Format every token from a normalized forecast. `now` stamps
    /// `DATE_STRING`.
    pub fn from_forecast(
        forecast: &Forecast,
        zone: Tz,
        now: DateTime<Utc>,
    ) -> Result<Self, RenderError> {
        let days = forecast.require_days(DISPLAY_DAYS)?;
        let current = &forecast.current;
        let today = &days[0];

        let mut values = Self::new();
        values.insert(Token::TempNow, whole(current.temperature));
        values.insert(Token::FeelsLike, optional_whole(current.feels_like));
        values.insert(Token::Humidity, optional_whole(current.humidity));
        values.insert(Token::ConditionNow, current.condition.description());
        values.insert(Token::WindSpeed, whole(current.wind_speed));
        values.insert(Token::WindDir, whole(current.wind_direction));
        values.insert(Token::Sunrise, optional_clock(today.sunrise, zone));
        values.insert(Token::Sunset, optional_clock(today.sunset, zone));
        values.insert(
            Token::MoonPhase,
            today
                .moon_phase
                .map(|phase| phase.label())
                .unwrap_or(NOT_AVAILABLE),
        );

        for (day, (high, low)) in days.iter().zip(Token::HIGHS.iter().zip(Token::LOWS.iter())) {
            values.insert(*high, whole(day.high));
            values.insert(*low, whole(day.low));
        }
        for (day, (name, icon)) in days[1..]
            .iter()
            .zip(Token::DAYS.iter().zip(Token::ICONS.iter()))
        {
            values.insert(*name, weekday(day.date));
            values.insert(*icon, day.condition.icon_code());
        }
        values.insert(Token::IconOne, current.condition.icon_code());
        values.insert(Token::DateString, timestamp(now, zone));

        Ok(values)
    }
}

/// Round to zero decimals; `-0` collapses to `0`.
pub fn whole(value: f64) -> String {
    let formatted = format!("{:.0}", value);
    if formatted == "-0" {
        "0".to_string()
    } else {
        formatted
    }
}

fn optional_whole(value: Option<f64>) -> String {
    value.map(whole).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// `3:04PM` style
pub fn clock(at: DateTime<Utc>, zone: Tz) -> String {
    at.with_timezone(&zone).format("%-I:%M%p").to_string()
}

fn optional_clock(at: Option<DateTime<Utc>>, zone: Tz) -> String {
    at.map(|t| clock(t, zone))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Full weekday name
pub fn weekday(date: NaiveDate) -> String {
    date.format("%A").to_string()
}

/// `Monday Jan 2 15:04` style
pub fn timestamp(at: DateTime<Utc>, zone: Tz) -> String {
    at.with_timezone(&zone).format("%A %b %-d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kwd_weather::{Condition, CurrentConditions, DailyForecast, MoonPhase, Units};

    fn day(date: (i32, u32, u32), high: f64, low: f64, condition: Condition) -> DailyForecast {
        DailyForecast {
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            high,
            low,
            condition,
            sunrise: None,
            sunset: None,
            moon_phase: None,
            precipitation_probability: None,
        }
    }

    fn forecast() -> Forecast {
        let mut today = day((2020, 3, 6), 44.12, 27.5, Condition::PartlyCloudy);
        today.sunrise = Some(Utc.with_ymd_and_hms(2020, 3, 6, 11, 15, 0).unwrap());
        today.sunset = Some(Utc.with_ymd_and_hms(2020, 3, 6, 22, 42, 0).unwrap());
        today.moon_phase = Some(MoonPhase::WaxingGibbous);

        Forecast::new(
            CurrentConditions {
                observed_at: Utc.with_ymd_and_hms(2020, 3, 6, 20, 0, 0).unwrap(),
                temperature: 41.6,
                feels_like: None,
                humidity: Some(42.0),
                wind_speed: 8.4,
                wind_direction: 250.0,
                condition: Condition::Rain,
                summary: None,
            },
            vec![
                today,
                day((2020, 3, 7), 38.7, -0.2, Condition::Clear),
                day((2020, 3, 8), 54.83, 33.49, Condition::Snow),
                day((2020, 3, 9), 63.4, 44.9, Condition::Unknown),
            ],
            Some(chrono_tz::America::New_York),
            Units::Imperial,
        )
    }

    #[test]
    fn test_whole_rounds_and_drops_negative_zero() {
        assert_eq!(whole(41.6), "42");
        assert_eq!(whole(27.4), "27");
        assert_eq!(whole(-0.2), "0");
        assert_eq!(whole(-3.7), "-4");
    }

    #[test]
    fn test_clock_and_timestamp_formats() {
        let at = Utc.with_ymd_and_hms(2006, 1, 2, 20, 4, 5).unwrap();
        let zone = chrono_tz::America::New_York;
        assert_eq!(clock(at, zone), "3:04PM");
        assert_eq!(timestamp(at, zone), "Monday Jan 2 15:04");
        assert_eq!(weekday(NaiveDate::from_ymd_opt(2006, 1, 3).unwrap()), "Tuesday");
    }

    #[test]
    fn test_from_forecast_fills_every_token() {
        let forecast = forecast();
        let now = Utc.with_ymd_and_hms(2020, 3, 6, 20, 30, 0).unwrap();
        let zone = display_zone(None, &forecast);
        let values = TokenValues::from_forecast(&forecast, zone, now).unwrap();

        assert_eq!(values.len(), Token::ALL.len());
        assert_eq!(values.get(Token::TempNow), Some("42"));
        assert_eq!(values.get(Token::FeelsLike), Some(NOT_AVAILABLE));
        assert_eq!(values.get(Token::Humidity), Some("42"));
        assert_eq!(values.get(Token::Sunrise), Some("6:15AM"));
        assert_eq!(values.get(Token::Sunset), Some("5:42PM"));
        assert_eq!(values.get(Token::MoonPhase), Some("Waxing Gibbous"));
        assert_eq!(values.get(Token::HighOne), Some("44"));
        assert_eq!(values.get(Token::LowTwo), Some("0"));
        assert_eq!(values.get(Token::DayTwo), Some("Saturday"));
        assert_eq!(values.get(Token::DayFour), Some("Monday"));
        assert_eq!(values.get(Token::IconOne), Some("ra"));
        assert_eq!(values.get(Token::IconTwo), Some("skc"));
        assert_eq!(values.get(Token::IconFour), Some("mist"));
        assert_eq!(values.get(Token::DateString), Some("Friday Mar 6 15:30"));
    }

    #[test]
    fn test_configured_zone_wins() {
        let forecast = forecast();
        assert_eq!(
            display_zone(Some(chrono_tz::Europe::Berlin), &forecast),
            chrono_tz::Europe::Berlin
        );
        let mut bare = forecast.clone();
        bare.timezone = None;
        assert_eq!(display_zone(None, &bare), Tz::UTC);
    }

    #[test]
    fn test_short_forecast_is_rejected() {
        let mut forecast = forecast();
        forecast.daily.truncate(3);
        let result = TokenValues::from_forecast(&forecast, Tz::UTC, Utc::now());
        assert!(matches!(result, Err(RenderError::Forecast(_))));
    }
}
