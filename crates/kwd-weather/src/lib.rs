//! Weather data for the kindle-weather display.
//!
//! Fetches current conditions and the daily forecast from DarkSky,
//! ClimaCell v3 or Tomorrow.io v4 and normalizes each vendor's payload into
//! one [`Forecast`] model.

pub mod climacell;
pub mod darksky;
pub mod provider;
pub mod tomorrow;
pub mod types;

pub use provider::{build_source, SourceSettings, WeatherSource};
pub use types::*;
