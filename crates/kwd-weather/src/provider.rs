//! Vendor-independent entry point: the `WeatherSource` trait and the
//! HTTP plumbing shared by every vendor client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::climacell::ClimaCellClient;
use crate::darksky::DarkSkyClient;
use crate::tomorrow::TomorrowClient;
use crate::types::{Forecast, Location, Units, Vendor, WeatherError};

const USER_AGENT: &str = concat!("kindle-weather/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Fallback when a 429 carries no usable `Retry-After`
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// A weather API that can produce a normalized [`Forecast`].
#[async_trait]
pub trait WeatherSource: Send + Sync {
    fn vendor(&self) -> Vendor;

    /// Fetch current conditions plus the daily forecast for `location`.
    async fn fetch(&self, location: &Location) -> Result<Forecast, WeatherError>;
}

/// Settings shared by all vendor clients
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub api_key: String,
    pub units: Units,
    /// Zone used to assign calendar dates when the vendor does not report one
    pub timezone: Option<Tz>,
    /// Overrides the vendor's default API root
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl SourceSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            units: Units::default(),
            timezone: None,
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub(crate) fn base_url_for(&self, vendor: Vendor) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| vendor.default_base_url().to_string())
    }
}

/// Construct the client for `vendor`.
pub fn build_source(
    vendor: Vendor,
    settings: SourceSettings,
) -> Result<Arc<dyn WeatherSource>, WeatherError> {
    if settings.api_key.trim().is_empty() {
        return Err(WeatherError::InvalidRequest(format!(
            "{} requires an API key",
            vendor
        )));
    }

    let source: Arc<dyn WeatherSource> = match vendor {
        Vendor::DarkSky => Arc::new(DarkSkyClient::new(settings)?),
        Vendor::ClimaCell => Arc::new(ClimaCellClient::new(settings)?),
        Vendor::Tomorrow => Arc::new(TomorrowClient::new(settings)?),
    };
    tracing::debug!(vendor = %vendor, "Weather source configured");
    Ok(source)
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, WeatherError> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Resolve `path` below `base`, keeping any path prefix `base` carries
/// (`https://host/v3` + `weather/realtime` → `https://host/v3/weather/realtime`).
pub(crate) fn endpoint(base: &str, path: &str) -> Result<Url, WeatherError> {
    let root = format!("{}/", base.trim_end_matches('/'));
    Url::parse(&root)
        .and_then(|u| u.join(path.trim_start_matches('/')))
        .map_err(|e| WeatherError::InvalidRequest(format!("bad endpoint {}{}: {}", root, path, e)))
}

/// Decode a successful response body.
pub(crate) async fn decode_json<T: DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<T, WeatherError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| WeatherError::Decode(format!("deserializing {}: {}", what, e)))
}

/// Read the `Retry-After` header of a 429 response.
pub(crate) fn retry_after(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

pub(crate) fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_keeps_version_prefix() {
        let url = endpoint("https://api.climacell.co/v3", "weather/realtime").unwrap();
        assert_eq!(url.as_str(), "https://api.climacell.co/v3/weather/realtime");

        let url = endpoint("https://api.climacell.co/v3/", "/weather/forecast/daily").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.climacell.co/v3/weather/forecast/daily"
        );
    }

    #[test]
    fn test_endpoint_rejects_garbage() {
        assert!(matches!(
            endpoint("not a url", "x"),
            Err(WeatherError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_build_source_requires_key() {
        let result = build_source(Vendor::DarkSky, SourceSettings::new("  "));
        assert!(matches!(result, Err(WeatherError::InvalidRequest(_))));
    }

    #[test]
    fn test_build_source_each_vendor() {
        for vendor in Vendor::ALL {
            let source = build_source(vendor, SourceSettings::new("key")).unwrap();
            assert_eq!(source.vendor(), vendor);
        }
    }
}
