//! Environment-driven configuration.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use kwd_weather::{Location, Units, Vendor};
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_SCHEDULE: &str = "*/15 * * * *";
pub const DEFAULT_TEMPLATE_PATH: &str = "./preprocess.svg";
pub const DEFAULT_OUTPUT_DIR: &str = "./output";
pub const DEFAULT_RASTERIZER_COMMAND: &str =
    "rsvg-convert --background-color=white -o {output} {input}";
pub const DEFAULT_RASTERIZER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Vendor used when only `WEATHER_API_KEY` is set
pub const DEFAULT_VENDOR: Vendor = Vendor::ClimaCell;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// All errors joined into one line
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Runtime settings, read once at start-up.
#[derive(Clone)]
pub struct Config {
    pub vendor: Vendor,
    pub api_key: String,
    /// Variable the key was read from, for log lines
    pub api_key_var: &'static str,
    pub location: Location,
    /// Display and schedule zone. `None` defers to the vendor payload.
    pub timezone: Option<Tz>,
    pub units: Units,
    pub schedule: String,
    pub run_on_start: bool,
    pub template_path: PathBuf,
    pub output_dir: PathBuf,
    /// `None` disables PNG output
    pub rasterizer_command: Option<String>,
    pub rasterizer_timeout: Duration,
    pub grayscale: bool,
    pub listen_addr: SocketAddr,
    pub http_timeout: Duration,
    pub api_base_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("vendor", &self.vendor)
            .field("api_key", &"<redacted>")
            .field("api_key_var", &self.api_key_var)
            .field("location", &self.location)
            .field("timezone", &self.timezone)
            .field("units", &self.units)
            .field("schedule", &self.schedule)
            .field("run_on_start", &self.run_on_start)
            .field("template_path", &self.template_path)
            .field("output_dir", &self.output_dir)
            .field("rasterizer_command", &self.rasterizer_command)
            .field("rasterizer_timeout", &self.rasterizer_timeout)
            .field("grayscale", &self.grayscale)
            .field("listen_addr", &self.listen_addr)
            .field("http_timeout", &self.http_timeout)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// Trimmed, non-empty variable lookup
struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(var)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| ConfigError::invalid(var, format!("'{}': {}", raw, e)))
            })
            .transpose()
    }

    fn flag(&self, var: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(var) {
            None => Ok(default),
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid(var, format!("'{}' is not a boolean", raw))),
        }
    }

    fn secs(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        Ok(Duration::from_secs(self.parse::<u64>(var)?.unwrap_or(default)))
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Read from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read through an arbitrary lookup; used by tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let (vendor, api_key, api_key_var) = resolve_vendor(&env)?;
        let location = resolve_location(&env)?;

        let timezone = env
            .get("TIMEZONE")
            .map(|raw| {
                raw.parse::<Tz>()
                    .map_err(|e| ConfigError::invalid("TIMEZONE", format!("'{}': {}", raw, e)))
            })
            .transpose()?;

        // `RASTERIZER_COMMAND=` (set but empty) turns PNG output off.
        let rasterizer_command = match (env.lookup)("RASTERIZER_COMMAND") {
            None => Some(DEFAULT_RASTERIZER_COMMAND.to_string()),
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(raw.trim().to_string()),
        };

        Ok(Self {
            vendor,
            api_key,
            api_key_var,
            location,
            timezone,
            units: env.parse::<Units>("UNITS")?.unwrap_or_default(),
            schedule: env
                .get("CRON_SCHEDULE")
                .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()),
            run_on_start: env.flag("RUN_ON_START", true)?,
            template_path: env
                .get("TEMPLATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_PATH)),
            output_dir: env
                .get("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            rasterizer_command,
            rasterizer_timeout: env
                .secs("RASTERIZER_TIMEOUT_SECS", DEFAULT_RASTERIZER_TIMEOUT_SECS)?,
            grayscale: env.flag("GRAYSCALE_PNG", true)?,
            listen_addr: match env.parse::<SocketAddr>("LISTEN_ADDR")? {
                Some(addr) => addr,
                None => DEFAULT_LISTEN_ADDR
                    .parse::<SocketAddr>()
                    .map_err(|e| ConfigError::invalid("LISTEN_ADDR", e.to_string()))?,
            },
            http_timeout: env.secs("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            api_base_url: env.get("WEATHER_API_BASE_URL"),
        })
    }

    /// Read, validate and log warnings. Errors abort start-up.
    pub fn load_validated() -> Result<(Self, ValidationResult), ConfigError> {
        let config = Self::from_env()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Validation(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !self.location.is_valid() {
            result.add_error(
                "location",
                format!(
                    "Coordinates out of range: {} (latitude -90..90, longitude -180..180)",
                    self.location
                ),
            );
        }

        if self.api_key.chars().any(char::is_whitespace) {
            result.add_error(self.api_key_var, "API key contains whitespace");
        }

        if let Some(base) = &self.api_base_url {
            validate_url(base, "WEATHER_API_BASE_URL", &mut result);
        }

        if self.schedule.split_whitespace().count() < 5 {
            result.add_error(
                "CRON_SCHEDULE",
                format!("Expected at least five fields, got '{}'", self.schedule),
            );
        }

        if self.http_timeout.is_zero() {
            result.add_error("HTTP_TIMEOUT_SECS", "Timeout must be greater than 0");
        } else if self.http_timeout > Duration::from_secs(300) {
            result.add_warning("HTTP_TIMEOUT_SECS", "Timeout is more than five minutes");
        }

        match &self.rasterizer_command {
            Some(_) if self.rasterizer_timeout.is_zero() => {
                result.add_error("RASTERIZER_TIMEOUT_SECS", "Timeout must be greater than 0");
            }
            Some(_) => {}
            None => {
                result.add_warning(
                    "RASTERIZER_COMMAND",
                    "Rasterizer disabled - only output.svg will be served",
                );
                if self.grayscale {
                    result.add_warning("GRAYSCALE_PNG", "Ignored without a rasterizer");
                }
            }
        }

        validate_file(&self.template_path, "TEMPLATE_PATH", &mut result);

        if self.output_dir.exists() && !self.output_dir.is_dir() {
            result.add_error(
                "OUTPUT_DIR",
                format!("Path is not a directory: {}", self.output_dir.display()),
            );
        }

        result
    }

    /// Zone used for cron evaluation before any payload has been seen
    pub fn schedule_zone(&self) -> Tz {
        self.timezone.unwrap_or(Tz::UTC)
    }
}

/// Pick the vendor and its key. An explicit `WEATHER_PROVIDER` wins;
/// otherwise the first vendor with its own key set, then the generic key.
fn resolve_vendor<F>(env: &Env<F>) -> Result<(Vendor, String, &'static str), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = env.parse::<Vendor>("WEATHER_PROVIDER")?;
    let vendor = explicit
        .or_else(|| {
            Vendor::ALL
                .into_iter()
                .find(|v| env.get(v.key_var()).is_some())
        })
        .unwrap_or(DEFAULT_VENDOR);

    if let Some(key) = env.get(vendor.key_var()) {
        return Ok((vendor, key, vendor.key_var()));
    }
    if let Some(key) = env.get("WEATHER_API_KEY") {
        return Ok((vendor, key, "WEATHER_API_KEY"));
    }
    Err(ConfigError::MissingSetting(format!(
        "{} or WEATHER_API_KEY",
        vendor.key_var()
    )))
}

fn resolve_location<F>(env: &Env<F>) -> Result<Location, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(pair) = env.get("GPS_COORDINATES") {
        return Location::parse_pair(&pair).map_err(|e| ConfigError::invalid("GPS_COORDINATES", e));
    }

    match (env.parse::<f64>("LATITUDE")?, env.parse::<f64>("LONGITUDE")?) {
        (Some(lat), Some(lon)) => Ok(Location::new(lat, lon)),
        (Some(_), None) => Err(ConfigError::MissingSetting("LONGITUDE".to_string())),
        (None, Some(_)) => Err(ConfigError::MissingSetting("LATITUDE".to_string())),
        (None, None) => Err(ConfigError::MissingSetting(
            "LATITUDE and LONGITUDE, or GPS_COORDINATES".to_string(),
        )),
    }
}

fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
    match Url::parse(url_str) {
        Ok(url) => {
            if url.scheme() != "http" && url.scheme() != "https" {
                result.add_error(
                    field_name,
                    format!("URL must use http or https scheme, got: {}", url.scheme()),
                );
            }
            if url.host().is_none() {
                result.add_error(field_name, "URL must have a host");
            }
            if url.port() == Some(0) {
                result.add_error(field_name, "Port cannot be 0");
            }
        }
        Err(e) => {
            result.add_error(field_name, format!("Invalid URL: {}", e));
        }
    }
}

/// The template is re-read every cycle, so a missing file is only a warning
/// at start-up.
fn validate_file(path: &Path, field_name: &str, result: &mut ValidationResult) {
    if !path.exists() {
        result.add_warning(
            field_name,
            format!("File does not exist yet: {}", path.display()),
        );
    } else if !path.is_file() {
        result.add_error(field_name, format!("Not a file: {}", path.display()));
    }
}
