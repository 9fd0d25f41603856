//! One fetch, render, write and rasterize cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use chrono_tz::Tz;
use kwd_core::Config;
use kwd_render::{
    display_zone, to_grayscale, write_atomic, OutputPaths, Rasterizer, RenderError, Template,
    TokenValues,
};
use kwd_weather::{Location, Vendor, WeatherSource};
use tracing::{debug, instrument};

use crate::error::CycleError;

/// Everything a cycle needs besides the weather source
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub template_path: PathBuf,
    pub output: OutputPaths,
    pub timezone: Option<Tz>,
    /// `None` serves the SVG only
    pub rasterizer: Option<Rasterizer>,
    pub grayscale: bool,
}

impl GeneratorSettings {
    pub fn from_config(config: &Config) -> Result<Self, RenderError> {
        let rasterizer = config
            .rasterizer_command
            .as_deref()
            .map(|command| Rasterizer::parse(command, config.rasterizer_timeout))
            .transpose()?;

        Ok(Self {
            template_path: config.template_path.clone(),
            output: OutputPaths::new(&config.output_dir),
            timezone: config.timezone,
            rasterizer,
            grayscale: config.grayscale,
        })
    }
}

/// Outcome of a successful cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub vendor: Vendor,
    pub svg_path: PathBuf,
    pub png_path: Option<PathBuf>,
    pub duration: Duration,
    pub forecast_days: usize,
}

pub struct Generator {
    source: Arc<dyn WeatherSource>,
    location: Location,
    settings: GeneratorSettings,
}

impl Generator {
    pub fn new(
        source: Arc<dyn WeatherSource>,
        location: Location,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            source,
            location,
            settings,
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.source.vendor()
    }

    pub fn output(&self) -> &OutputPaths {
        &self.settings.output
    }

    /// Run one cycle. The template is read first so a broken template does
    /// not cost an API call.
    #[instrument(skip(self), fields(vendor = %self.source.vendor()), level = "info")]
    pub async fn run_once(&self) -> Result<CycleReport, CycleError> {
        let start = Instant::now();
        let template = Template::load(&self.settings.template_path).await?;

        let forecast = self.source.fetch(&self.location).await?;
        let zone = display_zone(self.settings.timezone, &forecast);
        debug!(zone = %zone.name(), days = forecast.daily.len(), "Forecast received");

        let values = TokenValues::from_forecast(&forecast, zone, Utc::now())?;
        let svg = template.render(&values)?;

        let output = &self.settings.output;
        tokio::fs::create_dir_all(&output.dir).await?;
        write_atomic(&output.svg, svg.as_bytes()).await?;

        let png_path = match &self.settings.rasterizer {
            Some(rasterizer) => {
                rasterizer.rasterize(&output.svg, &output.png).await?;
                if self.settings.grayscale {
                    to_grayscale(&output.png).await?;
                }
                Some(output.png.clone())
            }
            None => None,
        };

        Ok(CycleReport {
            vendor: self.source.vendor(),
            svg_path: output.svg.clone(),
            png_path,
            duration: start.elapsed(),
            forecast_days: forecast.daily.len(),
        })
    }
}
