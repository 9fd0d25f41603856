use kwd_render::RenderError;
use kwd_weather::WeatherError;
use thiserror::Error;

/// Why a generation cycle failed. Never fatal to the daemon.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Weather fetch failed: {0}")]
    Weather(#[from] WeatherError),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Output directory unavailable: {0}")]
    Io(#[from] std::io::Error),
}

impl CycleError {
    /// Whether the next tick is likely to succeed on its own
    pub fn is_transient(&self) -> bool {
        match self {
            CycleError::Weather(e) => e.is_transient(),
            CycleError::Render(RenderError::Forecast(e)) => e.is_transient(),
            CycleError::Render(RenderError::RasterizeTimeout(_)) => true,
            CycleError::Render(_) | CycleError::Io(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {message}")]
    Invalid { expr: String, message: String },
}
