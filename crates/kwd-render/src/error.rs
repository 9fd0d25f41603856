//! Render-side error types.

use std::path::PathBuf;
use std::time::Duration;

use kwd_weather::WeatherError;
use thiserror::Error;

use crate::tokens::Token;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No value for template token {0}")]
    MissingValue(Token),

    #[error("Tokens left unresolved after substitution: {}", .0.join(", "))]
    UnresolvedTokens(Vec<&'static str>),

    #[error("Forecast unusable: {0}")]
    Forecast(#[from] WeatherError),

    #[error("Token matcher: {0}")]
    Matcher(#[from] aho_corasick::BuildError),

    #[error("Invalid rasterizer command: {0}")]
    InvalidCommand(String),

    #[error("Failed to start rasterizer '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Rasterizer exited with {status}: {stderr}")]
    RasterizeFailed { status: String, stderr: String },

    #[error("Rasterizer timed out after {}s", .0.as_secs())]
    RasterizeTimeout(Duration),

    #[error("Image conversion failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl RenderError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
