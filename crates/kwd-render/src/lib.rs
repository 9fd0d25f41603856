//! Turns a normalized forecast into the display image.
//!
//! [`TokenValues`] formats the forecast, [`Template`] substitutes the values
//! into the SVG, and [`Rasterizer`] hands the SVG to an external converter.
//! Every artifact is written with an atomic rename so the HTTP server never
//! serves a partial file.

pub mod error;
pub mod output;
pub mod raster;
pub mod template;
pub mod tokens;

pub use error::RenderError;
pub use output::{remove_stale_temps, write_atomic, OutputPaths};
pub use raster::{to_grayscale, Rasterizer};
pub use template::Template;
pub use tokens::{display_zone, Token, TokenValues};
