//! Scheduled generation and serving of the kindle weather image.

pub mod error;
pub mod pipeline;
pub mod scheduler;
pub mod server;
pub mod status;

pub use error::{CycleError, ScheduleError};
pub use pipeline::{CycleReport, Generator, GeneratorSettings};
pub use scheduler::{run_cycle, Schedule, Scheduler};
pub use status::{GenerationStatus, StatusHandle};
