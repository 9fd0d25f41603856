//! Shared record of generation outcomes, reported by `/health`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kwd_weather::Vendor;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::CycleError;
use crate::pipeline::CycleReport;

#[derive(Debug, Clone, Serialize)]
pub struct GenerationStatus {
    pub vendor: Vendor,
    pub started_at: DateTime<Utc>,
    pub runs: u64,
    pub failures: u64,
    /// Cycles currently executing; ticks may overlap
    pub in_flight: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub forecast_days: Option<usize>,
}

impl GenerationStatus {
    /// Output exists on disk once any cycle has succeeded
    pub fn is_healthy(&self) -> bool {
        self.last_success_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<GenerationStatus>>,
}

impl StatusHandle {
    pub fn new(vendor: Vendor) -> Self {
        Self {
            inner: Arc::new(RwLock::new(GenerationStatus {
                vendor,
                started_at: Utc::now(),
                runs: 0,
                failures: 0,
                in_flight: 0,
                last_run_at: None,
                last_success_at: None,
                last_error: None,
                last_duration_ms: None,
                forecast_days: None,
            })),
        }
    }

    pub fn snapshot(&self) -> GenerationStatus {
        self.inner.read().clone()
    }

    pub fn begin(&self) {
        let mut status = self.inner.write();
        status.runs += 1;
        status.in_flight += 1;
        status.last_run_at = Some(Utc::now());
    }

    pub fn record_success(&self, report: &CycleReport) {
        let mut status = self.inner.write();
        status.in_flight = status.in_flight.saturating_sub(1);
        status.last_success_at = Some(Utc::now());
        status.last_error = None;
        status.last_duration_ms = Some(millis(report.duration));
        status.forecast_days = Some(report.forecast_days);
    }

    pub fn record_failure(&self, error: &CycleError, elapsed: Duration) {
        let mut status = self.inner.write();
        status.in_flight = status.in_flight.saturating_sub(1);
        status.failures += 1;
        status.last_error = Some(error.to_string());
        status.last_duration_ms = Some(millis(elapsed));
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwd_weather::WeatherError;
    use std::path::PathBuf;

    fn report() -> CycleReport {
        CycleReport {
            vendor: Vendor::DarkSky,
            svg_path: PathBuf::from("output/output.svg"),
            png_path: None,
            duration: Duration::from_millis(1500),
            forecast_days: 8,
        }
    }

    #[test]
    fn test_new_status_is_unhealthy() {
        let status = StatusHandle::new(Vendor::DarkSky).snapshot();
        assert!(!status.is_healthy());
        assert_eq!(status.runs, 0);
    }

    #[test]
    fn test_success_then_failure() {
        let handle = StatusHandle::new(Vendor::DarkSky);

        handle.begin();
        assert_eq!(handle.snapshot().in_flight, 1);
        handle.record_success(&report());

        let status = handle.snapshot();
        assert!(status.is_healthy());
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.last_duration_ms, Some(1500));
        assert_eq!(status.forecast_days, Some(8));

        handle.begin();
        handle.record_failure(
            &CycleError::from(WeatherError::UnexpectedStatus(502)),
            Duration::from_millis(20),
        );

        let status = handle.snapshot();
        assert_eq!(status.runs, 2);
        assert_eq!(status.failures, 1);
        assert!(status.is_healthy(), "previous output is still served");
        assert!(status
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("502")));
    }

    #[test]
    fn test_success_clears_last_error() {
        let handle = StatusHandle::new(Vendor::Tomorrow);
        handle.begin();
        handle.record_failure(
            &CycleError::from(WeatherError::RateLimited(60)),
            Duration::ZERO,
        );
        handle.begin();
        handle.record_success(&report());
        assert_eq!(handle.snapshot().last_error, None);
    }
}
