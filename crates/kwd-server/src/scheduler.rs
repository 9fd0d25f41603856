//! Cron-driven cycle loop.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::{CycleError, ScheduleError};
use crate::pipeline::{CycleReport, Generator};
use crate::status::StatusHandle;

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    inner: cron::Schedule,
}

impl Schedule {
    /// Five-field expressions get a leading seconds field of `0` and their
    /// day-of-week numbers (0-7, Sunday as 0 or 7) rewritten as day names;
    /// six and seven field expressions are used as written.
    pub fn normalize(expression: &str) -> String {
        let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();
        if fields.len() == 5 {
            fields[4] = day_names(&fields[4]);
            format!("0 {}", fields.join(" "))
        } else {
            fields.join(" ")
        }
    }

    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let normalized = Self::normalize(expression);
        let inner = cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::Invalid {
            expr: expression.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            expression: normalized,
            inner,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`, evaluated in `zone`
    pub fn next_after(&self, after: DateTime<Utc>, zone: Tz) -> Option<DateTime<Utc>> {
        self.inner
            .after(&after.with_timezone(&zone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite a numeric day-of-week field as names. The `cron` crate counts
/// Sunday as 1. Parts that are not plain numbers, ranges or steps are left
/// for the parser to judge.
fn day_names(field: &str) -> String {
    let mut days: Vec<u32> = Vec::new();
    for part in field.split(',') {
        match expand_days(part) {
            Some(expanded) => {
                for day in expanded {
                    if !days.contains(&day) {
                        days.push(day);
                    }
                }
            }
            None => return field.to_string(),
        }
    }
    days.sort_unstable();
    days.iter()
        .map(|&d| DAY_NAMES[d as usize])
        .collect::<Vec<_>>()
        .join(",")
}

/// Days (0 = Sunday) selected by one list element, or `None` when the
/// element is not numeric.
fn expand_days(part: &str) -> Option<Vec<u32>> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, step.parse::<u32>().ok().filter(|s| *s > 0)?),
        None => (part, 1),
    };
    let (start, end) = match range.split_once('-') {
        Some((start, end)) => (start.parse::<u32>().ok()?, end.parse::<u32>().ok()?),
        None if range == "*" && part.contains('/') => (0, 6),
        None => {
            let day = range.parse::<u32>().ok()?;
            (day, if part.contains('/') { 6 } else { day })
        }
    };
    if start > end || end > 7 {
        return None;
    }
    Some(
        (start..=end)
            .step_by(step as usize)
            .map(|d| d % 7)
            .collect(),
    )
}

/// Run one cycle and record it. Failures are logged, never propagated to
/// the loop.
pub async fn run_cycle(
    generator: &Generator,
    status: &StatusHandle,
) -> Result<CycleReport, CycleError> {
    status.begin();
    let start = Instant::now();
    info!(vendor = %generator.vendor(), "Generation cycle started");

    match generator.run_once().await {
        Ok(report) => {
            status.record_success(&report);
            info!(
                vendor = %report.vendor,
                duration_ms = report.duration.as_millis() as u64,
                days = report.forecast_days,
                png = report.png_path.is_some(),
                "Generation cycle finished"
            );
            Ok(report)
        }
        Err(e) => {
            let elapsed = start.elapsed();
            status.record_failure(&e, elapsed);
            if e.is_transient() {
                warn!(error = %e, duration_ms = elapsed.as_millis() as u64, "Generation cycle failed, retrying next tick");
            } else {
                error!(error = %e, duration_ms = elapsed.as_millis() as u64, "Generation cycle failed");
            }
            Err(e)
        }
    }
}

pub struct Scheduler {
    schedule: Schedule,
    zone: Tz,
    generator: Arc<Generator>,
    status: StatusHandle,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(schedule: Schedule, zone: Tz, generator: Arc<Generator>, status: StatusHandle) -> Self {
        Self {
            schedule,
            zone,
            generator,
            status,
            tracker: TaskTracker::new(),
        }
    }

    /// Each tick spawns a detached cycle, so a slow cycle never delays the
    /// next tick. Returns after `cancel` fires and in-flight cycles finish.
    pub async fn run(self, cancel: CancellationToken, run_on_start: bool) {
        info!(
            schedule = %self.schedule.expression(),
            zone = %self.zone.name(),
            run_on_start,
            "Scheduler started"
        );

        if run_on_start {
            self.spawn_cycle();
        }

        let mut last_fire = Utc::now();
        loop {
            let from = Utc::now().max(last_fire);
            let Some(next) = self.schedule.next_after(from, self.zone) else {
                warn!("Schedule has no upcoming fire times");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next.with_timezone(&self.zone), wait_secs = wait.as_secs(), "Next cycle scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler stopping");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    last_fire = next;
                    self.spawn_cycle();
                }
            }
        }

        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(in_flight = self.tracker.len(), "Waiting for running cycles");
        }
        self.tracker.wait().await;
        info!("Scheduler stopped");
    }

    fn spawn_cycle(&self) {
        let generator = Arc::clone(&self.generator);
        let status = self.status.clone();
        self.tracker.spawn(async move {
            // Already logged and recorded.
            let _ = run_cycle(&generator, &status).await;
        });
    }
}
