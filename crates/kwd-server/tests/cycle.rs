//! End-to-end cycles against a mocked vendor API.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use kwd_render::{OutputPaths, Rasterizer, RenderError};
use kwd_server::{run_cycle, CycleError, Generator, GeneratorSettings, Schedule, Scheduler, StatusHandle};
use kwd_weather::{
    build_source, Condition, CurrentConditions, DailyForecast, Forecast, Location, SourceSettings,
    Units, Vendor, WeatherError, WeatherSource,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DARKSKY: &str = include_str!("../../kwd-weather/tests/fixtures/darksky.json");
const TEMPLATE: &str = "<svg><text>TEMP_NOW</text><text>DAY_TWO</text><use href=\"#ICON_TWO\"/></svg>";

fn settings(dir: &Path, rasterizer: Option<Rasterizer>) -> GeneratorSettings {
    GeneratorSettings {
        template_path: dir.join("preprocess.svg"),
        output: OutputPaths::new(dir.join("output")),
        timezone: Some(chrono_tz::America::New_York),
        rasterizer,
        grayscale: false,
    }
}

async fn darksky_generator(server: &MockServer, dir: &Path, rasterizer: Option<Rasterizer>) -> Generator {
    tokio::fs::write(dir.join("preprocess.svg"), TEMPLATE)
        .await
        .unwrap();
    let mut source = SourceSettings::new("ds-key");
    source.base_url = Some(server.uri());
    let source = build_source(Vendor::DarkSky, source).unwrap();
    Generator::new(source, Location::new(42.36, -71.06), settings(dir, rasterizer))
}

#[tokio::test]
async fn test_cycle_writes_svg() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forecast/ds-key/42.36,-71.06"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DARKSKY))
        .expect(1)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let generator = darksky_generator(&server, dir.path(), None).await;
    let status = StatusHandle::new(Vendor::DarkSky);

    let report = run_cycle(&generator, &status).await.unwrap();

    assert_eq!(report.vendor, Vendor::DarkSky);
    assert_eq!(report.png_path, None);
    assert_eq!(report.forecast_days, 5);
    let svg = tokio::fs::read_to_string(&report.svg_path).await.unwrap();
    assert_eq!(
        svg,
        "<svg><text>42</text><text>Saturday</text><use href=\"#skc\"/></svg>"
    );
    assert!(status.snapshot().is_healthy());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cycle_runs_rasterizer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DARKSKY))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let rasterizer = Rasterizer::parse("cat {input}", Duration::from_secs(5)).unwrap();
    let generator = darksky_generator(&server, dir.path(), Some(rasterizer)).await;

    let report = run_cycle(&generator, &StatusHandle::new(Vendor::DarkSky))
        .await
        .unwrap();

    let png = report.png_path.unwrap();
    assert_eq!(png, dir.path().join("output").join("output.png"));
    assert_eq!(
        tokio::fs::read(&png).await.unwrap(),
        tokio::fs::read(&report.svg_path).await.unwrap()
    );
}

#[tokio::test]
async fn test_failed_cycle_keeps_previous_output() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DARKSKY))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(serde_json::json!({"code": 403, "error": "daily usage limit exceeded"})),
        )
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let generator = darksky_generator(&server, dir.path(), None).await;
    let status = StatusHandle::new(Vendor::DarkSky);

    let first = run_cycle(&generator, &status).await.unwrap();
    let before = tokio::fs::read_to_string(&first.svg_path).await.unwrap();

    let err = run_cycle(&generator, &status).await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Weather(WeatherError::Unauthorized { status: 403, .. })
    ));
    assert!(!err.is_transient());

    assert_eq!(tokio::fs::read_to_string(&first.svg_path).await.unwrap(), before);
    let snapshot = status.snapshot();
    assert_eq!((snapshot.runs, snapshot.failures), (2, 1));
    assert!(snapshot.is_healthy());
}

#[tokio::test]
async fn test_missing_template_skips_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DARKSKY))
        .expect(0)
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();
    let generator = darksky_generator(&server, dir.path(), None).await;
    tokio::fs::remove_file(dir.path().join("preprocess.svg"))
        .await
        .unwrap();

    let err = generator.run_once().await.unwrap_err();
    assert!(matches!(err, CycleError::Render(RenderError::Read { .. })));
}

/// Serves a fixed forecast without touching the network
struct StaticSource {
    days: usize,
}

#[async_trait]
impl WeatherSource for StaticSource {
    fn vendor(&self) -> Vendor {
        Vendor::Tomorrow
    }

    async fn fetch(&self, _location: &Location) -> Result<Forecast, WeatherError> {
        let today = NaiveDate::from_ymd_opt(2020, 3, 6).unwrap();
        let daily = (0..self.days)
            .map(|i| DailyForecast {
                date: today + chrono::Days::new(i as u64),
                high: 50.0,
                low: 30.0,
                condition: Condition::Cloudy,
                sunrise: None,
                sunset: None,
                moon_phase: None,
                precipitation_probability: None,
            })
            .collect();
        Ok(Forecast::new(
            CurrentConditions {
                observed_at: Utc::now(),
                temperature: 40.0,
                feels_like: None,
                humidity: None,
                wind_speed: 0.0,
                wind_direction: 0.0,
                condition: Condition::Cloudy,
                summary: None,
            },
            daily,
            Some(Tz::UTC),
            Units::Imperial,
        ))
    }
}

async fn static_generator(dir: &Path, days: usize) -> Generator {
    tokio::fs::write(dir.join("preprocess.svg"), TEMPLATE)
        .await
        .unwrap();
    Generator::new(
        Arc::new(StaticSource { days }),
        Location::new(0.0, 0.0),
        settings(dir, None),
    )
}

#[tokio::test]
async fn test_short_forecast_fails_cycle() {
    let dir = TempDir::new().unwrap();
    let generator = static_generator(dir.path(), 2).await;

    let err = generator.run_once().await.unwrap_err();
    assert!(matches!(
        err,
        CycleError::Render(RenderError::Forecast(WeatherError::InsufficientForecast {
            needed: 4,
            got: 2
        }))
    ));
    assert!(!dir.path().join("output").join("output.svg").exists());
}

#[tokio::test]
async fn test_scheduler_runs_on_start_and_drains() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(static_generator(dir.path(), 4).await);
    let status = StatusHandle::new(Vendor::Tomorrow);
    // Far enough out that only the start-up cycle runs.
    let schedule = Schedule::parse("0 0 0 1 1 * 2099").unwrap();
    let scheduler = Scheduler::new(schedule, Tz::UTC, generator, status.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    scheduler.run(cancel, true).await;

    let snapshot = status.snapshot();
    assert_eq!(snapshot.runs, 1);
    assert_eq!(snapshot.in_flight, 0);
    assert!(snapshot.is_healthy());
    assert!(dir.path().join("output").join("output.svg").exists());
}
