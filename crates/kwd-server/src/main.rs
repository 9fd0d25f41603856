use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use kwd_core::{Config, ConfigError};
use kwd_server::{run_cycle, server, Generator, GeneratorSettings, Schedule, Scheduler, StatusHandle};
use kwd_weather::{build_source, SourceSettings};

/// How long shutdown waits for running cycles
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Render a weather dashboard for an e-reader on a cron schedule and serve it over HTTP.
#[derive(Debug, Parser)]
#[command(name = "kindle-weather", version, about)]
struct Cli {
    /// Run a single cycle and exit; non-zero status on failure
    #[arg(long)]
    once: bool,

    /// Run the scheduler without the HTTP server
    #[arg(long)]
    no_serve: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    kwd_core::init_logging()?;

    let (config, _) = Config::load_validated().inspect_err(|e: &ConfigError| {
        tracing::error!(hint = e.hint(), "{}", e);
    })?;
    tracing::info!(
        vendor = %config.vendor,
        key_from = config.api_key_var,
        location = %config.location,
        output_dir = %config.output_dir.display(),
        "Loaded configuration"
    );

    let schedule = Schedule::parse(&config.schedule)?;

    let mut source_settings = SourceSettings::new(config.api_key.clone());
    source_settings.units = config.units;
    source_settings.timezone = config.timezone;
    source_settings.base_url = config.api_base_url.clone();
    source_settings.timeout = config.http_timeout;
    let source = build_source(config.vendor, source_settings)?;

    let settings = GeneratorSettings::from_config(&config)?;
    if settings.rasterizer.is_none() {
        tracing::info!("PNG output disabled");
    }
    let generator = Arc::new(Generator::new(source, config.location, settings));
    match kwd_render::remove_stale_temps(&generator.output().dir).await {
        Ok(0) => {}
        Ok(removed) => tracing::info!(removed, "Removed temporary files from an earlier run"),
        Err(e) => tracing::warn!(error = %e, "Could not clean the output directory"),
    }
    let status = StatusHandle::new(config.vendor);

    if cli.once {
        let report = run_cycle(&generator, &status).await?;
        tracing::info!(svg = %report.svg_path.display(), "Single cycle complete");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let scheduler = Scheduler::new(
        schedule,
        config.schedule_zone(),
        Arc::clone(&generator),
        status.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone(), config.run_on_start));

    let served = if cli.no_serve {
        cancel.cancelled().await;
        Ok(())
    } else {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
        tracing::info!(addr = %config.listen_addr, "Serving output");
        let app = server::router(status, &generator.output().dir);
        server::serve(listener, app, cancel.clone())
            .await
            .context("HTTP server error")
    };

    // The server may have stopped on its own; stop the scheduler too.
    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler_handle)
        .await
        .is_err()
    {
        tracing::warn!("Running cycles did not finish in time");
    }
    tracing::info!("Shutdown complete");
    served
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
