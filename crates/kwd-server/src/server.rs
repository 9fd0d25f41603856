//! HTTP surface: `/health` plus the output directory as static files.

use std::path::Path;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::status::{GenerationStatus, StatusHandle};

#[derive(Debug, Serialize)]
struct HealthBody {
    healthy: bool,
    #[serde(flatten)]
    status: GenerationStatus,
}

async fn health(State(status): State<StatusHandle>) -> impl IntoResponse {
    let status = status.snapshot();
    let healthy = status.is_healthy();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthBody { healthy, status }))
}

/// Hidden files in the output directory are in-progress writes.
async fn hide_dotfiles(request: Request, next: Next) -> Response {
    let hidden = request.uri().path().split('/').any(|segment| {
        segment.starts_with('.')
            || segment
                .get(..3)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("%2e"))
    });
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// `/health` and every file under `output_dir` (`/output.png`, `/output.svg`)
pub fn router(status: StatusHandle, output_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback_service(ServeDir::new(output_dir))
        .layer(middleware::from_fn(hide_dotfiles))
        .layer(TraceLayer::new_for_http())
        .with_state(status)
}

/// Serve until `cancel` fires, then drain open connections.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
