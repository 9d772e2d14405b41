//! Health check HTTP endpoint for deployment platform monitoring.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::database::Database;
use crate::pipeline::ModerationPipeline;

/// State shared with the health handler.
#[derive(Clone)]
pub struct HealthState {
    pub db: Arc<Database>,
    pub pipeline: Arc<ModerationPipeline>,
}

/// Health report body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub tracked_chats: usize,
    pub active_purges: usize,
    pub build: BuildInfo,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct BuildInfo {
    pub timestamp: &'static str,
    pub commit: &'static str,
}

impl BuildInfo {
    fn current() -> Self {
        Self {
            timestamp: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
            commit: option_env!("GIT_COMMIT").unwrap_or("unknown"),
        }
    }
}

/// Collect the current health report.
pub async fn health_report(state: &HealthState) -> HealthReport {
    let database = match state.db.health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            "unavailable"
        }
    };

    HealthReport {
        status: if database == "ok" { "ok" } else { "degraded" },
        database,
        tracked_chats: state.pipeline.tracked_chats().await,
        active_purges: state.pipeline.active_purges().await,
        build: BuildInfo::current(),
    }
}

/// Health check handler. Degraded health answers 503.
async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = health_report(&state).await;
    let code = if report.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/", get(health_handler))
        .with_state(state)
}

/// Start the health check HTTP server.
pub async fn start_health_server(port: u16, state: HealthState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(port = port, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await
}

/// Spawn the health check server as a background task.
pub fn spawn_health_server(port: u16, state: HealthState) {
    tokio::spawn(async move {
        if let Err(e) = start_health_server(port, state).await {
            tracing::error!(error = %e, port = port, "Health check server failed");
        }
    });
}
