//! Health and metrics endpoints

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    version_full: String,
    time_zone: String,
    threads: usize,
    memory_usage_mb: f64,
    healthy_engine: bool,
    database: bool,
    uptime_secs: u64,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let memory_usage_mb = process_memory_mb().unwrap_or(0.0);
    let database = crate::db::health_check(&state.db).await;

    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        version_full: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        time_zone: std::env::var("TZ").unwrap_or_else(|_| "UTC".to_string()),
        threads,
        memory_usage_mb: (memory_usage_mb * 100.0).round() / 100.0,
        healthy_engine: state.pool.is_healthy(),
        database,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

fn process_memory_mb() -> Option<f64> {
    let pid = Pid::from_u32(std::process::id());
    let system = System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory()),
    );
    let process = system.process(pid)?;
    Some(process.memory() as f64 / 1024.0 / 1024.0)
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                b"Internal Server Error".to_vec(),
            )
        }
    }
}
