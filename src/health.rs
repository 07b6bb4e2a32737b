//! Diagnostics HTTP surface: `GET /health` and `GET /metrics`.
//!
//! Router built the way an axum-based proxy router gets built
//! (`axum::Router::new().route(...)`, `axum::serve` with graceful shutdown
//! via a `watch` receiver), serving a second small listener on its own port
//! rather than sharing the proxy capturer's.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::diagnostics::DiagnosticsSnapshot;
use crate::pipeline::Pipeline;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct HealthState {
    pipeline: Pipeline,
    service_name: Arc<str>,
    started_at: Instant,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
    service_name: String,
    uptime_seconds: u64,
    platform: String,
    memory_rss_bytes: u64,
    timestamp: String,
    diagnostics: DiagnosticsBody,
}

#[derive(Serialize)]
struct DiagnosticsBody {
    total_events_sent: u64,
    total_events_failed: u64,
    in_memory_queue: u64,
    persisted_queue: u64,
    dead_letter_queue: u64,
    last_success_at: Option<chrono::DateTime<chrono::Utc>>,
    last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    last_error: String,
    throughput_per_min: u64,
}

impl From<DiagnosticsSnapshot> for DiagnosticsBody {
    fn from(s: DiagnosticsSnapshot) -> Self {
        Self {
            total_events_sent: s.total_events_sent,
            total_events_failed: s.total_events_failed,
            in_memory_queue: s.in_memory_queue,
            persisted_queue: s.persisted_queue,
            dead_letter_queue: s.dead_letter_queue,
            last_success_at: s.last_success_at,
            last_failure_at: s.last_failure_at,
            last_error: s.last_error,
            throughput_per_min: s.throughput_per_min,
        }
    }
}

/// Builds the `/health` + `/metrics` routes. Exposed separately from
/// [`run`] so the proxy capturer can merge these routes into its own router
/// when both are enabled, instead of standing up a second listener.
pub fn router(pipeline: Pipeline, service_name: impl Into<String>) -> Router {
    let state = HealthState {
        pipeline,
        service_name: service_name.into().into(),
        started_at: Instant::now(),
    };
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

pub async fn run(
    pipeline: Pipeline,
    service_name: impl Into<String>,
    port: u16,
    mut stop: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = router(pipeline, service_name);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "health endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let snapshot = state.pipeline.diagnostics.snapshot();
    let status = if snapshot.is_degraded() { "degraded" } else { "ok" };
    let memory_rss_bytes = current_rss_bytes();

    Json(HealthBody {
        status,
        version: VERSION,
        service_name: state.service_name.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        memory_rss_bytes,
        timestamp: chrono::Utc::now().to_rfc3339(),
        diagnostics: snapshot.into(),
    })
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let snapshot = state.pipeline.diagnostics.snapshot();
    (
        [("content-type", "text/plain; version=0.0.4")],
        render_prometheus(&snapshot),
    )
}

/// Hand-written Prometheus text exposition: no metrics-registry
/// crate is pulled in for four lines of `TYPE`/value text.
fn render_prometheus(snapshot: &DiagnosticsSnapshot) -> String {
    let mut out = String::new();

    out.push_str("# TYPE sidecar_in_memory_queue gauge\n");
    out.push_str(&format!("sidecar_in_memory_queue {}\n", snapshot.in_memory_queue));

    out.push_str("# TYPE sidecar_persisted_queue gauge\n");
    out.push_str(&format!("sidecar_persisted_queue {}\n", snapshot.persisted_queue));

    out.push_str("# TYPE sidecar_dead_letter_queue gauge\n");
    out.push_str(&format!("sidecar_dead_letter_queue {}\n", snapshot.dead_letter_queue));

    out.push_str("# TYPE events_sent_total counter\n");
    out.push_str(&format!("events_sent_total {}\n", snapshot.total_events_sent));

    out.push_str("# TYPE events_failed_total counter\n");
    out.push_str(&format!("events_failed_total {}\n", snapshot.total_events_failed));

    out.push_str("# TYPE throughput_per_min gauge\n");
    out.push_str(&format!("throughput_per_min {}\n", snapshot.throughput_per_min));

    out.push_str("# TYPE last_error gauge\n");
    if snapshot.last_error.is_empty() {
        out.push_str("last_error{message=\"\"} 0\n");
    } else {
        let escaped = snapshot.last_error.replace('\\', "\\\\").replace('"', "\\\"");
        out.push_str(&format!("last_error{{message=\"{escaped}\"}} 1\n"));
    }

    out
}

#[cfg(target_os = "linux")]
fn current_rss_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| s.split_whitespace().nth(1).map(str::to_string))
        .and_then(|pages| pages.parse::<u64>().ok())
        .map(|pages| pages * 4096)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn current_rss_bytes() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnalyticsWriter;
    use crate::buffer::Buffer;
    use crate::diagnostics::Diagnostics;
    use crate::diskqueue::DiskQueue;
    use crate::scrubber::Scrubber;
    use std::sync::Arc;

    fn pipeline() -> Pipeline {
        let dir = tempfile::tempdir().unwrap();
        Pipeline {
            buffer: Arc::new(Buffer::new(10)),
            scrubber: Arc::new(Scrubber::empty()),
            diagnostics: Arc::new(Diagnostics::new()),
            disk_queue: Arc::new(DiskQueue::open(dir.path()).unwrap()),
            forwarder: None,
            analytics: None,
        }
    }

    #[test]
    fn prometheus_output_is_well_formed_when_healthy() {
        let snapshot = Diagnostics::new().snapshot();
        let body = render_prometheus(&snapshot);
        assert!(body.contains("events_sent_total 0"));
        assert!(body.contains("last_error{message=\"\"} 0"));
    }

    #[test]
    fn prometheus_output_escapes_last_error() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_failure(1, "status \"500\"");
        let body = render_prometheus(&diagnostics.snapshot());
        assert!(body.contains("last_error{message=\"status \\\"500\\\"\"} 1"));
    }

    #[tokio::test]
    async fn health_handler_reports_ok_when_no_errors_recorded() {
        let state = HealthState {
            pipeline: pipeline(),
            service_name: "svc".into(),
            started_at: Instant::now(),
        };
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let _ = AnalyticsWriter::open; // keep import referenced for future tests
    }
}
