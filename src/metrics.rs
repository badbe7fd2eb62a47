//! Prometheus metrics for reelgate.
//!
//! All metric types use atomics internally (no locks on the hot path). This
//! is operational telemetry; the per-upload event log lives in the
//! `upload_metrics` table.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder, TEXT_FORMAT,
};
use std::sync::Arc;
use std::time::Instant;

use crate::api::handlers::AppState;

/// All Prometheus metrics for reelgate.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- HTTP Requests --
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // -- Uploads --
    pub sessions_created_total: IntCounter,
    pub chunks_received_total: IntCounter,
    pub chunk_corrections_total: IntCounter,
    pub bytes_received_total: IntCounter,
    pub completions_total: IntCounter,
    pub enqueue_failures_total: IntCounter,
    pub reaper_aborts_total: IntCounter,
    pub rate_limited_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        // -- Process & Build --
        let process_start_time_seconds =
            Gauge::new("process_start_time_seconds", "Start time of the process").unwrap();
        registry
            .register(Box::new(process_start_time_seconds.clone()))
            .unwrap();

        let build_info = GaugeVec::new(
            Opts::new("reelgate_build_info", "Build information"),
            &["version", "storage_type"],
        )
        .unwrap();
        registry.register(Box::new(build_info.clone())).unwrap();

        // Register standard process metrics (RSS, CPU, open FDs on Linux)
        #[cfg(target_os = "linux")]
        {
            let pc = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(pc));
        }

        // -- HTTP Requests --
        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "reelgate_http_requests_total",
                "Total HTTP requests by method, status, and operation",
            ),
            &["method", "status", "operation"],
        )
        .unwrap();
        registry
            .register(Box::new(http_requests_total.clone()))
            .unwrap();

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "reelgate_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "operation"],
        )
        .unwrap();
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .unwrap();

        // -- Uploads --
        let sessions_created_total = IntCounter::new(
            "reelgate_sessions_created_total",
            "Upload sessions created",
        )
        .unwrap();
        registry
            .register(Box::new(sessions_created_total.clone()))
            .unwrap();

        let chunks_received_total =
            IntCounter::new("reelgate_chunks_received_total", "Chunks stored as parts").unwrap();
        registry
            .register(Box::new(chunks_received_total.clone()))
            .unwrap();

        let chunk_corrections_total = IntCounter::new(
            "reelgate_chunk_corrections_total",
            "Misaligned chunks answered with a 308 correction",
        )
        .unwrap();
        registry
            .register(Box::new(chunk_corrections_total.clone()))
            .unwrap();

        let bytes_received_total = IntCounter::new(
            "reelgate_bytes_received_total",
            "Total chunk payload bytes accepted",
        )
        .unwrap();
        registry
            .register(Box::new(bytes_received_total.clone()))
            .unwrap();

        let completions_total = IntCounter::new(
            "reelgate_completions_total",
            "Uploads finalized at the object store",
        )
        .unwrap();
        registry
            .register(Box::new(completions_total.clone()))
            .unwrap();

        let enqueue_failures_total = IntCounter::new(
            "reelgate_enqueue_failures_total",
            "Transcode job enqueues that exhausted their retries",
        )
        .unwrap();
        registry
            .register(Box::new(enqueue_failures_total.clone()))
            .unwrap();

        let reaper_aborts_total = IntCounter::new(
            "reelgate_reaper_aborts_total",
            "Sessions aborted by the expiry reaper",
        )
        .unwrap();
        registry
            .register(Box::new(reaper_aborts_total.clone()))
            .unwrap();

        let rate_limited_total = IntCounterVec::new(
            Opts::new(
                "reelgate_rate_limited_total",
                "Requests rejected by the per-principal limiters",
            ),
            &["limiter"],
        )
        .unwrap();
        registry
            .register(Box::new(rate_limited_total.clone()))
            .unwrap();

        Metrics {
            registry,
            process_start_time_seconds,
            build_info,
            http_requests_total,
            http_request_duration_seconds,
            sessions_created_total,
            chunks_received_total,
            chunk_corrections_total,
            bytes_received_total,
            completions_total,
            enqueue_failures_total,
            reaper_aborts_total,
            rate_limited_total,
        }
    }
}

/// Classify an upload-API request into a bounded operation label.
pub fn classify_operation(method: &str, path: &str) -> &'static str {
    match path {
        "/health" => return "health",
        "/metrics" => return "metrics",
        _ => {}
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        ("POST", ["uploads"]) => "create_session",
        ("PUT", ["uploads", _]) => "put_chunk",
        ("DELETE", ["uploads", _]) => "abort",
        ("GET", ["uploads", _, "status"]) => "status",
        ("PUT", ["uploads", _, "draft"]) => "update_draft",
        _ => "unknown",
    }
}

/// Axum middleware that records HTTP request metrics.
pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let metrics = match &state.metrics {
        Some(m) => m,
        None => return next.run(request).await,
    };

    let method = request.method().to_string();
    let operation = classify_operation(&method, request.uri().path());

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();

    metrics
        .http_requests_total
        .with_label_values(&[&method, &status, operation])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, operation])
        .observe(duration);

    response
}

/// Handler for GET /metrics — returns Prometheus text format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let metrics = match &state.metrics {
        Some(m) => m,
        None => {
            return (StatusCode::NOT_FOUND, "Metrics not enabled").into_response();
        }
    };

    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response();
    }

    (StatusCode::OK, [("content-type", TEXT_FORMAT)], buffer).into_response()
}
