// Main entry point for the screen translation overlay server

use ocr_overlay::{
    core::{
        types::{AppState, OverlayRegion, StageTimings},
        Config,
    },
    orchestration::{spawn_worker, OverlayPipeline},
    utils::{decode_rgba_async, encode_png_async, png_data_url, Metrics},
    WorkerError,
};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::new().context("Failed to load configuration")?);

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "ocr_overlay={},ort=off",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== OCR OVERLAY ===");
    info!(
        "Config: target={} threshold={} batch={} fonts={:?}",
        config.target_lang(),
        config.detection.confidence_threshold,
        config.detection.batch_size,
        config.rendering.font_families
    );

    let metrics = Metrics::new();

    // Models must load before any request is accepted
    let pipeline = OverlayPipeline::load(&config, Some(metrics.clone()))?;
    let (worker, _worker_task) = spawn_worker(pipeline, config.server.worker_queue_depth);

    let state = AppState {
        config: config.clone(),
        worker,
        metrics,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/overlay", post(overlay))
        .with_state(state)
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(cors);

    let addr = format!("{}:{}", config.server_host(), config.server_port());
    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /         - Root endpoint");
    info!("  GET  /health   - Health check");
    info!("  GET  /metrics  - Prometheus metrics");
    info!("  GET  /stats    - Detailed statistics");
    info!("  POST /overlay  - Translate one capture (multipart/form-data)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> &'static str {
    "OCR Overlay - detect, translate and redraw on-screen text"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": if state.worker.is_closed() { "degraded" } else { "healthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "busy": state.worker.is_busy(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let snapshot = state.metrics.snapshot();
    serde_json::to_value(snapshot).map(Json).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to serialize metrics: {}", e),
        )
    })
}

#[derive(Serialize)]
struct OverlayResponse {
    width: u32,
    height: u32,
    regions: Vec<OverlayRegion>,
    translations: Vec<String>,
    timings: StageTimings,
    data_url: String,
}

/// Translate one screen capture
///
/// # Request Format:
/// - multipart/form-data
/// - Field "image": the capture (PNG/JPEG)
/// - Field "target_lang" (optional): overrides the configured target language
///
/// # Response:
/// - 200 with regions, timings and the rendered overlay as a PNG data URL
/// - 409 while another run is in flight
async fn overlay(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<OverlayResponse>, (StatusCode, String)> {
    state.metrics.record_endpoint_request("/overlay");

    let mut image_bytes = None;
    let mut target_lang = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "image" => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {}", e)))?;
                image_bytes = Some(data.to_vec());
            }
            "target_lang" => {
                let lang = field.text().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("target_lang read error: {}", e))
                })?;
                let lang = lang.trim().to_uppercase();
                if !lang.is_empty() {
                    target_lang = Some(lang);
                }
            }
            _ => {}
        }
    }

    let Some(image_bytes) = image_bytes else {
        return Err((StatusCode::BAD_REQUEST, "No image provided".to_string()));
    };

    let image = decode_rgba_async(image_bytes)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid image: {:#}", e)))?;
    let (width, height) = image.dimensions();
    info!("Received overlay request ({}x{})", width, height);

    let output = state
        .worker
        .try_submit(image, target_lang)
        .await
        .map_err(|e| match e {
            WorkerError::Busy => {
                state.metrics.record_run_rejected();
                (StatusCode::CONFLICT, e.to_string())
            }
            WorkerError::Closed => {
                error!("Pipeline worker is gone");
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            WorkerError::Pipeline(err) => {
                error!("Overlay run failed: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Processing failed: {}", err),
                )
            }
        })?;

    let png = encode_png_async(output.image).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode overlay: {:#}", e),
        )
    })?;

    let regions = output
        .regions
        .iter()
        .zip(&output.translations)
        .map(|(region, translation)| OverlayRegion {
            quad: *region.quad(),
            text: region.text().to_string(),
            confidence: region.confidence(),
            translation: translation.clone(),
        })
        .collect();

    Ok(Json(OverlayResponse {
        width,
        height,
        regions,
        translations: output.translations,
        timings: output.timings,
        data_url: png_data_url(&png),
    }))
}
