use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::ApiError;
use crate::loader::{ModelSlot, ModelStatus};
use crate::postprocess::{build_response, Prediction, ScoreTransform};
use crate::preprocess::{decode, Processor};

/// Shared state behind every route.
pub struct AppState {
    pub slot: ModelSlot,
    pub service_name: String,
    pub scores: ScoreTransform,
}

impl AppState {
    pub fn new(slot: ModelSlot, service_name: impl Into<String>, scores: ScoreTransform) -> Self {
        Self {
            slot,
            service_name: service_name.into(),
            scores,
        }
    }
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

async fn home(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "message": format!("{} running", state.service_name) }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    model_path: String,
    labels: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_shape: Option<[usize; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loaded_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let slot = &state.slot;
    let mut body = HealthResponse {
        status: "healthy",
        model_loaded: false,
        model_path: slot.path().display().to_string(),
        labels: slot.labels().len(),
        input_shape: None,
        loaded_at: None,
        error: None,
    };

    let code = match slot.status() {
        ModelStatus::NotLoaded => StatusCode::OK,
        ModelStatus::Loaded { loaded_at, input } => {
            body.model_loaded = true;
            body.input_shape = Some(input.shape());
            body.loaded_at = Some(loaded_at.to_rfc3339());
            StatusCode::OK
        }
        ModelStatus::Failed { error, .. } => {
            body.status = "unhealthy";
            body.error = Some(error);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (code, Json(body))
}

/// Pull the bytes of the `file` upload out of the form.
///
/// A `file` part without a filename is a plain form value, not an upload.
async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(String, Vec<u8>), ApiError> {
    let mut multipart = multipart.map_err(|e| {
        debug!(error = %e, "request is not multipart");
        ApiError::MissingFile
    })?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };
        if filename.is_empty() {
            return Err(ApiError::EmptyFilename);
        }
        let bytes = field.bytes().await?;
        return Ok((filename, bytes.to_vec()));
    }
    Err(ApiError::MissingFile)
}

async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let (filename, bytes) = read_upload(multipart).await?;

    let image = tokio::task::spawn_blocking(move || decode(&bytes))
        .await
        .map_err(|e| {
            error!(error = %e, "decode task failed");
            ApiError::Internal
        })?
        .map_err(|e| {
            debug!(file = %filename, error = %e, "rejecting upload");
            ApiError::from(e)
        })?;

    let classifier = state.slot.ensure_loaded().await?;

    let spec = classifier.input_spec();
    let source_dims = (image.width(), image.height());
    let scores = tokio::task::spawn_blocking(move || {
        let input = Processor::new(spec).prepare(image)?;
        Ok::<_, ApiError>(classifier.infer(&input)?)
    })
    .await
    .map_err(|e| {
        error!(error = %e, "inference task failed");
        ApiError::Internal
    })?
    .inspect_err(|_| {
        error!(file = %filename, source = ?source_dims, input = ?spec.shape(), "prediction failed");
    })?;

    let prediction = build_response(&scores, state.slot.labels(), state.scores)?;
    info!(
        file = %filename,
        stage = %prediction.predicted_stage,
        confidence = prediction.confidence,
        "prediction"
    );
    Ok(Json(prediction))
}
