use std::path::PathBuf;

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures turning uploaded bytes into a model input tensor.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Failures loading the model artifact or running it.
///
/// Messages are kept as strings so a sticky configuration error can be
/// handed out to every later caller.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model file not found at {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to load model from {}: {reason}", .path.display())]
    LoadFailure { path: PathBuf, reason: String },
    #[error("unsupported model input: {0}")]
    UnsupportedInput(String),
    #[error("input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ModelError {
    /// Whether a later load attempt may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ModelError::Configuration(_) | ModelError::UnsupportedInput(_))
    }
}

/// Failures reading a label table file.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read label file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("label file {} contains no labels", .0.display())]
    Empty(PathBuf),
    #[error("duplicate label {0:?}")]
    Duplicate(String),
}

/// Errors surfaced to HTTP callers. Details stay in the logs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file part")]
    MissingFile,
    #[error("No selected file")]
    EmptyFilename,
    #[error("Malformed upload: {0}")]
    Multipart(String),
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Model unavailable")]
    ModelUnavailable,
    #[error("Prediction failed")]
    Prediction,
    #[error("Internal error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::EmptyFilename
            | ApiError::Multipart(_)
            | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ModelUnavailable | ApiError::Prediction | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::Multipart(err.body_text())
        }
    }
}

impl From<PreprocessError> for ApiError {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::Decode(msg) => ApiError::InvalidImage(msg),
            other => {
                tracing::error!(error = %other, "preprocessing failed");
                ApiError::Prediction
            }
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match &err {
            ModelError::NotFound(_) | ModelError::LoadFailure { .. } => {
                tracing::error!(error = %err, "model could not be loaded");
                ApiError::ModelUnavailable
            }
            _ => {
                tracing::error!(error = %err, "prediction failed");
                ApiError::Prediction
            }
        }
    }
}
