use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use retina_serve::{
    router, AppState, Classifier, ElementType, InputSpec, LabelTable, Layout, ModelError,
    ModelInput, ModelSlot, ModelSource, ScoreTransform,
};

const BOUNDARY: &str = "retina-test-boundary";

/// Scores each class by how close the image's mean brightness is to it.
struct Brightness;

impl Classifier for Brightness {
    fn input_spec(&self) -> InputSpec {
        InputSpec {
            height: 8,
            width: 8,
            layout: Layout::Nhwc,
            element: ElementType::F32,
        }
    }

    fn output_len(&self) -> Option<usize> {
        Some(5)
    }

    fn infer(&self, input: &ModelInput) -> Result<Vec<f32>, ModelError> {
        self.input_spec().check(input)?;
        let ModelInput::F32(tensor) = input else {
            unreachable!("checked above");
        };
        let mean = tensor.mean().unwrap_or(0.0);
        Ok((0..5)
            .map(|i| 1.0 - (mean - i as f32 / 4.0).abs())
            .collect())
    }
}

#[derive(Default)]
struct Source {
    loads: AtomicUsize,
}

impl ModelSource for Source {
    fn load(&self, _path: &Path) -> Result<Arc<dyn Classifier>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Brightness))
    }
}

fn model_file(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("retina-api-{}-{name}.onnx", std::process::id()));
    std::fs::write(&path, b"onnx").unwrap();
    path
}

fn app_with(path: PathBuf, source: Arc<Source>) -> Router {
    let slot = ModelSlot::new(source, path, LabelTable::retinopathy());
    router(
        Arc::new(AppState::new(slot, "Retinopathy API", ScoreTransform::Raw)),
        1024 * 1024,
    )
}

fn png(image: DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

fn multipart(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Body> {
    let disposition = match filename {
        Some(f) => format!("form-data; name=\"{field}\"; filename=\"{f}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn root_reports_service_name() {
    let app = app_with(model_file("root"), Arc::default());
    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "message": "Retinopathy API running" }));
}

#[tokio::test]
async fn health_flips_to_loaded_after_first_prediction() {
    let source = Arc::new(Source::default());
    let app = app_with(model_file("health"), source.clone());

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], false);
    assert_eq!(source.loads.load(Ordering::SeqCst), 0);

    let image = png(DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 20, Rgb([128, 128, 128]))));
    let (status, _) = send(&app, multipart("file", Some("eye.png"), &image)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["input_shape"], serde_json::json!([1, 8, 8, 3]));
    assert!(body["loaded_at"].is_string());
}

#[tokio::test]
async fn predicts_stage_with_confidence_and_all_scores() {
    let source = Arc::new(Source::default());
    let app = app_with(model_file("predict"), source.clone());

    let white = png(DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([255]))));
    let (status, body) = send(&app, multipart("file", Some("fundus.png"), &white)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predicted_stage"], "Proliferative DR");
    assert_eq!(body["confidence"].as_f64(), Some(1.0));
    let all = body["all_probabilities"].as_object().unwrap();
    assert_eq!(all.len(), 5);
    assert!(all.contains_key("No DR"));

    let black = png(DynamicImage::ImageRgb8(RgbImage::from_pixel(9, 40, Rgb([0, 0, 0]))));
    let (status, body) = send(&app, multipart("file", Some("dark.png"), &black)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predicted_stage"], "No DR");

    assert_eq!(source.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_file_field_is_400() {
    let app = app_with(model_file("nofield"), Arc::default());
    let (status, body) = send(&app, multipart("image", Some("eye.png"), b"bytes")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, serde_json::json!({ "error": "No file part" }));

    let not_multipart = Request::builder()
        .method("POST")
        .uri("/predict")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, not_multipart).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file part");
}

#[tokio::test]
async fn empty_filename_is_400() {
    let app = app_with(model_file("noname"), Arc::default());
    let (status, body) = send(&app, multipart("file", Some(""), b"bytes")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, serde_json::json!({ "error": "No selected file" }));
}

#[tokio::test]
async fn upload_over_body_limit_is_413() {
    let source = Arc::new(Source::default());
    let app = app_with(model_file("oversized"), source.clone());

    let huge = vec![0u8; 2 * 1024 * 1024];
    let (status, body) = send(&app, multipart("file", Some("huge.png"), &huge)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["error"].as_str().unwrap().starts_with("Upload too large"));
    assert_eq!(source.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn undecodable_uploads_are_400_not_500() {
    let source = Arc::new(Source::default());
    let app = app_with(model_file("garbage"), source.clone());

    for payload in [&b""[..], &b"GIF89a but not really"[..]] {
        let (status, body) = send(&app, multipart("file", Some("eye.png"), payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid image"));
    }
    assert_eq!(source.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_model_is_500_and_health_turns_unhealthy() {
    let path = std::env::temp_dir().join(format!("retina-api-{}-absent.onnx", std::process::id()));
    std::fs::remove_file(&path).ok();
    let app = app_with(path, Arc::default());

    let image = png(DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))));
    let (status, body) = send(&app, multipart("file", Some("eye.png"), &image)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, serde_json::json!({ "error": "Model unavailable" }));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["model_loaded"], false);
}
