//! Upload pipeline against HTTP inference services, as the binary wires it.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};
use std::io::Cursor;
use std::time::Duration;
use texture_backend::{config::Config, create_app, AppState};
use tower::ServiceExt;
use wall_estimator::BinaryMask;

const BOUNDARY: &str = "remote-inference-boundary";

fn requested_size(request: &Value) -> (u32, u32) {
    (
        request["width"].as_u64().unwrap_or(0) as u32,
        request["height"].as_u64().unwrap_or(0) as u32,
    )
}

/// Wall above the bottom fifth of the photo
async fn segmentation_service(Json(request): Json<Value>) -> Json<Value> {
    let (width, height) = requested_size(&request);
    let floor = height * 4 / 5;
    let mask = BinaryMask::from_fn(width, height, |_, y| y < floor);
    let png = mask.to_png_bytes().unwrap();
    Json(json!({ "mask": general_purpose::STANDARD.encode(png) }))
}

/// One wall polygon covering the whole photo
async fn geometry_service(Json(request): Json<Value>) -> Json<Value> {
    let (width, height) = requested_size(&request);
    let (right, bottom) = (width as i32 - 1, height as i32 - 1);
    Json(json!({ "polygons": [[[0, 0], [right, 0], [right, bottom], [0, bottom]]] }))
}

async fn unavailable_service() -> (StatusCode, &'static str) {
    (StatusCode::SERVICE_UNAVAILABLE, "model is warming up")
}

/// Serve the fake inference endpoints on an ephemeral port
async fn spawn_inference_server() -> String {
    let app = Router::new()
        .route("/segment", post(segmentation_service))
        .route("/layout", post(geometry_service))
        .route("/down", post(unavailable_service));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// App built from configuration only, the way `main` builds it
fn remote_app(dir: &tempfile::TempDir, segmentation_url: String, geometry_url: String) -> Router {
    let textures = dir.path().join("textures");
    std::fs::create_dir_all(&textures).unwrap();

    let mut config = Config::with_dirs(dir.path().join("data"), textures);
    config.segmentation_url = Some(segmentation_url);
    config.geometry_url = Some(geometry_url);
    config.inference_timeout = Duration::from_secs(10);

    create_app(AppState::from_config(config).unwrap())
}

fn upload_request(width: u32, height: u32) -> Request<Body> {
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([180, 160, 140])))
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"room.png\"\r\nContent-Type: image/png\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/prediction")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_upload_through_remote_services() {
    let base = spawn_inference_server().await;
    let dir = tempfile::tempdir().unwrap();
    let app = remote_app(&dir, format!("{base}/segment"), format!("{base}/layout"));

    let (status, body) = send_json(&app, upload_request(60, 40)).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["state"], "success");
    assert_eq!(body["generation"], 1);
    assert_eq!(body["polygons"], 1);
    // 60 x 32 rows of wall above the floor
    assert_eq!(body["fusion"]["segmentation_pixels"], 1920);
    assert_eq!(body["fusion"]["fused_pixels"], 1920);

    let request = Request::builder().uri("/room").body(Body::empty()).unwrap();
    let (_, room) = send_json(&app, request).await;
    assert_eq!(room["generation"], 1);
    assert_eq!(room["display"]["kind"], "photo");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_remote_service_commits_nothing() {
    let base = spawn_inference_server().await;
    let dir = tempfile::tempdir().unwrap();
    let app = remote_app(&dir, format!("{base}/down"), format!("{base}/layout"));

    let (status, body) = send_json(&app, upload_request(60, 40)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["state"], "error");
    assert_eq!(body["code"], "INFERENCE_ERROR");

    let request = Request::builder().uri("/room").body(Body::empty()).unwrap();
    let (_, room) = send_json(&app, request).await;
    assert!(room["generation"].is_null());
    assert_eq!(room["display"]["kind"], "empty");
}
