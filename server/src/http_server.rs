// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use canonical_error::{CanonicalError, CanonicalErrorCode,
                      internal_error, invalid_argument_error, not_found_error};
use log::{debug, error};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::{services::ServeDir, cors::CorsLayer, cors::Any};

use astrocam_elements::camera_trait::{ControlMap, ControlRange, ImagingDevice,
                                      StreamSelector};

use crate::controls::{SliderPositions, controls_from_request,
                      safe_set_controls, slider_positions};
use crate::rate_estimator::format_rate;
use crate::shared_state::{SharedState, SolveRecord, SolveStatus};
use crate::solve_engine::{SolveEngine, SolveRequestOutcome};
use crate::system_stats::{format_stats, read_system_stats};

// What the request handlers operate on.
pub struct AppState {
    pub camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,
    pub state: Arc<SharedState>,
    pub solve_engine: Arc<SolveEngine>,

    // Read from the device once; these don't change.
    model: String,
    pixel_array_size: (u32, u32),
    control_ranges: BTreeMap<String, ControlRange>,

    // The device's controls as of the last change made through set_controls.
    controls: tokio::sync::RwLock<ControlMap>,
}

impl AppState {
    pub async fn new(camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,
                     state: Arc<SharedState>,
                     solve_engine: Arc<SolveEngine>) -> Self {
        let locked_camera = camera.lock().await;
        let model = locked_camera.model();
        let pixel_array_size = locked_camera.pixel_array_size();
        let control_ranges = locked_camera.control_ranges();
        let controls = tokio::sync::RwLock::new(locked_camera.current_controls());
        drop(locked_camera);
        AppState{camera, state, solve_engine,
                 model, pixel_array_size, control_ranges, controls}
    }
}

fn http_status(code: CanonicalErrorCode) -> StatusCode {
    match code {
        CanonicalErrorCode::NotFound => StatusCode::NOT_FOUND,
        CanonicalErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        CanonicalErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// Handler error; rendered as a plain-text message.
#[derive(Debug)]
pub struct HttpError(CanonicalError);

impl From<CanonicalError> for HttpError {
    fn from(e: CanonicalError) -> Self {
        HttpError(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = http_status(self.0.code);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self.0.message);
        }
        (status, self.0.message).into_response()
    }
}

#[derive(Serialize)]
struct DeviceProperties {
    model: String,
    pixel_array_size: [u32; 2],
    #[serde(flatten)]
    sliders: SliderPositions,
}

pub fn create_router(app: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/set_controls", post(set_controls))
        .route("/solve", post(solve))
        .route("/solve_status", get(solve_status))
        .route("/solved_field.jpg", get(solved_field))
        .route("/toggle_pause", post(toggle_pause))
        .route("/get_pause_state", get(get_pause_state))
        .route("/set_test_mode", post(set_test_mode))
        .route("/get_fps", get(get_fps))
        .route("/get_solve_fps", get(get_solve_fps))
        .route("/capture_lores_jpeg", get(capture_lores_jpeg))
        .route("/snapshot", get(snapshot))
        .route("/system-stats", get(system_stats))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(app)
}

fn jpeg_response(jpeg: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "image/jpeg"), (header::CACHE_CONTROL, "no-cache")],
     jpeg).into_response()
}

// Request body as a JSON object.
fn parse_object(body: &Bytes) -> Result<serde_json::Map<String, Value>, CanonicalError> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        invalid_argument_error(format!("Invalid JSON body: {}", e).as_str())
    })?;
    match value {
        Value::Object(object) => Ok(object),
        other => Err(invalid_argument_error(
            format!("Expected a JSON object, got {}", other).as_str())),
    }
}

// Served from AppState without waiting on the device.
async fn index(State(app): State<Arc<AppState>>) -> Json<DeviceProperties> {
    let (width, height) = app.pixel_array_size;
    let controls = app.controls.read().await;
    Json(DeviceProperties{
        model: app.model.clone(),
        pixel_array_size: [width, height],
        sliders: slider_positions(&app.control_ranges, &controls),
    })
}

async fn video_feed(State(app): State<Arc<AppState>>) -> Response {
    match app.state.frame().await {
        Some(frame) => jpeg_response(frame.jpeg.as_ref().clone()),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn set_controls(State(app): State<Arc<AppState>>, body: Bytes)
                      -> Result<StatusCode, HttpError> {
    let request = parse_object(&body)?;
    let controls = controls_from_request(&request, &app.control_ranges);
    if controls.is_empty() {
        debug!("No usable controls in {:?}", request);
        return Ok(StatusCode::NO_CONTENT);
    }
    let mut locked_camera = app.camera.lock().await;
    let result = safe_set_controls(&mut **locked_camera, &controls).await;
    *app.controls.write().await = locked_camera.current_controls();
    result?;
    Ok(StatusCode::NO_CONTENT)
}

async fn solve(State(app): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    match app.solve_engine.request_solve().await {
        SolveRequestOutcome::Started{..} =>
            (StatusCode::ACCEPTED, Json(json!({"status": "solving"}))),
        SolveRequestOutcome::Paused =>
            (StatusCode::OK, Json(json!({"status": "paused"}))),
        SolveRequestOutcome::Busy =>
            (StatusCode::CONFLICT, Json(json!({"status": "busy"}))),
    }
}

// Flattens a solve record into the status object the UI polls. Results are
// reported only in the Solved and Failed states.
pub fn solve_status_json(record: &SolveRecord) -> Value {
    let mut status = serde_json::Map::new();
    status.insert("status".to_string(), json!(record.status));
    let reportable = matches!(record.status, SolveStatus::Solved | SolveStatus::Failed);
    if let (true, Some(result)) = (reportable, &record.result) {
        if let Some(astrometry) = &result.astrometry {
            if let Value::Object(fields) = json!(astrometry) {
                status.extend(fields);
            }
        }
        if let Some(url) = &result.solved_image_url {
            status.insert("solved_image_url".to_string(), json!(url));
        }
    }
    if record.status == SolveStatus::Failed {
        if let Some(error) = &record.error {
            status.insert("error".to_string(), json!(error));
        }
    }
    Value::Object(status)
}

async fn solve_status(State(app): State<Arc<AppState>>) -> Json<Value> {
    Json(solve_status_json(&app.state.solve_record().await))
}

async fn solved_field(State(app): State<Arc<AppState>>) -> Result<Response, HttpError> {
    match app.state.solved_image().await {
        Some(solved) => Ok(jpeg_response(solved.jpeg.as_ref().clone())),
        None => Err(not_found_error("No solved image yet").into()),
    }
}

async fn toggle_pause(State(app): State<Arc<AppState>>) -> Json<Value> {
    let paused = app.state.toggle_paused();
    debug!("Paused: {}", paused);
    Json(json!({"paused": paused}))
}

async fn get_pause_state(State(app): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"paused": app.state.paused()}))
}

async fn set_test_mode(State(app): State<Arc<AppState>>, body: Bytes)
                       -> Result<StatusCode, HttpError> {
    let request = parse_object(&body)?;
    let Some(test_mode) = request.get("test_mode").and_then(Value::as_bool) else {
        return Err(invalid_argument_error("Missing boolean 'test_mode'").into());
    };
    app.state.set_test_mode(test_mode);
    debug!("Test mode: {}", test_mode);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_fps(State(app): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"fps": format_rate(app.state.telemetry().await.capture_fps)}))
}

async fn get_solve_fps(State(app): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({"fps": format_rate(app.state.telemetry().await.solve_rate)}))
}

async fn capture(app: &AppState, stream: StreamSelector) -> Result<Response, HttpError> {
    let jpeg = app.camera.lock().await.capture(stream).await?;
    if jpeg.is_empty() {
        return Err(internal_error("Device returned an empty image").into());
    }
    Ok(jpeg_response(jpeg))
}

async fn capture_lores_jpeg(State(app): State<Arc<AppState>>) -> Result<Response, HttpError> {
    capture(&app, StreamSelector::Lores).await
}

async fn snapshot(State(app): State<Arc<AppState>>) -> Result<Response, HttpError> {
    capture(&app, StreamSelector::Main).await
}

async fn system_stats() -> Json<Value> {
    let stats = tokio::task::spawn_blocking(read_system_stats).await
        .unwrap_or_else(|_| format_stats(None, None));
    Json(json!(stats))
}

// mod tests.
