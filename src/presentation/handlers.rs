// HTTP request handlers
use crate::application::monitor_engine::{EngineError, MonitorSnapshot};
use crate::application::region_registry::SelectQuery;
use crate::domain::map::{BaseLayer, ContainerSize};
use crate::domain::region::{Region, RegionKey};
use crate::domain::telemetry::TelemetryLatest;
use crate::infrastructure::chunked_json::{chunked_json_stream, watch_stream};
use crate::infrastructure::http_response::{accepts_brotli, bytes_response, json_response, json_status_response};
use crate::presentation::app_state::AppState;
use axum::{
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use futures::StreamExt;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegionsBody<'a> {
    regions: &'a [Region],
    selected: Option<&'a Region>,
}

#[derive(Serialize)]
struct Accepted {
    accepted: bool,
}

#[derive(Serialize)]
struct Observed {
    observed: bool,
}

#[derive(Deserialize)]
pub struct LayerRequest {
    pub mode: BaseLayer,
}

#[derive(Deserialize)]
pub struct VisibilityReport {
    pub visible: bool,
}

#[derive(Deserialize)]
pub struct ZoomReport {
    pub zoom: f64,
}

fn finish(result: Result<Response<Body>, StatusCode>) -> Response<Body> {
    match result {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

async fn error_response(status: StatusCode, message: impl Into<String>, compress: bool) -> Response<Body> {
    let body = ErrorBody { error: message.into() };
    finish(json_status_response(status, &body, compress).await)
}

async fn engine_error(e: EngineError, compress: bool) -> Response<Body> {
    let status = match e {
        EngineError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::UnknownRegion(_) => StatusCode::NOT_FOUND,
    };
    tracing::debug!(error = %e, %status, "Engine request failed");
    error_response(status, e.to_string(), compress).await
}

async fn accepted(result: Result<(), EngineError>, compress: bool) -> Response<Body> {
    match result {
        Ok(()) => finish(json_status_response(StatusCode::ACCEPTED, &Accepted { accepted: true }, compress).await),
        Err(e) => engine_error(e, compress).await,
    }
}

/// Owned snapshots from the engine's watch channel, ready for serialization.
fn snapshot_stream(
    rx: watch::Receiver<Arc<MonitorSnapshot>>,
) -> impl Stream<Item = MonitorSnapshot> + Send + 'static {
    watch_stream(rx).map(|snapshot| MonitorSnapshot::clone(&snapshot))
}

fn parse_key(raw: &str) -> Result<RegionKey, String> {
    let decoded = urlencoding::decode(raw).map_err(|e| e.to_string())?;
    decoded.parse()
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Visible regions plus the current selection
pub async fn list_regions(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    let snapshot = state.engine.snapshot();
    let body = RegionsBody {
        regions: &snapshot.regions,
        selected: snapshot.selected.as_ref(),
    };
    finish(json_response(&body, compress).await)
}

pub async fn refresh_regions(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    accepted(state.engine.refresh_regions().await, compress).await
}

/// Select by key, or by project id (kept as a hint until that project is listed)
pub async fn select_region(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SelectQuery>, JsonRejection>,
) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    let query = match payload {
        Ok(Json(query)) => query,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text(), compress).await,
    };

    match state.engine.select(query.clone()).await {
        Ok(Some(region)) => finish(json_response(&region, compress).await),
        Ok(None) => match query {
            SelectQuery::Key(key) => error_response(StatusCode::NOT_FOUND, format!("unknown region {}", key), compress).await,
            SelectQuery::ProjectId(_) => {
                finish(json_status_response(StatusCode::ACCEPTED, &Accepted { accepted: true }, compress).await)
            }
        },
        Err(e) => engine_error(e, compress).await,
    }
}

/// Latest values for every tracked region
pub async fn latest_telemetry(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    let snapshot = state.engine.snapshot();
    let latest: BTreeMap<&RegionKey, &TelemetryLatest> = snapshot
        .telemetry
        .iter()
        .map(|(key, telemetry)| (key, &telemetry.latest))
        .collect();
    finish(json_response(&latest, compress).await)
}

/// Full histories, soil snapshot and summaries for one region
pub async fn region_telemetry(
    Path(raw_key): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    let key = match parse_key(&raw_key) {
        Ok(key) => key,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message, compress).await,
    };
    match state.engine.telemetry(&key) {
        Ok(telemetry) => finish(json_response(&telemetry, compress).await),
        Err(e) => engine_error(e, compress).await,
    }
}

/// Chunked stream of engine snapshots
pub async fn stream_telemetry(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    finish(chunked_json_stream(snapshot_stream(state.engine.subscribe()), compress))
}

pub async fn map_status(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    let snapshot = state.engine.snapshot();
    finish(json_response(&snapshot.map, compress).await)
}

pub async fn retry_map(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    accepted(state.engine.retry_map().await, compress).await
}

pub async fn set_layer(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LayerRequest>, JsonRejection>,
) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    match payload {
        Ok(Json(request)) => accepted(state.engine.set_base_layer(request.mode).await, compress).await,
        Err(rejection) => error_response(StatusCode::BAD_REQUEST, rejection.body_text(), compress).await,
    }
}

/// Scene for the renderer; `null` while no map exists
pub async fn map_scene(headers: HeaderMap, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    finish(json_response(&state.scene.scene(), compress).await)
}

pub async fn report_container(State(state): State<Arc<AppState>>, Json(size): Json<ContainerSize>) -> impl IntoResponse {
    Json(Observed {
        observed: state.scene.report_container(size),
    })
}

pub async fn report_visibility(
    State(state): State<Arc<AppState>>,
    Json(report): Json<VisibilityReport>,
) -> impl IntoResponse {
    Json(Observed {
        observed: state.scene.report_visibility(report.visible),
    })
}

pub async fn report_zoom(State(state): State<Arc<AppState>>, Json(report): Json<ZoomReport>) -> impl IntoResponse {
    Json(Observed {
        observed: state.scene.report_zoom(report.zoom),
    })
}

pub async fn click_marker(Path(raw_key): Path<String>, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let key = match parse_key(&raw_key) {
        Ok(key) => key,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message, false).await,
    };
    if state.scene.report_marker_click(&key) {
        Json(Observed { observed: true }).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("no marker for {}", key), false).await
    }
}

/// Cached library script or stylesheet
pub async fn map_asset(
    Path(kind): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let compress = accepts_brotli(&headers);
    let Some(assets) = state.engine.assets() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "map library not loaded", compress).await;
    };
    let (payload, content_type) = match kind.as_str() {
        "script" => (assets.script.clone(), "application/javascript"),
        "style" => (assets.style.clone(), "text/css"),
        other => return error_response(StatusCode::NOT_FOUND, format!("unknown asset '{}'", other), compress).await,
    };
    finish(bytes_response(payload, content_type, StatusCode::OK, compress).await)
}
