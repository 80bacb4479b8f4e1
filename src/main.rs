// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::clock::SystemClock;
use crate::application::monitor_engine::{EngineDeps, MonitorEngine};
use crate::infrastructure::cdn_loader::CdnLoader;
use crate::infrastructure::config::load_monitor_config;
use crate::infrastructure::open_meteo::OpenMeteoClient;
use crate::infrastructure::projects_client::ProjectsClient;
use crate::infrastructure::scene_map::SceneMap;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    click_marker, health_check, latest_telemetry, list_regions, map_asset, map_scene, map_status, refresh_regions,
    region_telemetry, report_container, report_visibility, report_zoom, retry_map, select_region, set_layer,
    stream_telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forest_monitor=info,tower_http=info")),
        )
        .init();

    let config = load_monitor_config()?;

    // External collaborators (infrastructure layer)
    let region_source = Arc::new(ProjectsClient::new(&config.regions)?);
    let weather = Arc::new(OpenMeteoClient::new(&config.weather)?);
    let library = Arc::new(CdnLoader::new(&config.map)?);
    let (scene, map_events) = SceneMap::new(config.map.supports_set_url);

    // Engine (application layer)
    let (engine, handle) = MonitorEngine::new(
        &config,
        EngineDeps {
            region_source,
            weather,
            library,
            backend: Box::new(scene.clone()),
            map_events,
            clock: Arc::new(SystemClock),
        },
    );
    let cancel = CancellationToken::new();
    let engine_task = tokio::spawn(engine.run(cancel.clone()));

    let state = Arc::new(AppState { engine: handle, scene });

    // Responses are compressed by hand, so no CompressionLayer here.
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/regions", get(list_regions))
        .route("/regions/refresh", post(refresh_regions))
        .route("/selection", post(select_region))
        .route("/telemetry", get(latest_telemetry))
        .route("/telemetry/stream", get(stream_telemetry))
        .route("/telemetry/:key", get(region_telemetry))
        .route("/map/status", get(map_status))
        .route("/map/retry", post(retry_map))
        .route("/map/layer", post(set_layer))
        .route("/map/scene", get(map_scene))
        .route("/map/container", post(report_container))
        .route("/map/visibility", post(report_visibility))
        .route("/map/zoom", post(report_zoom))
        .route("/map/markers/:key/click", post(click_marker))
        .route("/map/assets/:kind", get(map_asset))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config
        .server
        .addr
        .parse()
        .with_context(|| format!("Invalid server address '{}'", config.server.addr))?;
    tracing::info!(%addr, "Starting forest-monitor service");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let shutdown = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
            }
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    engine_task.await.context("Monitor engine task failed")?;
    Ok(())
}
