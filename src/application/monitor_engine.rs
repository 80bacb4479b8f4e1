// Monitor engine - single task owning all engine state, driven by messages and timers
use crate::application::clock::Clock;
use crate::application::library_loader::{LibraryAssets, LibraryLoader};
use crate::application::map_backend::{MapBackend, MapEvent};
use crate::application::map_lifecycle::{ConstructOutcome, MapLifecycleController, MountStep};
use crate::application::marker_reconciler::MarkerReconciler;
use crate::application::region_registry::{RegionRegistry, SelectQuery};
use crate::application::region_source::{RegionSource, projects_to_regions};
use crate::application::sampling_scheduler::SamplingScheduler;
use crate::application::telemetry_store::TelemetryStore;
use crate::application::viewport_sync::ViewportSynchronizer;
use crate::application::weather_lookup::{WeatherLookup, WeatherSample};
use crate::domain::map::{BaseLayer, MapStatus};
use crate::domain::region::{Region, RegionKey};
use crate::domain::telemetry::{SeriesPoint, SeriesSummary, SoilSnapshot, TelemetryLatest, TelemetrySeries};
use crate::infrastructure::config::MonitorConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("monitor engine is not running")]
    Stopped,
    #[error("unknown region {0}")]
    UnknownRegion(RegionKey),
}

#[derive(Debug)]
pub enum EngineCommand {
    RefreshRegions,
    RegionsFetched(Vec<Region>),
    WeatherFetched { key: RegionKey, sample: WeatherSample },
    LibraryLoaded(Result<LibraryAssets, String>),
    Select { query: SelectQuery, reply: oneshot::Sender<Option<Region>> },
    SetBaseLayer(BaseLayer),
    RetryMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionTelemetry {
    pub latest: TelemetryLatest,
    pub temperature: Vec<SeriesPoint>,
    pub humidity: Vec<SeriesPoint>,
    pub vegetation_index: Vec<SeriesPoint>,
    pub soil: SoilSnapshot,
    pub temperature_summary: SeriesSummary,
    pub humidity_summary: SeriesSummary,
    pub vegetation_trend_percent: f64,
}

impl From<&TelemetrySeries> for RegionTelemetry {
    fn from(series: &TelemetrySeries) -> Self {
        Self {
            latest: series.latest(),
            temperature: series.temperature.to_vec(),
            humidity: series.humidity.to_vec(),
            vegetation_index: series.vegetation_index.to_vec(),
            soil: series.soil.clone(),
            temperature_summary: series.temperature.summary(),
            humidity_summary: series.humidity.summary(),
            vegetation_trend_percent: series.vegetation_index.trend_percent(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStatusView {
    pub status: MapStatus,
    pub ready: bool,
    pub attempts: u32,
    pub base_layer: BaseLayer,
}

/// Everything the engine exposes, published whole after each handled event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub regions: Vec<Region>,
    pub selected: Option<Region>,
    pub map: MapStatusView,
    pub telemetry: BTreeMap<RegionKey, RegionTelemetry>,
    pub fine_bucket: i64,
    pub coarse_bucket: i64,
}

/// Cloneable front door used by HTTP handlers.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    snapshot: watch::Receiver<Arc<MonitorSnapshot>>,
    assets: watch::Receiver<Option<Arc<LibraryAssets>>>,
}

impl EngineHandle {
    pub fn snapshot(&self) -> Arc<MonitorSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<MonitorSnapshot>> {
        self.snapshot.clone()
    }

    /// Full telemetry for one region from the latest snapshot.
    pub fn telemetry(&self, key: &RegionKey) -> Result<RegionTelemetry, EngineError> {
        self.snapshot
            .borrow()
            .telemetry
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownRegion(key.clone()))
    }

    pub fn assets(&self) -> Option<Arc<LibraryAssets>> {
        self.assets.borrow().clone()
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.commands.send(command).await.map_err(|_| EngineError::Stopped)
    }

    pub async fn refresh_regions(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::RefreshRegions).await
    }

    /// Returns the newly selected region, or `None` if nothing matched.
    pub async fn select(&self, query: SelectQuery) -> Result<Option<Region>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Select { query, reply }).await?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn set_base_layer(&self, layer: BaseLayer) -> Result<(), EngineError> {
        self.send(EngineCommand::SetBaseLayer(layer)).await
    }

    pub async fn retry_map(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::RetryMap).await
    }
}

/// External collaborators the engine talks to.
pub struct EngineDeps {
    pub region_source: Arc<dyn RegionSource>,
    pub weather: Arc<dyn WeatherLookup>,
    pub library: Arc<dyn LibraryLoader>,
    pub backend: Box<dyn MapBackend>,
    pub map_events: mpsc::UnboundedReceiver<MapEvent>,
    pub clock: Arc<dyn Clock>,
}

pub struct MonitorEngine {
    registry: RegionRegistry,
    store: TelemetryStore,
    scheduler: SamplingScheduler,
    map: MapLifecycleController,
    markers: MarkerReconciler,
    viewport: ViewportSynchronizer,
    backend: Box<dyn MapBackend>,
    region_source: Arc<dyn RegionSource>,
    weather: Arc<dyn WeatherLookup>,
    library: Arc<dyn LibraryLoader>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    selection_hint: Option<String>,
    max_regions: usize,
    refresh_every: Option<Duration>,
    tasks: JoinSet<()>,
    commands_tx: mpsc::Sender<EngineCommand>,
    commands_rx: mpsc::Receiver<EngineCommand>,
    map_events: mpsc::UnboundedReceiver<MapEvent>,
    snapshot_tx: watch::Sender<Arc<MonitorSnapshot>>,
    assets_tx: watch::Sender<Option<Arc<LibraryAssets>>>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl MonitorEngine {
    pub fn new(config: &MonitorConfig, deps: EngineDeps) -> (Self, EngineHandle) {
        let now = deps.clock.now();
        let store = TelemetryStore::new(config.sampling.clone(), now);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (assets_tx, assets_rx) = watch::channel(None);

        let engine = Self {
            registry: RegionRegistry::new(),
            store,
            scheduler: SamplingScheduler::new(&config.sampling),
            map: MapLifecycleController::new(config.map.clone()),
            markers: MarkerReconciler::new(config.map.label_zoom),
            viewport: ViewportSynchronizer::new(&config.map),
            backend: deps.backend,
            region_source: deps.region_source,
            weather: deps.weather,
            library: deps.library,
            clock: deps.clock,
            rng: StdRng::from_os_rng(),
            selection_hint: config.selection.project_hint.clone(),
            max_regions: config.regions.max_regions,
            refresh_every: config.regions.refresh_secs.filter(|secs| *secs > 0).map(Duration::from_secs),
            tasks: JoinSet::new(),
            commands_tx: commands_tx.clone(),
            commands_rx,
            map_events: deps.map_events,
            snapshot_tx: watch::channel(Arc::new(MonitorSnapshot::empty())).0,
            assets_tx,
        };

        let snapshot_rx = engine.snapshot_tx.subscribe();
        engine.publish();

        let handle = EngineHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            assets: assets_rx,
        };
        (engine, handle)
    }

    /// Run until `cancel` fires, then tear the map down.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(regions = self.registry.regions().len(), "Monitor engine starting");
        self.seed_visible_regions();
        self.spawn_region_fetch();
        self.mount_map();
        self.publish();

        let mut fine_ticker = self.scheduler.fine_ticker();
        let mut coarse_ticker = self.scheduler.coarse_ticker();
        let mut refresh_ticker = self.refresh_every.map(|every| {
            let start = Instant::now() + every;
            tokio::time::interval_at(start, every)
        });

        loop {
            let retry_at = self.map.retry_at();
            let settle_at = self.map.settle_at();
            let load_deadline = self.map.load_deadline();

            let changed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(command) = self.commands_rx.recv() => {
                    self.handle_command(command);
                    true
                }
                Some(event) = self.map_events.recv() => {
                    self.handle_map_event(event);
                    true
                }
                _ = sleep_until_opt(retry_at) => {
                    self.construct_map();
                    true
                }
                _ = sleep_until_opt(load_deadline) => {
                    self.map.library_timed_out();
                    true
                }
                _ = sleep_until_opt(settle_at) => {
                    self.map.settle_due(self.backend.as_mut());
                    false
                }
                _ = fine_ticker.tick() => {
                    self.scheduler.check_fine(&mut self.store, self.clock.as_ref(), &mut self.rng)
                }
                _ = coarse_ticker.tick() => {
                    self.scheduler.check_coarse(&mut self.store, self.clock.as_ref(), &mut self.rng)
                }
                _ = tick_opt(&mut refresh_ticker) => {
                    self.spawn_region_fetch();
                    false
                }
            };

            if changed {
                self.publish();
            }
            while self.tasks.try_join_next().is_some() {}
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tasks.abort_all();
        self.map.teardown(self.backend.as_mut());
        self.publish();
        tracing::info!("Monitor engine stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::RefreshRegions => self.spawn_region_fetch(),
            EngineCommand::RegionsFetched(regions) => self.reconcile_regions(regions),
            EngineCommand::WeatherFetched { key, sample } => {
                if self.store.apply_weather(&key, sample) {
                    tracing::debug!(region = %key, "Applied weather seed");
                }
            }
            EngineCommand::LibraryLoaded(result) => {
                if self.map.library_loaded(result) {
                    self.assets_tx.send_replace(self.map.assets());
                    self.construct_map();
                }
            }
            EngineCommand::Select { query, reply } => {
                let selected = self.select(&query);
                let _ = reply.send(selected);
            }
            EngineCommand::SetBaseLayer(layer) => {
                if self.viewport.set_base_layer(self.backend.as_mut(), self.map.instance_mut(), layer) {
                    self.map.schedule_settle(Instant::now());
                }
            }
            EngineCommand::RetryMap => {
                if !self.map.status().is_error() {
                    tracing::debug!(status = ?self.map.status(), "Map retry ignored outside Error");
                    return;
                }
                tracing::info!("Manual map retry requested");
                self.map.reset_for_retry(self.backend.as_mut());
                self.assets_tx.send_replace(None);
                self.mount_map();
            }
        }
    }

    fn handle_map_event(&mut self, event: MapEvent) {
        match event {
            MapEvent::MarkerClicked(key) => {
                self.select(&SelectQuery::Key(key));
            }
            MapEvent::ZoomEnd => {
                if let Some(instance) = self.map.instance() {
                    self.markers.apply_tooltips(self.backend.as_mut(), instance);
                }
            }
            MapEvent::ContainerResized(_) => self.map.on_container_resized(self.backend.as_mut()),
            MapEvent::VisibilityChanged { visible } => {
                self.map.on_visibility_changed(self.backend.as_mut(), visible)
            }
        }
    }

    fn select(&mut self, query: &SelectQuery) -> Option<Region> {
        let Some(region) = self.registry.select(query).cloned() else {
            if let SelectQuery::ProjectId(project_id) = query {
                tracing::debug!(project = %project_id, "Selection hint not listed yet, keeping it");
                self.selection_hint = Some(project_id.clone());
            }
            return None;
        };
        self.focus_selected();
        Some(region)
    }

    fn focus_selected(&mut self) {
        let Some(region) = self.registry.selected() else {
            return;
        };
        if self.viewport.focus(self.backend.as_mut(), self.map.instance(), region) {
            self.map.schedule_settle(Instant::now());
        }
    }

    fn reconcile_regions(&mut self, regions: Vec<Region>) {
        let hint = self.selection_hint.clone().map(SelectQuery::ProjectId);
        let selection_changed = self.registry.reconcile(regions, hint.as_ref());

        if let Some(project_id) = &self.selection_hint {
            let matched = self
                .registry
                .selected()
                .is_some_and(|r| r.source_project_id.as_deref() == Some(project_id.as_str()));
            if matched {
                self.selection_hint = None;
            }
        }

        self.seed_visible_regions();
        self.markers
            .sync(self.backend.as_mut(), self.map.instance_mut(), self.registry.regions());
        if selection_changed {
            self.focus_selected();
        }
        tracing::info!(regions = self.registry.regions().len(), "Regions reconciled");
    }

    /// Create series for regions not yet tracked and ask for their weather.
    fn seed_visible_regions(&mut self) {
        let now = self.clock.now();
        let fresh: Vec<Region> = self
            .registry
            .regions()
            .iter()
            .filter(|r| !self.store.contains(&r.key()))
            .cloned()
            .collect();

        for region in fresh {
            if self.store.ensure_seeded(&region, now) {
                self.spawn_weather_lookup(&region);
            }
        }
    }

    fn spawn_weather_lookup(&mut self, region: &Region) {
        let weather = self.weather.clone();
        let tx = self.commands_tx.clone();
        let key = region.key();
        let (latitude, longitude) = (region.latitude, region.longitude);

        self.tasks.spawn(async move {
            match weather.current(latitude, longitude).await {
                Ok(sample) if !sample.is_empty() => {
                    let _ = tx.send(EngineCommand::WeatherFetched { key, sample }).await;
                }
                Ok(_) => tracing::debug!(region = %key, "Weather lookup returned no data"),
                Err(e) => tracing::debug!(region = %key, error = %e, "Weather lookup failed, keeping defaults"),
            }
        });
    }

    fn spawn_region_fetch(&mut self) {
        let source = self.region_source.clone();
        let tx = self.commands_tx.clone();
        let max_regions = self.max_regions;

        self.tasks.spawn(async move {
            match source.fetch_projects().await {
                Ok(projects) => {
                    let regions = {
                        let mut rng = rand::rng();
                        projects_to_regions(projects, max_regions, &mut rng)
                    };
                    let _ = tx.send(EngineCommand::RegionsFetched(regions)).await;
                }
                Err(e) => tracing::warn!(error = %e, "Region source unavailable, keeping current regions"),
            }
        });
    }

    fn mount_map(&mut self) {
        match self.map.mount(Instant::now()) {
            MountStep::Construct => self.construct_map(),
            MountStep::FetchLibrary => {
                let library = self.library.clone();
                let tx = self.commands_tx.clone();
                self.tasks.spawn(async move {
                    let result = library.load().await.map_err(|e| format!("{:#}", e));
                    let _ = tx.send(EngineCommand::LibraryLoaded(result)).await;
                });
            }
        }
    }

    fn construct_map(&mut self) {
        let view = self.viewport.initial_view(self.registry.selected());
        let outcome = self
            .map
            .try_construct(self.backend.as_mut(), view, self.viewport.tile_source(), Instant::now());

        if outcome == ConstructOutcome::Ready {
            self.markers
                .sync(self.backend.as_mut(), self.map.instance_mut(), self.registry.regions());
        }
    }

    fn build_snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            regions: self.registry.regions().to_vec(),
            selected: self.registry.selected().cloned(),
            map: MapStatusView {
                status: self.map.status().clone(),
                ready: self.map.status().is_ready(),
                attempts: self.map.attempts(),
                base_layer: self.viewport.base_layer(),
            },
            telemetry: self
                .store
                .iter()
                .map(|(key, series)| (key.clone(), RegionTelemetry::from(series)))
                .collect(),
            fine_bucket: self.store.fine_cursor(),
            coarse_bucket: self.store.coarse_cursor(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.build_snapshot()));
    }
}

impl MonitorSnapshot {
    pub fn empty() -> Self {
        Self {
            regions: Vec::new(),
            selected: None,
            map: MapStatusView {
                status: MapStatus::Unloaded,
                ready: false,
                attempts: 0,
                base_layer: BaseLayer::default(),
            },
            telemetry: BTreeMap::new(),
            fine_bucket: 0,
            coarse_bucket: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::ManualClock;
    use crate::application::region_source::ProjectRecord;
    use crate::domain::map::ContainerSize;
    use crate::infrastructure::scene_map::SceneMap;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    struct StaticSource(Mutex<Option<Vec<ProjectRecord>>>);

    impl StaticSource {
        fn replace(&self, projects: Vec<ProjectRecord>) {
            *self.0.lock().unwrap() = Some(projects);
        }
    }

    #[async_trait]
    impl RegionSource for StaticSource {
        async fn fetch_projects(&self) -> anyhow::Result<Vec<ProjectRecord>> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| anyhow::anyhow!("project list offline"))
        }
    }

    struct FixedWeather(Option<WeatherSample>);

    #[async_trait]
    impl WeatherLookup for FixedWeather {
        async fn current(&self, _latitude: f64, _longitude: f64) -> anyhow::Result<WeatherSample> {
            self.0.ok_or_else(|| anyhow::anyhow!("weather offline"))
        }
    }

    /// Counts loads; the first `stalled` calls never complete.
    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        stalled: usize,
    }

    #[async_trait]
    impl LibraryLoader for CountingLoader {
        async fn load(&self) -> anyhow::Result<LibraryAssets> {
            let call = self.loads.fetch_add(1, Ordering::SeqCst);
            if call < self.stalled {
                std::future::pending::<()>().await;
            }
            Ok(LibraryAssets {
                script: Bytes::from_static(b"window.L = {};"),
                style: Bytes::from_static(b".leaflet-container{}"),
            })
        }
    }

    fn project(id: &str, coordinates: Option<&str>) -> ProjectRecord {
        ProjectRecord {
            id: id.to_string(),
            name: format!("Project {}", id),
            country: Some("Peru".to_string()),
            coordinates: coordinates.map(str::to_string),
        }
    }

    struct Harness {
        handle: EngineHandle,
        scene: SceneMap,
        source: Arc<StaticSource>,
        clock: ManualClock,
        loads: Arc<AtomicUsize>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start(
            projects: Option<Vec<ProjectRecord>>,
            weather: Option<WeatherSample>,
            config: MonitorConfig,
            laid_out: bool,
        ) -> Self {
            Self::launch(projects, weather, config, laid_out, 0)
        }

        fn launch(
            projects: Option<Vec<ProjectRecord>>,
            weather: Option<WeatherSample>,
            config: MonitorConfig,
            laid_out: bool,
            stalled_loads: usize,
        ) -> Self {
            let (scene, map_events) = SceneMap::new(config.map.supports_set_url);
            if laid_out {
                scene.report_container(ContainerSize { width: 800, height: 600 });
            }
            let clock = ManualClock::at(Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap());
            let loads = Arc::new(AtomicUsize::new(0));
            let source = Arc::new(StaticSource(Mutex::new(projects)));
            let deps = EngineDeps {
                region_source: source.clone(),
                weather: Arc::new(FixedWeather(weather)),
                library: Arc::new(CountingLoader {
                    loads: loads.clone(),
                    stalled: stalled_loads,
                }),
                backend: Box::new(scene.clone()),
                map_events,
                clock: Arc::new(clock.clone()),
            };
            let (engine, handle) = MonitorEngine::new(&config, deps);
            let cancel = CancellationToken::new();
            let task = tokio::spawn(engine.run(cancel.clone()));
            Self {
                handle,
                scene,
                source,
                clock,
                loads,
                cancel,
                task,
            }
        }

        async fn wait_until(&self, pred: impl Fn(&MonitorSnapshot) -> bool) -> Arc<MonitorSnapshot> {
            let mut rx = self.handle.subscribe();
            let snapshot = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| pred(s)))
                .await
                .expect("engine never reached the expected state")
                .expect("engine stopped");
            snapshot.clone()
        }

        async fn stop(self) {
            self.cancel.cancel();
            self.task.await.unwrap();
        }
    }

    fn selected_key(snapshot: &MonitorSnapshot) -> Option<RegionKey> {
        snapshot.selected.as_ref().map(Region::key)
    }

    #[tokio::test(start_paused = true)]
    async fn test_region_without_weather_seeds_defaults() {
        let harness = Harness::start(Some(vec![project("p1", None)]), None, MonitorConfig::default(), true);

        let snapshot = harness
            .wait_until(|s| s.regions.len() == 1 && s.map.status.is_ready())
            .await;

        let key = RegionKey::Project("p1".into());
        let series = &snapshot.telemetry[&key];
        assert_eq!(series.temperature.len(), 6);
        assert!(series.temperature.iter().all(|p| p.value == 26.0));
        assert!(series.humidity.iter().all(|p| p.value == 70.0));
        assert!((series.latest.vegetation_index - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.regions[0].latitude, 0.0);

        let scene = harness.scene.scene().unwrap();
        assert_eq!(scene.markers.len(), 1);
        assert_eq!(scene.markers[0].region, key);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_weather_seeds_starting_values() {
        let weather = WeatherSample {
            temperature_c: Some(31.5),
            humidity_percent: Some(55.0),
        };
        let harness = Harness::start(
            Some(vec![project("p1", Some("-9.19, -75.01"))]),
            Some(weather),
            MonitorConfig::default(),
            true,
        );

        let key = RegionKey::Project("p1".into());
        let snapshot = harness
            .wait_until(|s| s.telemetry.get(&key).is_some_and(|t| t.latest.temperature_c == 31.5))
            .await;

        let series = &snapshot.telemetry[&key];
        assert!(series.humidity.iter().all(|p| p.value == 55.0));
        assert_eq!(series.soil.temperature_c, 31.5);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_selection_hint_keeps_selection() {
        let projects = vec![project("p1", Some("1, 2")), project("p2", Some("3, 4"))];
        let harness = Harness::start(Some(projects), None, MonitorConfig::default(), true);
        harness
            .wait_until(|s| s.regions.len() == 2 && s.map.status.is_ready())
            .await;

        let picked = harness
            .handle
            .select(SelectQuery::Key(RegionKey::Project("p2".into())))
            .await
            .unwrap();
        assert_eq!(picked.unwrap().name, "Project p2");

        let missing = harness.handle.select(SelectQuery::ProjectId("nope".into())).await.unwrap();
        assert!(missing.is_none());

        harness.handle.refresh_regions().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = harness.handle.snapshot();
        assert_eq!(selected_key(&snapshot), Some(RegionKey::Project("p2".into())));
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_hint_selects_once_listed() {
        let mut config = MonitorConfig::default();
        config.selection.project_hint = Some("p2".into());
        let projects = vec![project("p1", Some("1, 2")), project("p2", Some("3, 4"))];
        let harness = Harness::start(Some(projects), None, config, true);

        let snapshot = harness
            .wait_until(|s| s.regions.len() == 2 && s.map.status.is_ready())
            .await;
        assert_eq!(selected_key(&snapshot), Some(RegionKey::Project("p2".into())));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let view = harness.scene.scene().unwrap().view;
        assert_eq!(view.center, crate::domain::map::LatLng::new(3.0, 4.0));
        assert!(view.zoom >= 5.0);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_layer_toggle_keeps_one_layer_and_view() {
        let harness = Harness::start(None, None, MonitorConfig::default(), true);
        harness.wait_until(|s| s.map.status.is_ready()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = harness.scene.scene().unwrap();

        harness.handle.set_base_layer(BaseLayer::Terrain).await.unwrap();
        harness.wait_until(|s| s.map.base_layer == BaseLayer::Terrain).await;

        let after = harness.scene.scene().unwrap();
        assert_eq!(after.tile_layers.len(), 1);
        assert_eq!(after.tile_layers[0].url, MonitorConfig::default().map.terrain.url);
        assert_eq!(after.view, before.view);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlaid_container_exhausts_retries_then_manual_retry_recovers() {
        let harness = Harness::start(None, None, MonitorConfig::default(), false);

        let snapshot = harness.wait_until(|s| s.map.status.is_error()).await;
        assert!(harness.scene.scene().is_none());
        assert_eq!(snapshot.regions.len(), 4);

        harness.scene.report_container(ContainerSize { width: 640, height: 480 });
        harness.handle.retry_map().await.unwrap();
        harness.wait_until(|s| s.map.status.is_ready()).await;

        assert_eq!(harness.loads.load(Ordering::SeqCst), 2);
        assert!(harness.handle.assets().is_some());
        assert_eq!(harness.scene.scene().unwrap().markers.len(), 4);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ignored_while_ready() {
        let harness = Harness::start(None, None, MonitorConfig::default(), true);
        harness.wait_until(|s| s.map.ready).await;

        harness.handle.retry_map().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(harness.handle.snapshot().map.ready);
        assert_eq!(harness.loads.load(Ordering::SeqCst), 1);
        assert_eq!(harness.scene.scene().unwrap().tile_layers.len(), 1);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_click_selects_region() {
        let harness = Harness::start(None, None, MonitorConfig::default(), true);
        harness.wait_until(|s| s.map.status.is_ready()).await;

        assert!(harness.scene.report_marker_click(&RegionKey::Position(3)));
        let snapshot = harness
            .wait_until(|s| selected_key(s) == Some(RegionKey::Position(3)))
            .await;
        assert_eq!(snapshot.selected.as_ref().unwrap().name, "Borneo Highlands");
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fine_bucket_change_commits_once() {
        let harness = Harness::start(None, None, MonitorConfig::default(), true);
        let start = harness.wait_until(|s| s.map.status.is_ready()).await;

        harness.clock.advance(Duration::from_secs(15 * 60));
        let snapshot = harness.wait_until(|s| s.fine_bucket == start.fine_bucket + 1).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(harness.handle.snapshot().fine_bucket, snapshot.fine_bucket);
        for series in snapshot.telemetry.values() {
            assert_eq!(series.temperature.len(), 6);
            assert_ne!(series.temperature[5].label, series.temperature[4].label);
        }
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_region_source_keeps_fallback() {
        let harness = Harness::start(None, None, MonitorConfig::default(), true);
        harness.wait_until(|s| s.map.status.is_ready()).await;
        harness.handle.refresh_regions().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = harness.handle.snapshot();
        assert_eq!(snapshot.regions.len(), 4);
        assert_eq!(selected_key(&snapshot), Some(RegionKey::Position(1)));
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reordered_superset_keeps_histories_by_project() {
        let projects = vec![project("p1", Some("1, 2")), project("p2", Some("3, 4"))];
        let harness = Harness::start(Some(projects), None, MonitorConfig::default(), true);
        let start = harness
            .wait_until(|s| s.regions.len() == 2 && s.map.status.is_ready())
            .await;
        let p1 = RegionKey::Project("p1".into());
        let p2 = RegionKey::Project("p2".into());
        let p3 = RegionKey::Project("p3".into());
        harness.handle.select(SelectQuery::Key(p1.clone())).await.unwrap();

        harness.clock.advance(Duration::from_secs(15 * 60));
        let sampled = harness.wait_until(|s| s.fine_bucket == start.fine_bucket + 1).await;

        harness.source.replace(vec![
            project("p3", Some("5, 6")),
            project("p2", Some("3, 4")),
            project("p1", Some("1, 2")),
        ]);
        harness.handle.refresh_regions().await.unwrap();
        let snapshot = harness.wait_until(|s| s.regions.len() == 3).await;

        let order: Vec<RegionKey> = snapshot.regions.iter().map(Region::key).collect();
        assert_eq!(order, vec![p3.clone(), p2.clone(), p1.clone()]);
        assert_eq!(selected_key(&snapshot), Some(p1.clone()));
        for key in [&p1, &p2] {
            assert_eq!(snapshot.telemetry[key].temperature, sampled.telemetry[key].temperature);
            assert_eq!(snapshot.telemetry[key].humidity, sampled.telemetry[key].humidity);
        }
        let fresh = &snapshot.telemetry[&p3];
        assert_eq!(fresh.temperature.len(), 6);
        assert!(fresh.temperature.iter().all(|p| p.value == 26.0));
        assert!(fresh.humidity.iter().all(|p| p.value == 70.0));
        assert_eq!(harness.scene.scene().unwrap().markers.len(), 3);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_refresh_period_disables_refetch() {
        let mut config = MonitorConfig::default();
        config.regions.refresh_secs = Some(0);
        let harness = Harness::start(Some(vec![project("p1", None)]), None, config, true);
        harness
            .wait_until(|s| s.regions.len() == 1 && s.map.status.is_ready())
            .await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!harness.task.is_finished());
        assert!(harness.handle.snapshot().map.ready);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_library_load_errors_then_manual_retry_recovers() {
        let mut config = MonitorConfig::default();
        config.map.library_timeout_secs = 20;
        let harness = Harness::launch(None, None, config, true, 1);

        let snapshot = harness.wait_until(|s| s.map.status.is_error()).await;
        match &snapshot.map.status {
            MapStatus::Error { message } => assert!(message.contains("did not load")),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(harness.handle.assets().is_none());
        assert!(harness.scene.scene().is_none());

        harness.handle.retry_map().await.unwrap();
        harness.wait_until(|s| s.map.ready).await;
        assert_eq!(harness.loads.load(Ordering::SeqCst), 2);
        assert!(harness.handle.assets().is_some());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_down_map() {
        let harness = Harness::start(None, None, MonitorConfig::default(), true);
        harness.wait_until(|s| s.map.status.is_ready()).await;
        let handle = harness.handle.clone();
        let scene = harness.scene.clone();

        harness.stop().await;

        let map = handle.snapshot().map.clone();
        assert!(!map.ready);
        assert_eq!(map.status, MapStatus::Unloaded);
        assert!(scene.scene().is_none());
        assert!(!scene.report_zoom(9.0));
        assert!(matches!(handle.refresh_regions().await, Err(EngineError::Stopped)));
        assert!(matches!(
            handle.telemetry(&RegionKey::Position(9)),
            Err(EngineError::UnknownRegion(_))
        ));
    }
}
