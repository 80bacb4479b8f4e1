// Map lifecycle controller - loading, construction with backoff, teardown
use crate::application::library_loader::LibraryAssets;
use crate::application::map_backend::{LayerHandle, MapBackend, MapError, MapHandle, ObserverHandle, ObserverKind};
use crate::domain::map::{MapStatus, MapView, TileSource};
use crate::domain::region::RegionKey;
use crate::infrastructure::config::MapSettings;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The live map and everything attached to it.
///
/// Only exists while the controller is `Ready`; the marker reconciler and the
/// viewport synchronizer receive it by `&mut` and never outlive it.
#[derive(Debug)]
pub struct MapInstance {
    pub map: MapHandle,
    pub tile_layer: Option<LayerHandle>,
    pub markers: BTreeMap<RegionKey, LayerHandle>,
    resize_observer: Option<ObserverHandle>,
    visibility_observer: Option<ObserverHandle>,
}

/// What the engine should do after `mount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStep {
    FetchLibrary,
    Construct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructOutcome {
    Ready,
    RetryAfter(Duration),
    Failed,
}

pub struct MapLifecycleController {
    settings: MapSettings,
    status: MapStatus,
    attempts: u32,
    assets: Option<Arc<LibraryAssets>>,
    instance: Option<MapInstance>,
    retry_at: Option<Instant>,
    settle_at: Option<Instant>,
    load_deadline: Option<Instant>,
}

impl MapLifecycleController {
    pub fn new(settings: MapSettings) -> Self {
        Self {
            settings,
            status: MapStatus::Unloaded,
            attempts: 0,
            assets: None,
            instance: None,
            retry_at: None,
            settle_at: None,
            load_deadline: None,
        }
    }

    pub fn status(&self) -> &MapStatus {
        &self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn assets(&self) -> Option<Arc<LibraryAssets>> {
        self.assets.clone()
    }

    pub fn instance(&self) -> Option<&MapInstance> {
        self.instance.as_ref()
    }

    pub fn instance_mut(&mut self) -> Option<&mut MapInstance> {
        self.instance.as_mut()
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn settle_at(&self) -> Option<Instant> {
        self.settle_at
    }

    /// When a library fetch still outstanding at that instant is abandoned.
    pub fn load_deadline(&self) -> Option<Instant> {
        self.load_deadline
    }

    /// `Unloaded -> Loading`. Library assets are fetched once and then reused.
    pub fn mount(&mut self, now: Instant) -> MountStep {
        self.status = MapStatus::Loading;
        if self.assets.is_some() {
            MountStep::Construct
        } else {
            self.load_deadline = Some(now + self.settings.library_timeout());
            MountStep::FetchLibrary
        }
    }

    /// Completion of the library fetch. Returns `true` when construction should follow.
    pub fn library_loaded(&mut self, result: Result<LibraryAssets, String>) -> bool {
        if self.status != MapStatus::Loading {
            tracing::debug!("Library load finished outside Loading, ignored");
            return false;
        }
        self.load_deadline = None;
        match result {
            Ok(assets) => {
                self.assets = Some(Arc::new(assets));
                true
            }
            Err(message) => {
                tracing::warn!(error = %message, "Map library failed to load");
                self.status = MapStatus::Error { message };
                false
            }
        }
    }

    /// The library fetch outlived its deadline: `Loading -> Error`.
    pub fn library_timed_out(&mut self) {
        self.load_deadline = None;
        if self.status != MapStatus::Loading {
            return;
        }
        let message = format!(
            "map library did not load within {}s",
            self.settings.library_timeout().as_secs()
        );
        tracing::warn!(error = %message, "Map library load abandoned");
        self.status = MapStatus::Error { message };
    }

    /// Build the map if the container is laid out, otherwise schedule a retry.
    pub fn try_construct(
        &mut self,
        backend: &mut dyn MapBackend,
        view: MapView,
        tiles: &TileSource,
        now: Instant,
    ) -> ConstructOutcome {
        self.retry_at = None;
        if self.instance.is_some() {
            return ConstructOutcome::Ready;
        }

        if !backend.container_size().is_laid_out() {
            return self.schedule_retry(
                self.settings.layout_backoff_ms,
                MapError::ContainerNotLaidOut.to_string(),
                now,
            );
        }

        let map = match backend.create_map(view) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, attempt = self.attempts + 1, "Map construction failed");
                return self.schedule_retry(self.settings.construct_backoff_ms, e.to_string(), now);
            }
        };

        let tile_layer = match backend.add_tile_layer(map, tiles) {
            Ok(layer) => layer,
            Err(e) => {
                tracing::warn!(error = %e, "Tile layer attach failed, discarding map");
                if let Err(e) = backend.remove_map(map) {
                    tracing::debug!(error = %e, "Removing half-built map failed");
                }
                return self.schedule_retry(self.settings.construct_backoff_ms, e.to_string(), now);
            }
        };

        let resize_observer = Self::arm(backend, map, ObserverKind::Resize);
        let visibility_observer = Self::arm(backend, map, ObserverKind::Visibility);

        self.instance = Some(MapInstance {
            map,
            tile_layer: Some(tile_layer),
            markers: BTreeMap::new(),
            resize_observer,
            visibility_observer,
        });
        self.status = MapStatus::Ready;
        self.attempts = 0;
        self.schedule_settle(now);
        tracing::info!(zoom = view.zoom, "Map ready");
        ConstructOutcome::Ready
    }

    fn arm(backend: &mut dyn MapBackend, map: MapHandle, kind: ObserverKind) -> Option<ObserverHandle> {
        match backend.observe(map, kind) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, ?kind, "Could not arm container observer");
                None
            }
        }
    }

    fn schedule_retry(&mut self, backoff_ms: u64, message: String, now: Instant) -> ConstructOutcome {
        self.attempts += 1;
        if self.attempts <= self.settings.max_attempts {
            let delay_ms = backoff_ms * self.attempts as u64;
            let delay = Duration::from_millis(delay_ms);
            tracing::debug!(attempt = self.attempts, delay_ms, reason = %message, "Map construction retry scheduled");
            self.status = MapStatus::Retrying {
                attempt: self.attempts,
                delay_ms,
            };
            self.retry_at = Some(now + delay);
            ConstructOutcome::RetryAfter(delay)
        } else {
            tracing::error!(attempts = self.attempts, reason = %message, "Map construction gave up");
            self.status = MapStatus::Error { message };
            ConstructOutcome::Failed
        }
    }

    /// Arm the one-shot delayed size recalculation.
    pub fn schedule_settle(&mut self, now: Instant) {
        if self.instance.is_some() {
            self.settle_at = Some(now + self.settings.settle_delay());
        }
    }

    pub fn settle_due(&mut self, backend: &mut dyn MapBackend) {
        self.settle_at = None;
        self.invalidate(backend);
    }

    pub fn on_container_resized(&mut self, backend: &mut dyn MapBackend) {
        if self.instance.as_ref().is_some_and(|i| i.resize_observer.is_some()) {
            self.invalidate(backend);
        }
    }

    pub fn on_visibility_changed(&mut self, backend: &mut dyn MapBackend, visible: bool) {
        if visible && self.instance.as_ref().is_some_and(|i| i.visibility_observer.is_some()) {
            self.invalidate(backend);
        }
    }

    fn invalidate(&mut self, backend: &mut dyn MapBackend) {
        if let Some(instance) = &self.instance {
            if let Err(e) = backend.invalidate_size(instance.map) {
                tracing::debug!(error = %e, "Size recalculation failed");
            }
        }
    }

    /// Release the map, both observers and any pending timers; status returns to `Unloaded`.
    ///
    /// Each release is attempted even when an earlier one fails.
    pub fn teardown(&mut self, backend: &mut dyn MapBackend) {
        self.retry_at = None;
        self.settle_at = None;
        self.load_deadline = None;
        self.status = MapStatus::Unloaded;

        let Some(mut instance) = self.instance.take() else {
            return;
        };
        if let Some(observer) = instance.resize_observer.take() {
            if let Err(e) = backend.disconnect(observer) {
                tracing::warn!(error = %e, "Disconnecting resize observer failed");
            }
        }
        if let Some(observer) = instance.visibility_observer.take() {
            if let Err(e) = backend.disconnect(observer) {
                tracing::warn!(error = %e, "Disconnecting visibility observer failed");
            }
        }
        if let Err(e) = backend.remove_map(instance.map) {
            tracing::warn!(error = %e, "Removing map failed");
        }
        tracing::info!("Map torn down");
    }

    /// Manual retry from `Error`: drop everything, including cached library assets.
    pub fn reset_for_retry(&mut self, backend: &mut dyn MapBackend) {
        self.teardown(backend);
        self.assets = None;
        self.attempts = 0;
    }
}
