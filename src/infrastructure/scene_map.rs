// Scene map - in-memory MapBackend rendered by the browser client
use crate::application::map_backend::{LayerHandle, MapBackend, MapError, MapEvent, MapHandle, ObserverHandle, ObserverKind};
use crate::domain::map::{ContainerSize, LatLng, MapView, MarkerStyle, TileSource};
use crate::domain::region::RegionKey;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneTileLayer {
    pub id: u64,
    pub url: String,
    pub attribution: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneMarker {
    pub id: u64,
    pub region: RegionKey,
    pub position: LatLng,
    pub style: MarkerStyle,
    pub tooltip: String,
    pub tooltip_open: bool,
}

/// What the renderer should currently draw.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapScene {
    pub view: MapView,
    pub container: ContainerSize,
    pub tile_layers: Vec<SceneTileLayer>,
    pub markers: Vec<SceneMarker>,
    pub invalidations: u64,
}

struct SceneEntry {
    view: MapView,
    tile_layers: BTreeMap<u64, TileSource>,
    markers: BTreeMap<u64, SceneMarker>,
    invalidations: u64,
}

struct SceneState {
    container: ContainerSize,
    next_id: u64,
    maps: BTreeMap<u64, SceneEntry>,
    observers: HashMap<u64, (u64, ObserverKind)>,
}

impl SceneState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn entry(&self, map: MapHandle) -> Result<&SceneEntry, MapError> {
        self.maps.get(&map.0).ok_or(MapError::UnknownHandle(map.0))
    }

    fn entry_mut(&mut self, map: MapHandle) -> Result<&mut SceneEntry, MapError> {
        self.maps.get_mut(&map.0).ok_or(MapError::UnknownHandle(map.0))
    }

    fn marker_mut(&mut self, layer: LayerHandle) -> Option<&mut SceneMarker> {
        self.maps.values_mut().find_map(|m| m.markers.get_mut(&layer.0))
    }

    fn observing(&self, kind: ObserverKind) -> bool {
        self.observers.values().any(|(map, k)| *k == kind && self.maps.contains_key(map))
    }
}

/// Shared between the engine (as its backend) and the HTTP layer (as the host).
#[derive(Clone)]
pub struct SceneMap {
    state: Arc<Mutex<SceneState>>,
    events: mpsc::UnboundedSender<MapEvent>,
    supports_set_url: bool,
}

impl SceneMap {
    pub fn new(supports_set_url: bool) -> (Self, mpsc::UnboundedReceiver<MapEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = SceneState {
            container: ContainerSize::default(),
            next_id: 0,
            maps: BTreeMap::new(),
            observers: HashMap::new(),
        };
        let scene = Self {
            state: Arc::new(Mutex::new(state)),
            events,
            supports_set_url,
        };
        (scene, rx)
    }

    fn lock(&self) -> MutexGuard<'_, SceneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: MapEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Map event dropped, engine stopped");
        }
    }

    /// The live map's scene, if one exists.
    pub fn scene(&self) -> Option<MapScene> {
        let state = self.lock();
        let entry = state.maps.values().next()?;
        Some(MapScene {
            view: entry.view,
            container: state.container,
            tile_layers: entry
                .tile_layers
                .iter()
                .map(|(id, source)| SceneTileLayer {
                    id: *id,
                    url: source.url.clone(),
                    attribution: source.attribution.clone(),
                })
                .collect(),
            markers: entry.markers.values().cloned().collect(),
            invalidations: entry.invalidations,
        })
    }

    /// Layout report. Raises a resize event only while a resize observer is connected.
    pub fn report_container(&self, size: ContainerSize) -> bool {
        let observed = {
            let mut state = self.lock();
            let changed = state.container != size;
            state.container = size;
            changed && state.observing(ObserverKind::Resize)
        };
        if observed {
            self.emit(MapEvent::ContainerResized(size));
        }
        observed
    }

    pub fn report_visibility(&self, visible: bool) -> bool {
        let observed = self.lock().observing(ObserverKind::Visibility);
        if observed {
            self.emit(MapEvent::VisibilityChanged { visible });
        }
        observed
    }

    /// Zoom gesture finished on the client. Ignored when no map exists.
    pub fn report_zoom(&self, zoom: f64) -> bool {
        let applied = {
            let mut state = self.lock();
            match state.maps.values_mut().next() {
                Some(entry) => {
                    entry.view.zoom = zoom;
                    true
                }
                None => false,
            }
        };
        if applied {
            self.emit(MapEvent::ZoomEnd);
        }
        applied
    }

    /// Marker click on the client. Only markers currently on the map count.
    pub fn report_marker_click(&self, key: &RegionKey) -> bool {
        let known = self
            .lock()
            .maps
            .values()
            .any(|m| m.markers.values().any(|marker| &marker.region == key));
        if known {
            self.emit(MapEvent::MarkerClicked(key.clone()));
        }
        known
    }
}

impl MapBackend for SceneMap {
    fn container_size(&self) -> ContainerSize {
        self.lock().container
    }

    fn create_map(&mut self, view: MapView) -> Result<MapHandle, MapError> {
        let mut state = self.lock();
        if !state.container.is_laid_out() {
            return Err(MapError::ContainerNotLaidOut);
        }
        let id = state.next_id();
        state.maps.insert(
            id,
            SceneEntry {
                view,
                tile_layers: BTreeMap::new(),
                markers: BTreeMap::new(),
                invalidations: 0,
            },
        );
        Ok(MapHandle(id))
    }

    fn remove_map(&mut self, map: MapHandle) -> Result<(), MapError> {
        let mut state = self.lock();
        state.maps.remove(&map.0).ok_or(MapError::UnknownHandle(map.0))?;
        state.observers.retain(|_, (owner, _)| *owner != map.0);
        Ok(())
    }

    fn add_tile_layer(&mut self, map: MapHandle, source: &TileSource) -> Result<LayerHandle, MapError> {
        let mut state = self.lock();
        let id = state.next_id();
        state.entry_mut(map)?.tile_layers.insert(id, source.clone());
        Ok(LayerHandle(id))
    }

    fn set_tile_source(&mut self, layer: LayerHandle, source: &TileSource) -> Result<bool, MapError> {
        if !self.supports_set_url {
            return Ok(false);
        }
        let mut state = self.lock();
        let current = state
            .maps
            .values_mut()
            .find_map(|m| m.tile_layers.get_mut(&layer.0))
            .ok_or(MapError::UnknownHandle(layer.0))?;
        *current = source.clone();
        Ok(true)
    }

    fn add_marker(
        &mut self,
        map: MapHandle,
        key: &RegionKey,
        position: LatLng,
        style: MarkerStyle,
        tooltip: &str,
    ) -> Result<LayerHandle, MapError> {
        let mut state = self.lock();
        let id = state.next_id();
        let marker = SceneMarker {
            id,
            region: key.clone(),
            position,
            style,
            tooltip: tooltip.to_string(),
            tooltip_open: false,
        };
        state.entry_mut(map)?.markers.insert(id, marker);
        Ok(LayerHandle(id))
    }

    fn remove_layer(&mut self, map: MapHandle, layer: LayerHandle) -> Result<(), MapError> {
        let mut state = self.lock();
        let entry = state.entry_mut(map)?;
        let removed = entry.markers.remove(&layer.0).is_some() || entry.tile_layers.remove(&layer.0).is_some();
        if removed {
            Ok(())
        } else {
            Err(MapError::UnknownHandle(layer.0))
        }
    }

    fn set_tooltip_open(&mut self, marker: LayerHandle, open: bool) -> Result<(), MapError> {
        let mut state = self.lock();
        let marker = state.marker_mut(marker).ok_or(MapError::UnknownHandle(marker.0))?;
        marker.tooltip_open = open;
        Ok(())
    }

    fn view(&self, map: MapHandle) -> Result<MapView, MapError> {
        Ok(self.lock().entry(map)?.view)
    }

    fn set_view(&mut self, map: MapHandle, view: MapView) -> Result<(), MapError> {
        self.lock().entry_mut(map)?.view = view;
        Ok(())
    }

    fn invalidate_size(&mut self, map: MapHandle) -> Result<(), MapError> {
        self.lock().entry_mut(map)?.invalidations += 1;
        Ok(())
    }

    fn observe(&mut self, map: MapHandle, kind: ObserverKind) -> Result<ObserverHandle, MapError> {
        let mut state = self.lock();
        state.entry(map)?;
        let id = state.next_id();
        state.observers.insert(id, (map.0, kind));
        Ok(ObserverHandle(id))
    }

    fn disconnect(&mut self, observer: ObserverHandle) -> Result<(), MapError> {
        self.lock()
            .observers
            .remove(&observer.0)
            .map(|_| ())
            .ok_or(MapError::UnknownHandle(observer.0))
    }
}
