// Viewport synchronizer - keeps center/zoom and the tile layer in line with user choices
use crate::application::map_backend::MapBackend;
use crate::application::map_lifecycle::MapInstance;
use crate::domain::map::{BaseLayer, LatLng, MapView, TileSource};
use crate::domain::region::Region;
use crate::infrastructure::config::MapSettings;

pub struct ViewportSynchronizer {
    base_layer: BaseLayer,
    min_zoom: f64,
    initial_zoom: f64,
    label_zoom: f64,
    satellite: TileSource,
    terrain: TileSource,
}

impl ViewportSynchronizer {
    pub fn new(settings: &MapSettings) -> Self {
        Self {
            base_layer: settings.base_layer,
            min_zoom: settings.min_zoom,
            initial_zoom: settings.initial_zoom,
            label_zoom: settings.label_zoom,
            satellite: settings.tile_source(BaseLayer::Satellite).clone(),
            terrain: settings.tile_source(BaseLayer::Terrain).clone(),
        }
    }

    pub fn base_layer(&self) -> BaseLayer {
        self.base_layer
    }

    pub fn tile_source(&self) -> &TileSource {
        match self.base_layer {
            BaseLayer::Satellite => &self.satellite,
            BaseLayer::Terrain => &self.terrain,
        }
    }

    /// View used when the map is first constructed.
    pub fn initial_view(&self, selected: Option<&Region>) -> MapView {
        let center = selected
            .map(|r| LatLng::new(r.latitude, r.longitude))
            .unwrap_or(LatLng::new(0.0, 0.0));
        MapView {
            center,
            zoom: self.initial_zoom,
        }
    }

    /// Center on `region` without zooming out past the current zoom, and show
    /// its tooltip when labels are visible. Returns `true` if the map was touched.
    pub fn focus(&self, backend: &mut dyn MapBackend, instance: Option<&MapInstance>, region: &Region) -> bool {
        let Some(instance) = instance else {
            return false;
        };

        let current = match backend.view(instance.map) {
            Ok(view) => view,
            Err(e) => {
                tracing::debug!(error = %e, "View query failed");
                return false;
            }
        };
        let view = MapView {
            center: LatLng::new(region.latitude, region.longitude),
            zoom: current.zoom.max(self.min_zoom),
        };
        if let Err(e) = backend.set_view(instance.map, view) {
            tracing::warn!(error = %e, "Setting view failed");
        }

        let key = region.key();
        if let Some(marker) = instance.markers.get(&key) {
            let open = view.zoom >= self.label_zoom;
            if let Err(e) = backend.set_tooltip_open(*marker, open) {
                tracing::debug!(region = %key, error = %e, "Tooltip toggle failed");
            }
        }
        true
    }

    /// Switch the base layer. Without a live map only the choice is recorded.
    ///
    /// The tile layer is swapped in place when the library supports it and
    /// replaced otherwise; either way exactly one tile layer stays attached.
    pub fn set_base_layer(&mut self, backend: &mut dyn MapBackend, instance: Option<&mut MapInstance>, layer: BaseLayer) -> bool {
        self.base_layer = layer;
        let Some(instance) = instance else {
            return false;
        };
        let source = self.tile_source().clone();

        if let Some(current) = instance.tile_layer {
            match backend.set_tile_source(current, &source) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => tracing::debug!(error = %e, "In-place tile swap failed, replacing layer"),
            }
            if let Err(e) = backend.remove_layer(instance.map, current) {
                tracing::warn!(error = %e, "Removing tile layer failed");
            }
            instance.tile_layer = None;
        }

        match backend.add_tile_layer(instance.map, &source) {
            Ok(handle) => instance.tile_layer = Some(handle),
            Err(e) => tracing::warn!(error = %e, ?layer, "Attaching tile layer failed"),
        }
        true
    }
}
