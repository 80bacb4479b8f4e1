// Marker reconciler - full-replace marker sync and zoom-dependent tooltips
use crate::application::map_backend::MapBackend;
use crate::application::map_lifecycle::MapInstance;
use crate::domain::map::{LatLng, MarkerStyle};
use crate::domain::region::Region;

#[derive(Debug, Clone, Copy)]
pub struct MarkerReconciler {
    label_zoom: f64,
}

impl MarkerReconciler {
    pub fn new(label_zoom: f64) -> Self {
        Self { label_zoom }
    }

    pub fn label_zoom(&self) -> f64 {
        self.label_zoom
    }

    pub fn labels_visible(&self, zoom: f64) -> bool {
        zoom >= self.label_zoom
    }

    /// Remove every marker and create one per region.
    ///
    /// A no-op until the map exists; the engine calls it again on `Ready`.
    /// Clicks are wired by key: the backend reports `MarkerClicked(key)`.
    pub fn sync(&self, backend: &mut dyn MapBackend, instance: Option<&mut MapInstance>, regions: &[Region]) {
        let Some(instance) = instance else {
            return;
        };

        for (key, marker) in std::mem::take(&mut instance.markers) {
            if let Err(e) = backend.remove_layer(instance.map, marker) {
                tracing::debug!(region = %key, error = %e, "Removing marker failed");
            }
        }

        for region in regions {
            let key = region.key();
            let position = LatLng::new(region.latitude, region.longitude);
            if !position.lat.is_finite() || !position.lng.is_finite() {
                continue;
            }
            let style = MarkerStyle::from(region.status);
            match backend.add_marker(instance.map, &key, position, style, &region.name) {
                Ok(marker) => {
                    instance.markers.insert(key, marker);
                }
                Err(e) => {
                    tracing::warn!(region = %key, error = %e, "Marker creation failed");
                }
            }
        }

        tracing::debug!(markers = instance.markers.len(), "Markers rebuilt");
        self.apply_tooltips(backend, instance);
    }

    /// Open every tooltip at or above the label zoom, close them below it.
    pub fn apply_tooltips(&self, backend: &mut dyn MapBackend, instance: &MapInstance) {
        let zoom = match backend.view(instance.map) {
            Ok(view) => view.zoom,
            Err(e) => {
                tracing::debug!(error = %e, "Zoom query failed");
                return;
            }
        };
        let open = self.labels_visible(zoom);
        for marker in instance.markers.values() {
            if let Err(e) = backend.set_tooltip_open(*marker, open) {
                tracing::debug!(error = %e, "Tooltip toggle failed");
            }
        }
    }
}
