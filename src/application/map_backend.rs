// Map backend trait - the seam to the interactive mapping library
use crate::domain::map::{ContainerSize, LatLng, MapView, MarkerStyle, TileSource};
use crate::domain::region::RegionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverKind {
    Resize,
    Visibility,
}

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("map container not laid out")]
    ContainerNotLaidOut,
    #[error("map construction failed: {0}")]
    Construction(String),
    #[error("unknown map handle {0}")]
    UnknownHandle(u64),
    #[error("map backend error: {0}")]
    Backend(String),
}

/// Callbacks raised by the mapping library, delivered to the engine in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    MarkerClicked(RegionKey),
    ZoomEnd,
    ContainerResized(ContainerSize),
    VisibilityChanged { visible: bool },
}

/// Operations the engine needs from the mapping library.
///
/// Handles are owned by the caller; a handle stays valid until it is removed or
/// its map is removed.
pub trait MapBackend: Send {
    fn container_size(&self) -> ContainerSize;

    fn create_map(&mut self, view: MapView) -> Result<MapHandle, MapError>;

    fn remove_map(&mut self, map: MapHandle) -> Result<(), MapError>;

    fn add_tile_layer(&mut self, map: MapHandle, source: &TileSource) -> Result<LayerHandle, MapError>;

    /// Swap a tile layer's source in place. `Ok(false)` means the library cannot do that.
    fn set_tile_source(&mut self, layer: LayerHandle, source: &TileSource) -> Result<bool, MapError>;

    fn add_marker(
        &mut self,
        map: MapHandle,
        key: &RegionKey,
        position: LatLng,
        style: MarkerStyle,
        tooltip: &str,
    ) -> Result<LayerHandle, MapError>;

    fn remove_layer(&mut self, map: MapHandle, layer: LayerHandle) -> Result<(), MapError>;

    fn set_tooltip_open(&mut self, marker: LayerHandle, open: bool) -> Result<(), MapError>;

    fn view(&self, map: MapHandle) -> Result<MapView, MapError>;

    fn set_view(&mut self, map: MapHandle, view: MapView) -> Result<(), MapError>;

    /// Recompute the viewport from the container's current size.
    fn invalidate_size(&mut self, map: MapHandle) -> Result<(), MapError>;

    fn observe(&mut self, map: MapHandle, kind: ObserverKind) -> Result<ObserverHandle, MapError>;

    fn disconnect(&mut self, observer: ObserverHandle) -> Result<(), MapError>;
}
