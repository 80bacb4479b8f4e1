// Application layer - Engine components and the seams to external collaborators
pub mod clock;
pub mod library_loader;
pub mod map_backend;
pub mod map_lifecycle;
pub mod marker_reconciler;
pub mod monitor_engine;
pub mod region_registry;
pub mod region_source;
pub mod sampling_scheduler;
pub mod telemetry_store;
pub mod viewport_sync;
pub mod weather_lookup;
