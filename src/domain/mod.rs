// Domain layer - Plain data for regions, telemetry and the map
pub mod map;
pub mod region;
pub mod telemetry;
