// Infrastructure layer - External dependencies and adapters
pub mod cdn_loader;
pub mod chunked_json;
pub mod config;
pub mod http_response;
pub mod open_meteo;
pub mod projects_client;
pub mod scene_map;
