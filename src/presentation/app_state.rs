// Application state for HTTP handlers
use crate::application::monitor_engine::EngineHandle;
use crate::infrastructure::scene_map::SceneMap;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub scene: SceneMap,
}
