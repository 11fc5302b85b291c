use serde::Deserialize;
use serde::Serialize;

/// A "scene activated" notification from a wall switch.
///
/// One bus carries these for every switch in the house; each dimmer filters
/// on `entity_id` itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneEvent {
    /// Identifier of the switch that fired the scene.
    pub entity_id: String,

    pub scene_id: i64,

    /// Auxiliary scene data (key attribute), absent on some devices.
    #[serde(default)]
    pub scene_data: Option<i64>,

    /// When the host saw the event. Only used in log output.
    #[serde(default)]
    pub time_fired: Option<String>,
}

impl SceneEvent {
    pub fn new(entity_id: impl Into<String>, scene_id: i64, scene_data: Option<i64>) -> Self {
        Self {
            entity_id: entity_id.into(),
            scene_id,
            scene_data,
            time_fired: None,
        }
    }
}
