use std::fmt;

use crate::engine::SceneEvent;

/// A (scene_id, scene_data) pair identifying one scene activation of a switch.
///
/// Matching is exact: a key without scene data only matches events that carry
/// no scene data either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneKey {
    pub scene_id: i64,
    pub scene_data: Option<i64>,
}

impl SceneKey {
    pub fn new(scene_id: i64, scene_data: Option<i64>) -> Self {
        Self {
            scene_id,
            scene_data,
        }
    }
}

impl From<&SceneEvent> for SceneKey {
    fn from(event: &SceneEvent) -> Self {
        Self::new(event.scene_id, event.scene_data)
    }
}

impl fmt::Display for SceneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scene_data {
            Some(data) => write!(f, "({}, {})", self.scene_id, data),
            None => write!(f, "({}, -)", self.scene_id),
        }
    }
}

/// The start and stop scenes for one ramp direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenePair {
    pub start: SceneKey,
    pub stop: SceneKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Bright,
    Dim,
}

impl Direction {
    /// Brightness change for one pulse in this direction.
    pub fn signed_step(self, step: u32) -> i64 {
        match self {
            Direction::Bright => i64::from(step),
            Direction::Dim => -i64::from(step),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bright => f.write_str("bright"),
            Direction::Dim => f.write_str("dim"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneAction {
    StartBright,
    StopBright,
    StartDim,
    StopDim,
}

/// Outcome of matching one event against one switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The event came from a different switch.
    NotMine,
    /// Right switch, but not one of the configured scenes.
    Unrecognized(SceneKey),
    Action(SceneAction),
}

/// Maps scene events from one switch onto ramp commands.
#[derive(Debug, Clone)]
pub struct SceneMatcher {
    switch_id: String,
    bindings: [(SceneKey, SceneAction); 4],
}

impl SceneMatcher {
    pub fn new(switch_id: impl Into<String>, bright: ScenePair, dim: ScenePair) -> Self {
        Self {
            switch_id: switch_id.into(),
            bindings: [
                (bright.start, SceneAction::StartBright),
                (bright.stop, SceneAction::StopBright),
                (dim.start, SceneAction::StartDim),
                (dim.stop, SceneAction::StopDim),
            ],
        }
    }

    pub fn switch_id(&self) -> &str {
        &self.switch_id
    }

    pub fn resolve(&self, event: &SceneEvent) -> Resolution {
        if event.entity_id != self.switch_id {
            return Resolution::NotMine;
        }

        let key = SceneKey::from(event);
        // Later bindings shadow earlier ones when keys coincide.
        self.bindings
            .iter()
            .rev()
            .find(|(bound, _)| *bound == key)
            .map(|(_, action)| Resolution::Action(*action))
            .unwrap_or(Resolution::Unrecognized(key))
    }
}
