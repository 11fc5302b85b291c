//! Per-switch dimming: scene matching and the brightness ramp state machine.

#[allow(clippy::module_inception)]
mod dimmer;
mod ramp;
mod scene;

pub use dimmer::DEFAULT_DELAY;
pub use dimmer::DEFAULT_STEP;
pub use dimmer::Dimmer;
pub use dimmer::DimmerConfig;
pub use scene::Direction;
pub use scene::Resolution;
pub use scene::SceneAction;
pub use scene::SceneKey;
pub use scene::SceneMatcher;
pub use scene::ScenePair;
