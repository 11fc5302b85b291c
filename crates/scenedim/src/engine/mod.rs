mod actuator;
#[allow(clippy::module_inception)]
mod engine;
mod event;

pub use actuator::ActuationError;
pub use actuator::Actuator;
#[cfg(test)]
pub use actuator::RecordingActuator;
pub use engine::Engine;
pub use engine::SceneBus;
pub use event::SceneEvent;
