pub mod config;
pub mod dimmer;
mod engine;
pub mod integrations;

pub use config::Config;
pub use config::ConfigError;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use dimmer::Dimmer;
pub use dimmer::DimmerConfig;
pub use engine::ActuationError;
pub use engine::Actuator;
pub use engine::Engine;
pub use engine::SceneBus;
pub use engine::SceneEvent;
