//! Configuration file parsing and structures.
//!
//! Configuration is TOML, optionally split across several files tied
//! together with `imports`. Files are merged first-wins and every conflict
//! or validation problem is reported at once.

#[allow(clippy::module_inception)]
mod config;
mod diagnostics;
mod partial;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use config::LoggingConfig;
pub use diagnostics::Diagnostic;
pub use diagnostics::format_diagnostics;
