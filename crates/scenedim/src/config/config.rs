use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::ValidationError;
use super::diagnostics::Warning;
use super::diagnostics::format_diagnostics;
use super::partial::PartialConfig;
use super::partial::PartialDefaults;
use super::partial::PartialDimmer;
use super::partial::PartialScenes;
use crate::dimmer::DEFAULT_DELAY;
use crate::dimmer::DEFAULT_STEP;
use crate::dimmer::DimmerConfig;
use crate::dimmer::SceneKey;
use crate::dimmer::ScenePair;
use crate::integrations::mqtt::MqttConfig;

/// Largest brightness change a single pulse may request.
const MAX_STEP: i64 = 255;

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub mqtt: Option<MqttConfig>,
    /// One entry per configured switch, ordered by switch id
    pub dimmers: Vec<DimmerConfig>,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    pub overrides: HashMap<String, LogLevel>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Rendered diagnostics, errors and warnings together
    #[error("{0}")]
    Invalid(String),
}

/// Step and delay applied to dimmers that don't set their own
struct Defaults {
    step: u32,
    delay: Duration,
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Returns the config together with any warnings. All errors, from
    /// merging and validation alike, are reported together in the `Err`.
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;

        // Merge with first-wins semantics, collecting diagnostics
        let (partial, diagnostics) = PartialConfig::merge(configs);

        Self::from_partial(partial, diagnostics)
    }

    /// Convert a merged PartialConfig to a Config, validating all fields
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let mut errors = Vec::new();

        let logging = partial
            .logging
            .map(|logging| LoggingConfig {
                level: logging.level.map(|s| *s.get_ref()).unwrap_or_default(),
                overrides: logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            })
            .unwrap_or_default();

        let defaults = Self::validate_defaults(partial.defaults.unwrap_or_default(), &mut errors);

        let mut dimmer_entries: Vec<_> = partial.dimmers.unwrap_or_default().into_iter().collect();
        dimmer_entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut dimmers = Vec::new();
        for (switch_id, partial_dimmer) in dimmer_entries {
            if let Some(dimmer) =
                Self::validate_dimmer(&switch_id, partial_dimmer, &defaults, &mut errors)
            {
                diagnostics.extend(duplicate_scene_warnings(&dimmer));
                dimmers.push(dimmer);
            }
        }

        diagnostics.extend(
            errors
                .into_iter()
                .map(|e| Diagnostic::Error(Error::Validation(e))),
        );

        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(ConfigError::Invalid(format_diagnostics(&diagnostics)));
        }

        let config = Config {
            logging,
            mqtt: partial.mqtt,
            dimmers,
        };
        Ok((config, diagnostics))
    }

    fn validate_defaults(partial: PartialDefaults, errors: &mut Vec<ValidationError>) -> Defaults {
        let step = partial
            .step
            .and_then(|s| validate_step("defaults.step", *s.get_ref(), errors))
            .unwrap_or(DEFAULT_STEP);
        let delay = partial
            .delay
            .and_then(|d| validate_delay("defaults.delay", *d.get_ref(), errors))
            .unwrap_or(DEFAULT_DELAY);
        Defaults { step, delay }
    }

    /// Validate one `[dimmers."<switch>"]` table, recording every problem found
    fn validate_dimmer(
        switch_id: &str,
        partial: PartialDimmer,
        defaults: &Defaults,
        errors: &mut Vec<ValidationError>,
    ) -> Option<DimmerConfig> {
        let path = format!("dimmers.{}", switch_id);
        let errors_before = errors.len();

        let light_id = match partial.light_id {
            Some(id) if !id.trim().is_empty() => Some(id),
            Some(_) => {
                errors.push(ValidationError::new(
                    format!("{}.light_id", path),
                    "light_id must not be empty",
                ));
                None
            }
            None => {
                errors.push(ValidationError::new(
                    format!("{}.light_id", path),
                    "light_id is required",
                ));
                None
            }
        };

        let bright = validate_scenes(&format!("{}.bright", path), partial.bright, errors);
        let dim = validate_scenes(&format!("{}.dim", path), partial.dim, errors);

        let step = match partial.step {
            Some(step) => validate_step(&format!("{}.step", path), step, errors),
            None => Some(defaults.step),
        };
        let delay = match partial.delay {
            Some(delay) => validate_delay(&format!("{}.delay", path), delay, errors),
            None => Some(defaults.delay),
        };

        if errors.len() != errors_before {
            return None;
        }

        Some(DimmerConfig {
            switch_id: switch_id.to_string(),
            light_id: light_id?,
            bright: bright?,
            dim: dim?,
            step: step?,
            delay: delay?,
        })
    }
}

fn validate_scenes(
    path: &str,
    partial: Option<PartialScenes>,
    errors: &mut Vec<ValidationError>,
) -> Option<ScenePair> {
    let Some(scenes) = partial else {
        errors.push(ValidationError::new(path, "scene table is required"));
        return None;
    };

    if scenes.start_scene_id.is_none() {
        errors.push(ValidationError::new(
            format!("{}.start_scene_id", path),
            "start_scene_id is required",
        ));
    }
    if scenes.stop_scene_id.is_none() {
        errors.push(ValidationError::new(
            format!("{}.stop_scene_id", path),
            "stop_scene_id is required",
        ));
    }

    Some(ScenePair {
        start: SceneKey::new(scenes.start_scene_id?, scenes.start_scene_data),
        stop: SceneKey::new(scenes.stop_scene_id?, scenes.stop_scene_data),
    })
}

fn validate_step(path: &str, step: i64, errors: &mut Vec<ValidationError>) -> Option<u32> {
    if (1..=MAX_STEP).contains(&step) {
        u32::try_from(step).ok()
    } else {
        errors.push(ValidationError::new(
            path,
            format!("step must be between 1 and {}, got {}", MAX_STEP, step),
        ));
        None
    }
}

fn validate_delay(path: &str, delay: f64, errors: &mut Vec<ValidationError>) -> Option<Duration> {
    match Duration::try_from_secs_f64(delay) {
        Ok(duration) if !duration.is_zero() => Some(duration),
        _ => {
            errors.push(ValidationError::new(
                path,
                format!("delay must be a positive number of seconds, got {}", delay),
            ));
            None
        }
    }
}

/// Warn about scene keys bound to more than one action of the same dimmer
fn duplicate_scene_warnings(dimmer: &DimmerConfig) -> Vec<Diagnostic> {
    let bindings = [
        ("bright.start", dimmer.bright.start),
        ("bright.stop", dimmer.bright.stop),
        ("dim.start", dimmer.dim.start),
        ("dim.stop", dimmer.dim.stop),
    ];

    let mut warnings = Vec::new();
    for (i, (shadowed, key)) in bindings.iter().enumerate() {
        // Only the nearest later binding is reported; it is the one that wins
        if let Some((winner, _)) = bindings[i + 1..].iter().rev().find(|(_, k)| k == key) {
            warnings.push(Diagnostic::Warning(Warning::DuplicateScene {
                dimmer: dimmer.switch_id.clone(),
                scene: key.to_string(),
                shadowed: *shadowed,
                winner: *winner,
            }));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    const HALL: &str = r#"
[dimmers."zwave.hall_switch"]
light_id = "light.hall"
bright = { start_scene_id = 1, start_scene_data = 2, stop_scene_id = 1, stop_scene_data = 1 }
dim = { start_scene_id = 2, start_scene_data = 2, stop_scene_id = 2, stop_scene_data = 1 }
"#;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn load(content: &str) -> Result<(Config, Vec<Diagnostic>), ConfigError> {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "scenedim.toml", content);
        Config::from_files(&[path])
    }

    fn error_text(result: Result<(Config, Vec<Diagnostic>), ConfigError>) -> String {
        match result {
            Ok(_) => panic!("expected config to be rejected"),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn test_full_config() {
        let content = format!(
            r#"
[logging]
level = "debug"

[logging.overrides]
"scenedim::integrations" = "trace"

[mqtt]
broker = "mqtt.local"
username = "scenedim"
password = "hunter2"

{}
step = 5
delay = 0.1
"#,
            HALL
        );

        let (config, diagnostics) = load(&content).unwrap();
        assert!(diagnostics.is_empty(), "unexpected diagnostics: {:?}", diagnostics);

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides.get("scenedim::integrations"),
            Some(&LogLevel::Trace)
        );

        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.broker, "mqtt.local");
        assert_eq!(mqtt.port, 1883);

        assert_eq!(config.dimmers.len(), 1);
        let hall = &config.dimmers[0];
        assert_eq!(hall.switch_id, "zwave.hall_switch");
        assert_eq!(hall.light_id, "light.hall");
        assert_eq!(hall.bright.start, SceneKey::new(1, Some(2)));
        assert_eq!(hall.bright.stop, SceneKey::new(1, Some(1)));
        assert_eq!(hall.dim.start, SceneKey::new(2, Some(2)));
        assert_eq!(hall.dim.stop, SceneKey::new(2, Some(1)));
        assert_eq!(hall.step, 5);
        assert_eq!(hall.delay, Duration::from_millis(100));
    }

    #[test]
    fn test_builtin_defaults() {
        let (config, _) = load(HALL).unwrap();

        let hall = &config.dimmers[0];
        assert_eq!(hall.step, DEFAULT_STEP);
        assert_eq!(hall.delay, DEFAULT_DELAY);
        assert!(config.mqtt.is_none());
    }

    #[test]
    fn test_global_defaults_apply() {
        let content = format!("[defaults]\nstep = 15\ndelay = 0.2\n{}", HALL);
        let (config, _) = load(&content).unwrap();

        let hall = &config.dimmers[0];
        assert_eq!(hall.step, 15);
        assert_eq!(hall.delay, Duration::from_millis(200));
    }

    #[test]
    fn test_integer_delay_accepted() {
        let content = format!("{}delay = 1\n", HALL);
        let (config, _) = load(&content).unwrap();
        assert_eq!(config.dimmers[0].delay, Duration::from_secs(1));
    }

    #[test]
    fn test_scene_data_optional() {
        let content = r#"
[dimmers."zwave.simple"]
light_id = "light.simple"
bright = { start_scene_id = 1, stop_scene_id = 2 }
dim = { start_scene_id = 3, stop_scene_id = 4 }
"#;
        let (config, _) = load(content).unwrap();

        let simple = &config.dimmers[0];
        assert_eq!(simple.bright.start, SceneKey::new(1, None));
        assert_eq!(simple.dim.stop, SceneKey::new(4, None));
    }

    #[test]
    fn test_dimmers_sorted_by_switch() {
        let content = format!(
            r#"
[dimmers."zwave.zz"]
light_id = "light.zz"
bright = {{ start_scene_id = 1, stop_scene_id = 2 }}
dim = {{ start_scene_id = 3, stop_scene_id = 4 }}
{}"#,
            HALL
        );
        let (config, _) = load(&content).unwrap();

        let ids: Vec<_> = config.dimmers.iter().map(|d| d.switch_id.as_str()).collect();
        assert_eq!(ids, vec!["zwave.hall_switch", "zwave.zz"]);
    }

    #[test]
    fn test_missing_fields_all_reported() {
        let content = r#"
[dimmers."zwave.broken"]
bright = { start_scene_id = 1 }
"#;
        let err = error_text(load(content));

        assert!(err.contains("dimmers.zwave.broken.light_id"));
        assert!(err.contains("dimmers.zwave.broken.bright.stop_scene_id"));
        assert!(err.contains("dimmers.zwave.broken.dim"));
    }

    #[test]
    fn test_misspelled_scene_key_rejected() {
        let content = r#"
[dimmers."zwave.hall_switch"]
light_id = "light.hall"
bright = { start_scene_id = 1, start_scene_dat = 2, stop_scene_id = 1, stop_scene_data = 1 }
dim = { start_scene_id = 2, stop_scene_id = 2 }
"#;
        let err = error_text(load(content));
        assert!(err.contains("start_scene_dat"), "unexpected error: {}", err);
    }

    #[test]
    fn test_misspelled_dimmer_key_rejected() {
        let content = format!("{}dealy = 0.2\n", HALL);
        let err = error_text(load(&content));
        assert!(err.contains("dealy"), "unexpected error: {}", err);
    }

    #[test]
    fn test_invalid_step_and_delay() {
        let content = format!("{}step = 0\ndelay = -0.5\n", HALL);
        let err = error_text(load(&content));

        assert!(err.contains("dimmers.zwave.hall_switch.step"));
        assert!(err.contains("dimmers.zwave.hall_switch.delay"));
    }

    #[test]
    fn test_invalid_defaults() {
        let content = format!("[defaults]\nstep = 300\ndelay = 0.0\n{}", HALL);
        let err = error_text(load(&content));

        assert!(err.contains("defaults.step"));
        assert!(err.contains("defaults.delay"));
    }

    #[test]
    fn test_duplicate_scene_warns() {
        let content = r#"
[dimmers."zwave.toggle"]
light_id = "light.toggle"
bright = { start_scene_id = 5, stop_scene_id = 5 }
dim = { start_scene_id = 6, stop_scene_id = 7 }
"#;
        let (config, diagnostics) = load(content).unwrap();

        assert_eq!(config.dimmers.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        let text = format_diagnostics(&diagnostics);
        assert!(text.contains("zwave.toggle"));
        assert!(text.contains("bright.start is ignored"));
    }

    #[test]
    fn test_conflicting_dimmers_across_files() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.toml", HALL);
        let b = write(&dir, "b.toml", HALL);

        let err = error_text(Config::from_files(&[a, b]));
        assert!(err.contains("Merge conflict"));
        assert!(err.contains("dimmers.zwave.hall_switch"));
    }

    #[test]
    fn test_multiple_conflicts_reported() {
        let dir = TempDir::new().unwrap();
        let a = write(
            &dir,
            "a.toml",
            "[logging]\nlevel = \"info\"\n\n[mqtt]\nbroker = \"a\"\n",
        );
        let b = write(
            &dir,
            "b.toml",
            "[logging]\nlevel = \"debug\"\n\n[mqtt]\nbroker = \"b\"\n",
        );

        let err = error_text(Config::from_files(&[a, b]));
        assert!(err.contains("logging.level"));
        assert!(err.contains("'mqtt'"));
    }

    #[test]
    fn test_imports_resolved_relative_to_parent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("conf.d")).unwrap();
        write(&dir, "conf.d/hall.toml", HALL);
        let main = write(
            &dir,
            "main.toml",
            "imports = [\"conf.d/hall.toml\"]\n\n[mqtt]\nbroker = \"localhost\"\n",
        );

        let (config, _) = Config::from_files(&[main]).unwrap();
        assert_eq!(config.dimmers.len(), 1);
        assert!(config.mqtt.is_some());
    }

    #[test]
    fn test_import_cycle_detected() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.toml", "imports = [\"b.toml\"]\n");
        write(&dir, "b.toml", "imports = [\"a.toml\"]\n");

        let err = error_text(Config::from_files(&[a]));
        assert!(err.contains("Import cycle"));
    }

    #[test]
    fn test_empty_config_warns() {
        let (config, diagnostics) = load("").unwrap();

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        assert!(config.dimmers.is_empty());
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_missing_file_error() {
        let missing = PathBuf::from("/nonexistent/scenedim.toml");

        let err = error_text(Config::from_files(&[missing]));
        assert!(err.contains("Failed to read"));
        assert!(err.contains("/nonexistent/scenedim.toml"));
    }
}
