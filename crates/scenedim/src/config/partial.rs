use std::collections::HashMap;
use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use super::LogLevel;
use super::diagnostics::Diagnostic;
use super::diagnostics::Error;
use super::diagnostics::LoadError;
use super::diagnostics::MergeConflictLocation;
use super::diagnostics::MergeError;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;
use crate::integrations::mqtt::MqttConfig;

/// One config file as written, before merging and validation
#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub mqtt: Option<MqttConfig>,
    pub defaults: Option<PartialDefaults>,
    pub dimmers: Option<HashMap<String, PartialDimmer>>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<toml::Spanned<LogLevel>>,
    pub overrides: Option<HashMap<String, toml::Spanned<LogLevel>>>,
}

/// Fallback step/delay for dimmers that don't set their own
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialDefaults {
    pub step: Option<toml::Spanned<i64>>,
    pub delay: Option<toml::Spanned<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialDimmer {
    pub light_id: Option<String>,
    pub bright: Option<PartialScenes>,
    pub dim: Option<PartialScenes>,
    pub step: Option<i64>,
    pub delay: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialScenes {
    pub start_scene_id: Option<i64>,
    pub stop_scene_id: Option<i64>,
    pub start_scene_data: Option<i64>,
    pub stop_scene_data: Option<i64>,
}

/// Locate `needle` in a file for diagnostics, falling back to an empty span
fn find_span(content: &str, needle: &str) -> Range<usize> {
    content
        .find(needle)
        .map(|start| start..(start + needle.len()))
        .unwrap_or(0..0)
}

/// Records where each field was first set, reporting later definitions as conflicts
#[derive(Default)]
struct FirstWins {
    seen: HashMap<String, MergeConflictLocation>,
}

impl FirstWins {
    /// Returns true if this is the first definition of `field_path`
    fn claim(
        &mut self,
        field_path: String,
        message: impl FnOnce() -> String,
        location: MergeConflictLocation,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> bool {
        if let Some(prev) = self.seen.get(&field_path) {
            diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                field_path,
                message: message(),
                conflicts: vec![prev.clone(), location],
            })));
            false
        } else {
            self.seen.insert(field_path, location);
            true
        }
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Returns all loaded configs in order (imports first, then parent)
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        // Canonicalize the path to detect cycles reliably
        let canonical_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        // Process imports first (depth-first)
        for import_path in &config.imports {
            let import_path_buf = PathBuf::from(import_path);

            // Resolve relative imports from the parent file's directory
            let resolved_path = if import_path_buf.is_absolute() {
                import_path_buf
            } else {
                let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
                parent_dir.join(import_path_buf)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        configs.push(config);

        // Remove from visited set to allow imports from sibling branches
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.mqtt.is_none()
            && self.defaults.is_none()
            && self.dimmers.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Every conflict is collected so all of them are reported at once.
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut diagnostics = Vec::new();
        let mut imports = Vec::new();
        let mut first = FirstWins::default();

        for config in configs {
            imports.extend(config.imports.clone());

            let source_info = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });
            let location = |span: Range<usize>| MergeConflictLocation {
                file_path: source_info.file_path.clone(),
                span,
                content: source_info.content.clone(),
            };

            if config.is_empty() {
                diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                    file_path: source_info.file_path.clone(),
                }));
            }

            if let Some(logging) = config.logging {
                let result_logging = result.logging.get_or_insert_with(Default::default);

                if let Some(level) = logging.level {
                    if first.claim(
                        "logging.level".to_string(),
                        || "Logging level defined in multiple config files".to_string(),
                        location(level.span()),
                        &mut diagnostics,
                    ) {
                        result_logging.level = Some(level);
                    }
                }

                for (key, value) in logging.overrides.unwrap_or_default() {
                    if first.claim(
                        format!("logging.overrides.{}", key),
                        || {
                            format!(
                                "Logging override for '{}' defined in multiple config files",
                                key
                            )
                        },
                        location(value.span()),
                        &mut diagnostics,
                    ) {
                        result_logging
                            .overrides
                            .get_or_insert_with(HashMap::new)
                            .insert(key, value);
                    }
                }
            }

            if let Some(mqtt) = config.mqtt {
                if first.claim(
                    "mqtt".to_string(),
                    || "MQTT section defined in multiple config files".to_string(),
                    location(find_span(&source_info.content, "[mqtt]")),
                    &mut diagnostics,
                ) {
                    result.mqtt = Some(mqtt);
                }
            }

            if let Some(defaults) = config.defaults {
                let result_defaults = result.defaults.get_or_insert_with(Default::default);

                if let Some(step) = defaults.step {
                    if first.claim(
                        "defaults.step".to_string(),
                        || "Default step defined in multiple config files".to_string(),
                        location(step.span()),
                        &mut diagnostics,
                    ) {
                        result_defaults.step = Some(step);
                    }
                }

                if let Some(delay) = defaults.delay {
                    if first.claim(
                        "defaults.delay".to_string(),
                        || "Default delay defined in multiple config files".to_string(),
                        location(delay.span()),
                        &mut diagnostics,
                    ) {
                        result_defaults.delay = Some(delay);
                    }
                }
            }

            if let Some(dimmers) = config.dimmers {
                let result_dimmers = result.dimmers.get_or_insert_with(HashMap::new);

                for (switch_id, dimmer) in dimmers {
                    if first.claim(
                        format!("dimmers.{}", switch_id),
                        || format!("Dimmer '{}' defined in multiple config files", switch_id),
                        location(find_span(&source_info.content, &switch_id)),
                        &mut diagnostics,
                    ) {
                        result_dimmers.insert(switch_id, dimmer);
                    }
                }
            }
        }

        result.imports = imports;

        (result, diagnostics)
    }
}
