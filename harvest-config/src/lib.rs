//! Loader for Harvest configuration with YAML + environment overlays.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. YAML files and inline YAML snippets, in the order they were attached
//! 2. `HARVEST__`-prefixed environment variables (`HARVEST__PACING__SCALE=0.5`)
//!
//! String values may reference `${VAR}` placeholders which are expanded
//! recursively before the typed structs are materialised. Every section has
//! defaults, so an empty document is a valid configuration.
use config::{Config, ConfigError, Environment, File, FileFormat};
use harvest_common::PacingMode;
use harvest_common::observability::LogFormat;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;
const ENV_PREFIX: &str = "HARVEST";

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration: {0}")]
    Source(#[from] ConfigError),

    #[error("configuration has an unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestConfig {
    pub version: Option<String>,
    #[serde(default)]
    pub pacing: PacingSection,
    #[serde(default)]
    pub jobs: JobsSection,
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// What to do when a list never reaches its minimum row count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowShortfall {
    #[default]
    Proceed,
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacingSection {
    #[serde(default)]
    pub mode: PacingMode,
    /// Global multiplier applied to every computed delay.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Overrides the per-mode minimum row threshold.
    #[serde(default)]
    pub min_rows: Option<usize>,
    #[serde(default)]
    pub row_shortfall: RowShortfall,
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
}

impl Default for PacingSection {
    fn default() -> Self {
        Self {
            mode: PacingMode::default(),
            scale: default_scale(),
            min_rows: None,
            row_shortfall: RowShortfall::default(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsSection {
    #[serde(default = "default_jobs_dir")]
    pub dir: PathBuf,
    /// Terminal jobs older than this many days are pruned at startup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            dir: default_jobs_dir(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportSection {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_true")]
    pub stderr: bool,
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            dir: None,
            format: LogFormat::default(),
            stderr: true,
            filter: default_filter(),
        }
    }
}

fn default_scale() -> f64 {
    1.0
}
fn default_readiness_timeout_ms() -> u64 {
    15_000
}
fn default_jobs_dir() -> PathBuf {
    PathBuf::from("data/jobs")
}
fn default_retention_days() -> u64 {
    3
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data/exports")
}
fn default_true() -> bool {
    true
}
fn default_filter() -> String {
    "info".into()
}

impl HarvestConfig {
    /// Reject values the components cannot honour.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if !self.pacing.scale.is_finite() || self.pacing.scale < 0.0 {
            return Err(ConfigLoadError::Invalid(format!(
                "pacing.scale must be a finite, non-negative number (got {})",
                self.pacing.scale
            )));
        }
        if self.pacing.readiness_timeout_ms == 0 {
            return Err(ConfigLoadError::Invalid(
                "pacing.readiness_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${VAR}` references in every string, following chains up to a fixed depth.
fn expand_placeholders(v: &mut Value) {
    match v {
        Value::String(s) if s.contains('$') => {
            let mut current = std::mem::take(s);
            for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                let next = shellexpand::env(&current)
                    .map(|cow| cow.into_owned())
                    .unwrap_or_else(|_| current.clone());
                if next == current {
                    break;
                }
                current = next;
            }
            *s = current;
        }
        Value::Array(items) => items.iter_mut().for_each(expand_placeholders),
        Value::Object(map) => map.values_mut().for_each(expand_placeholders),
        _ => {}
    }
}

/// Builder over the `config` crate wiring.
#[derive(Default)]
pub struct HarvestConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl HarvestConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a YAML/TOML/JSON file; the `config` crate infers format by suffix.
    /// Missing files are an error unless `required` is false.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P, required: bool) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(required));
        self
    }

    /// Merge an inline YAML snippet.
    ///
    /// ```
    /// use harvest_common::PacingMode;
    /// use harvest_config::HarvestConfigLoader;
    ///
    /// let cfg = HarvestConfigLoader::new()
    ///     .with_yaml_str("pacing:\n  mode: fast\n  scale: 0.5\n")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(cfg.pacing.mode, PacingMode::Fast);
    /// assert_eq!(cfg.pacing.scale, 0.5);
    /// assert_eq!(cfg.jobs.retention_days, 3);
    /// ```
    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self.builder.add_source(File::from_str(yaml, FileFormat::Yaml));
        self
    }

    /// Merge all sources, layer the environment on top, expand placeholders,
    /// and validate the result.
    pub fn load(self) -> Result<HarvestConfig, ConfigLoadError> {
        let merged = self
            .builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut raw: Value = merged.try_deserialize()?;
        expand_placeholders(&mut raw);

        let typed: HarvestConfig = serde_json::from_value(raw)?;
        typed.validate()?;
        Ok(typed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_nested_values() {
        temp_env::with_vars([("CITY", Some("Winston")), ("STATE", Some("NC"))], || {
            let mut v = json!(["dir-$CITY", { "loc": "${CITY}-${STATE}" }, 42, null]);
            expand_placeholders(&mut v);
            assert_eq!(v, json!(["dir-Winston", { "loc": "Winston-NC" }, 42, null]));
        });
    }

    #[test]
    fn follows_chained_references() {
        temp_env::with_vars(
            [
                ("BASE", Some("/srv")),
                ("DATA", Some("${BASE}/data")),
                ("JOBS", Some("${DATA}/jobs")),
            ],
            || {
                let mut v = json!("${JOBS}");
                expand_placeholders(&mut v);
                assert_eq!(v, json!("/srv/data/jobs"));
            },
        );
    }

    #[test]
    fn cycles_terminate() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}");
            expand_placeholders(&mut v);
            let s = v.as_str().unwrap();
            assert!(s.starts_with("x=") && s.contains("${"));
        });
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("hi-${HARVEST_TEST_DOES_NOT_EXIST}");
        expand_placeholders(&mut v);
        assert_eq!(v, json!("hi-${HARVEST_TEST_DOES_NOT_EXIST}"));
    }

    #[test]
    fn rejects_negative_scale() {
        let mut cfg = HarvestConfig::default();
        cfg.pacing.scale = -1.0;
        assert!(matches!(cfg.validate(), Err(ConfigLoadError::Invalid(_))));

        cfg.pacing.scale = f64::NAN;
        assert!(cfg.validate().is_err());

        cfg.pacing.scale = 0.0;
        assert!(cfg.validate().is_ok());
    }
}
