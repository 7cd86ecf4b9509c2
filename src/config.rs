use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "galera-perf.toml";

/// Top-level configuration loaded from galera-perf.toml.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct PerfConfig {
    pub input: InputConfig,
    pub stats: StatsConfig,
}

/// Where the logs live inside each run directory.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub timer_file: PathBuf,
    pub data_pattern: String,
    /// Run directories whose name ends with this are skipped.
    pub skip_suffix: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StatsConfig {
    /// Raw query totals are divided by this before computing qps.
    pub qps_scale: f64,
    pub confidence: f64,
}

// --- Default implementations ---

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            timer_file: PathBuf::from("timer.txt"),
            data_pattern: "*.data".to_string(),
            skip_suffix: ".1".to_string(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            qps_scale: 100.0,
            confidence: 0.95,
        }
    }
}

impl PerfConfig {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist and parse. Without one the
    /// default file is used if present, otherwise built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let config: Self =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        config.validate(&path)?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if !(self.stats.confidence > 0.0 && self.stats.confidence < 1.0) {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                message: format!(
                    "stats.confidence must be between 0 and 1, got {}",
                    self.stats.confidence
                ),
            });
        }
        if self.stats.qps_scale == 0.0 {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                message: "stats.qps_scale must not be zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Errors from loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        path: PathBuf,
        message: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid { path, message } => {
                write!(f, "invalid config {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_historical_layout() {
        let config = PerfConfig::default();
        assert_eq!(config.input.timer_file, PathBuf::from("timer.txt"));
        assert_eq!(config.input.data_pattern, "*.data");
        assert_eq!(config.input.skip_suffix, ".1");
        assert_eq!(config.stats.qps_scale, 100.0);
        assert_eq!(config.stats.confidence, 0.95);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perf.toml");
        std::fs::write(&path, "[stats]\nconfidence = 0.99\n").unwrap();

        let config = PerfConfig::load(Some(&path)).unwrap();
        assert_eq!(config.stats.confidence, 0.99);
        assert_eq!(config.stats.qps_scale, 100.0);
        assert_eq!(config.input, InputConfig::default());
    }

    #[test]
    fn explicit_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let err = PerfConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perf.toml");
        std::fs::write(&path, "[stats\n").unwrap();
        assert!(matches!(
            PerfConfig::load(Some(&path)).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("perf.toml");
        std::fs::write(&path, "[stats]\nconfidence = 95\n").unwrap();
        let err = PerfConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("stats.confidence"));
    }
}
