//! Application configuration management.
//!
//! Handles loading, saving and validating bagwatch configuration:
//! - Proximity thresholds and scan timing
//! - Item storage backend and data directory
//! - HTTP bind address
//! - Logging mode
//!
//! Files are TOML. Any value can be overridden from the environment with
//! `BAGWATCH__<SECTION>__<KEY>`, e.g. `BAGWATCH__PROXIMITY__NEAR_THRESHOLD=-55`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Environment variable holding an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "BAGWATCH_CONFIG";

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("failed to write {path}: {source}")]
    WriteError {
        /// Target path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No platform configuration directory could be determined.
    #[error("cannot determine configuration directory")]
    NoConfigDir,

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proximity classification and scan timing.
    pub proximity: ProximityConfig,
    /// Item storage.
    pub storage: StorageConfig,
    /// HTTP server.
    pub server: ServerConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// RSSI thresholds and scan cadence.
///
/// `near_threshold` must not be below `far_threshold`; readings between the
/// two keep the previous classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
#[schema(example = json!({
    "near_threshold": -50,
    "far_threshold": -80,
    "scan_interval_ms": 5000,
    "scan_window_ms": 4000
}))]
pub struct ProximityConfig {
    /// RSSI (dBm) at or above which an item is `nearby`.
    #[schema(example = -50)]
    pub near_threshold: i16,

    /// RSSI (dBm) at or below which an item is `far`.
    #[schema(example = -80)]
    pub far_threshold: i16,

    /// Delay between monitoring cycles.
    #[schema(example = 5000)]
    pub scan_interval_ms: u64,

    /// Length of the discovery window inside each cycle.
    #[schema(example = 4000)]
    pub scan_window_ms: u64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            near_threshold: -50,
            far_threshold: -80,
            scan_interval_ms: 5000,
            scan_window_ms: 4000,
        }
    }
}

impl ProximityConfig {
    /// Interval between monitoring cycles.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    /// Duration of one discovery window.
    #[must_use]
    pub const fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    /// Check the thresholds and timings.
    ///
    /// # Errors
    ///
    /// Returns every problem found, wrapped in
    /// [`ConfigError::MultipleValidationErrors`] when there is more than one.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.near_threshold < self.far_threshold {
            errors.push(ConfigError::ValidationError {
                field: "proximity.near_threshold",
                message: format!(
                    "near threshold ({} dBm) is below far threshold ({} dBm)",
                    self.near_threshold, self.far_threshold
                ),
            });
        }
        if self.scan_interval_ms == 0 {
            errors.push(ConfigError::ValidationError {
                field: "proximity.scan_interval_ms",
                message: "must be greater than zero".into(),
            });
        }
        if self.scan_window_ms == 0 {
            errors.push(ConfigError::ValidationError {
                field: "proximity.scan_window_ms",
                message: "must be greater than zero".into(),
            });
        }

        collapse(errors)
    }

    /// Merge a partial update over this configuration.
    #[must_use]
    pub fn merged(&self, patch: &ProximityConfigPatch) -> Self {
        Self {
            near_threshold: patch.near_threshold.unwrap_or(self.near_threshold),
            far_threshold: patch.far_threshold.unwrap_or(self.far_threshold),
            scan_interval_ms: patch.scan_interval_ms.unwrap_or(self.scan_interval_ms),
            scan_window_ms: patch.scan_window_ms.unwrap_or(self.scan_window_ms),
        }
    }
}

/// Partial update of [`ProximityConfig`]; absent fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "near_threshold": -55 }))]
pub struct ProximityConfigPatch {
    /// New near threshold (dBm).
    pub near_threshold: Option<i16>,
    /// New far threshold (dBm).
    pub far_threshold: Option<i16>,
    /// New monitoring interval.
    pub scan_interval_ms: Option<u64>,
    /// New discovery window.
    pub scan_window_ms: Option<u64>,
}

/// Where tracked items are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-process only, lost on restart.
    Memory,
    /// One JSON document per owner under the data directory.
    #[default]
    Json,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection.
    pub backend: StorageBackend,
    /// Data directory; platform default when absent.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// The data directory to use.
    ///
    /// On Linux: `/var/lib/bagwatch/`. Elsewhere the platform data dir.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] if no platform directory exists.
    pub fn resolved_data_dir(&self) -> ConfigResult<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/var/lib/bagwatch"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "bagwatch")
                .ok_or(ConfigError::NoConfigDir)?;
            Ok(dirs.data_dir().to_path_buf())
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".into(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON file logs plus compact stdout when true; pretty stdout otherwise.
    pub production: bool,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            production: false,
            level: "info".into(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists) layered with
    /// `BAGWATCH__*` environment overrides, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("BAGWATCH")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        tracing::debug!(path = ?path, "configuration loaded");
        Ok(loaded)
    }

    /// Load from [`Config::default_path`].
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_default() -> ConfigResult<Self> {
        let path = Self::default_path()?;
        Self::load(Some(&path))
    }

    /// Save configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns all validation problems found.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        if let Err(err) = self.proximity.validate() {
            match err {
                ConfigError::MultipleValidationErrors(inner) => errors.extend(inner),
                other => errors.push(other),
            }
        }
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ConfigError::ValidationError {
                field: "server.bind_address",
                message: format!("'{}' is not a socket address", self.server.bind_address),
            });
        }
        collapse(errors)
    }

    /// The configuration file path.
    ///
    /// `BAGWATCH_CONFIG` wins; otherwise `/etc/bagwatch/config.toml` on Linux
    /// and the platform config dir elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] if no platform directory exists.
    pub fn default_path() -> ConfigResult<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/bagwatch/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "bagwatch")
                .ok_or(ConfigError::NoConfigDir)?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

fn collapse(mut errors: Vec<ConfigError>) -> ConfigResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ConfigError::MultipleValidationErrors(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.proximity.near_threshold, -50);
        assert_eq!(config.proximity.far_threshold, -80);
        assert_eq!(config.proximity.scan_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let proximity = ProximityConfig {
            near_threshold: -90,
            far_threshold: -60,
            ..ProximityConfig::default()
        };
        let err = proximity.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ValidationError {
                field: "proximity.near_threshold",
                ..
            }
        ));
    }

    #[test]
    fn test_equal_thresholds_accepted() {
        let proximity = ProximityConfig {
            near_threshold: -70,
            far_threshold: -70,
            ..ProximityConfig::default()
        };
        assert!(proximity.validate().is_ok());
    }

    #[test]
    fn test_multiple_errors_collected() {
        let proximity = ProximityConfig {
            near_threshold: -90,
            far_threshold: -60,
            scan_interval_ms: 0,
            scan_window_ms: 0,
        };
        match proximity.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_patch_merges_only_present_fields() {
        let base = ProximityConfig::default();
        let patch = ProximityConfigPatch {
            near_threshold: Some(-40),
            ..ProximityConfigPatch::default()
        };
        let merged = base.merged(&patch);
        assert_eq!(merged.near_threshold, -40);
        assert_eq!(merged.far_threshold, base.far_threshold);
        assert_eq!(merged.scan_interval_ms, base.scan_interval_ms);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.proximity.near_threshold = -45;
        config.storage.backend = StorageBackend::Memory;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.proximity.near_threshold, -45);
        assert_eq!(loaded.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(loaded.proximity, ProximityConfig::default());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[proximity]\nnear_threshold = -90\nfar_threshold = -40\n",
        )
        .unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let storage = StorageConfig {
            backend: StorageBackend::Json,
            data_dir: Some(PathBuf::from("/tmp/bags")),
        };
        assert_eq!(
            storage.resolved_data_dir().unwrap(),
            PathBuf::from("/tmp/bags")
        );
    }
}
