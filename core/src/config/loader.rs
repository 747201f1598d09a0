use crate::config::error::{ConfigError, Result};
use crate::retry::RetryPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retry bound and backoff shape for generation and self-validation
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Lineage store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Validate the merged configuration against the embedded JSON schema
    #[serde(default = "default_true")]
    pub validate_schema: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Budget for one generation gateway call
    #[serde(default = "default_generation_ms")]
    pub generation_ms: u64,

    /// Budget for evaluating one acceptance criterion
    #[serde(default = "default_validation_ms")]
    pub validation_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Upper bound on lineages evolving at the same time
    #[serde(default = "default_max_concurrent_lineages")]
    pub max_concurrent_lineages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; `~/` is expanded
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_true() -> bool {
    true
}
fn default_generation_ms() -> u64 {
    120_000
}
fn default_validation_ms() -> u64 {
    60_000
}
fn default_max_concurrent_lineages() -> usize {
    4
}
fn default_store_path() -> PathBuf {
    PathBuf::from("twintrack.db")
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generation_ms: default_generation_ms(),
            validation_ms: default_validation_ms(),
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lineages: default_max_concurrent_lineages(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeouts: TimeoutConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            store: StoreConfig::default(),
            validate_schema: default_true(),
        }
    }
}

impl OrchestratorConfig {
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.generation_ms)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.validation_ms)
    }

    /// Store path with a leading `~/` expanded to the home directory
    pub fn resolved_store_path(&self) -> PathBuf {
        if let Ok(stripped) = self.store.path.strip_prefix("~")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(stripped);
        }
        self.store.path.clone()
    }

    /// Checks that hold even when schema validation is switched off.
    pub fn check_invariants(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.concurrency.max_concurrent_lineages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "concurrency.max_concurrent_lineages",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_interval_ms < self.retry.base_interval_ms {
            tracing::warn!(
                base_interval_ms = self.retry.base_interval_ms,
                max_interval_ms = self.retry.max_interval_ms,
                "Retry max interval below base interval; base interval will be used as the cap"
            );
        }
        Ok(())
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub const ENV_PREFIX: &'static str = "TWINTRACK";

    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (TWINTRACK_ prefix)
    pub fn load(&self) -> Result<OrchestratorConfig> {
        let mut builder = Config::builder();

        let defaults_json = serde_json::to_string(&OrchestratorConfig::default())?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Example: TWINTRACK_RETRY__MAX_ATTEMPTS=5
        builder = builder.add_source(
            Environment::with_prefix(Self::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let orchestrator_config: OrchestratorConfig = config.try_deserialize()?;

        if orchestrator_config.validate_schema {
            let validator = crate::config::validator::SchemaValidator::new()?;
            validator.validate(&orchestrator_config)?;
        }
        orchestrator_config.check_invariants()?;

        tracing::debug!(
            path = ?self.config_path,
            max_attempts = orchestrator_config.retry.max_attempts,
            max_concurrent_lineages = orchestrator_config.concurrency.max_concurrent_lineages,
            "Loaded orchestrator config"
        );
        Ok(orchestrator_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./twintrack.toml
    /// 2. XDG config: ~/.config/twintrack/config.toml
    /// 3. Home directory: ~/.twintrack.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./twintrack.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("twintrack").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".twintrack.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<OrchestratorConfig> {
        let loader = match Self::find_config_file() {
            Some(config_path) => ConfigLoader::new().with_file(config_path),
            None => ConfigLoader::new(),
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.generation_timeout(), Duration::from_secs(120));
        assert_eq!(config.validation_timeout(), Duration::from_secs(60));
        assert_eq!(config.concurrency.max_concurrent_lineages, 4);
        assert_eq!(config.store.path, PathBuf::from("twintrack.db"));
        assert!(config.validate_schema);
    }

    #[test]
    #[serial]
    fn test_load_with_defaults_only() {
        let config = ConfigLoader::new()
            .load()
            .expect("Failed to load default config");
        assert_eq!(config, OrchestratorConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_with_env_override() {
        unsafe {
            env::set_var("TWINTRACK_RETRY__MAX_ATTEMPTS", "7");
            env::set_var("TWINTRACK_CONCURRENCY__MAX_CONCURRENT_LINEAGES", "2");
        }

        let result = ConfigLoader::new().load();

        unsafe {
            env::remove_var("TWINTRACK_RETRY__MAX_ATTEMPTS");
            env::remove_var("TWINTRACK_CONCURRENCY__MAX_CONCURRENT_LINEAGES");
        }

        let config = result.expect("Failed to load config");
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.concurrency.max_concurrent_lineages, 2);
    }

    #[test]
    #[serial]
    fn test_load_with_toml_file() {
        let toml_content = r#"
[retry]
max_attempts = 5
base_interval_ms = 10
jitter_factor = 0.0

[timeouts]
generation_ms = 500

[store]
path = "/var/lib/twintrack/lineages.db"
"#;

        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("twintrack.toml");
        std::fs::write(&config_path, toml_content).expect("Failed to write temp file");

        let config = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_interval_ms, 10);
        assert_eq!(config.retry.jitter_factor, 0.0);
        // untouched fields keep their defaults
        assert_eq!(config.retry.max_interval_ms, 30_000);
        assert_eq!(config.timeouts.generation_ms, 500);
        assert_eq!(config.timeouts.validation_ms, 60_000);
        assert_eq!(
            config.store.path,
            PathBuf::from("/var/lib/twintrack/lineages.db")
        );
    }

    #[test]
    #[serial]
    fn test_env_wins_over_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("twintrack.toml");
        std::fs::write(
            &config_path,
            "[timeouts]\ngeneration_ms = 500\nvalidation_ms = 250\n",
        )
        .expect("Failed to write temp file");

        unsafe {
            env::set_var("TWINTRACK_TIMEOUTS__GENERATION_MS", "900");
        }

        let result = ConfigLoader::new().with_file(&config_path).load();

        unsafe {
            env::remove_var("TWINTRACK_TIMEOUTS__GENERATION_MS");
        }

        let config = result.expect("Failed to load config");
        assert_eq!(config.timeouts.generation_ms, 900);
        assert_eq!(config.timeouts.validation_ms, 250);
    }

    #[test]
    #[serial]
    fn test_schema_violation_in_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("twintrack.toml");
        std::fs::write(&config_path, "[retry]\njitter_factor = 3.0\n")
            .expect("Failed to write temp file");

        let err = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect_err("jitter out of range");

        assert!(matches!(err, ConfigError::Schema { .. }));
        assert_eq!(err.key(), Some("retry.jitter_factor"));
    }

    #[test]
    #[serial]
    fn test_invariants_hold_without_schema() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("twintrack.toml");
        std::fs::write(
            &config_path,
            "validate_schema = false\n[retry]\nmax_attempts = 0\n",
        )
        .expect("Failed to write temp file");

        let err = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect_err("zero attempts");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "retry.max_attempts",
                ..
            }
        ));
        assert_eq!(err.to_string(), "invalid value for `retry.max_attempts`: must be at least 1");
    }

    #[test]
    fn test_missing_file_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/twintrack.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_home_relative_store_path() {
        let mut config = OrchestratorConfig::default();
        config.store.path = PathBuf::from("~/lineages.db");

        let resolved = config.resolved_store_path();

        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolved, home.join("lineages.db"));
        }
    }
}
