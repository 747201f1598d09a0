use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building an [`OrchestratorConfig`](super::OrchestratorConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer (defaults, file, environment) could not be merged or deserialized
    #[error("failed to load orchestrator config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("orchestrator config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to encode orchestrator config: {0}")]
    Encode(#[from] serde_json::Error),

    /// A value passed the schema but breaks an orchestrator invariant
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    /// The embedded schema itself could not be used
    #[error("orchestrator config schema is unusable: {0}")]
    SchemaUnusable(String),

    #[error("orchestrator config failed schema validation {}", describe(.violations))]
    Schema { violations: Vec<SchemaViolation> },
}

impl ConfigError {
    /// Dotted key of the offending setting, when one is known.
    pub fn key(&self) -> Option<&str> {
        match self {
            ConfigError::InvalidValue { key, .. } => Some(*key),
            ConfigError::Schema { violations } => violations.first().map(|v| v.path.as_str()),
            _ => None,
        }
    }
}

/// One schema failure, located by its dotted config key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// e.g. `retry.jitter_factor`, or `root` for the whole document
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn describe(violations: &[SchemaViolation]) -> String {
    let plural = if violations.len() == 1 { "" } else { "s" };
    let lines: Vec<String> = violations.iter().map(ToString::to_string).collect();
    format!(
        "({} violation{plural}):\n  - {}",
        violations.len(),
        lines.join("\n  - ")
    )
}

/// Type alias for Results using ConfigError
pub type Result<T> = std::result::Result<T, ConfigError>;
