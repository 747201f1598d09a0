use crate::config::error::{ConfigError, Result, SchemaViolation};
use crate::config::loader::OrchestratorConfig;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Schema validator for the orchestrator configuration
pub struct SchemaValidator {
    schema: JSONSchema,
}

impl SchemaValidator {
    /// Create a validator from the schema embedded at compile time
    pub fn new() -> Result<Self> {
        let schema_str = include_str!("schemas/orchestrator_config.schema.json");
        let schema_value: Value = serde_json::from_str(schema_str)
            .map_err(|e| ConfigError::SchemaUnusable(format!("failed to parse: {e}")))?;

        let schema = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_value)
            .map_err(|e| ConfigError::SchemaUnusable(format!("failed to compile: {e}")))?;

        Ok(Self { schema })
    }

    /// Validate a configuration, listing every violation in the error.
    pub fn validate(&self, config: &OrchestratorConfig) -> Result<()> {
        let config_value = serde_json::to_value(config)?;

        if let Err(errors) = self.schema.validate(&config_value) {
            let violations = errors
                .map(|e| SchemaViolation {
                    path: dotted_key(&e.instance_path.to_string()),
                    message: e.to_string(),
                })
                .collect();
            return Err(ConfigError::Schema { violations });
        }

        Ok(())
    }
}

/// `/retry/jitter_factor` -> `retry.jitter_factor`
fn dotted_key(pointer: &str) -> String {
    let key = pointer.trim_start_matches('/').replace('/', ".");
    if key.is_empty() { "root".to_string() } else { key }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let validator = SchemaValidator::new().expect("Failed to create validator");

        let result = validator.validate(&OrchestratorConfig::default());

        assert!(result.is_ok(), "Default config should be valid: {result:?}");
    }

    #[test]
    fn test_jitter_above_one_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.retry.jitter_factor = 1.5;

        let validator = SchemaValidator::new().expect("Failed to create validator");
        let err = validator.validate(&config).expect_err("jitter out of range");

        assert!(matches!(err, ConfigError::Schema { .. }));
        assert_eq!(err.key(), Some("retry.jitter_factor"));
        assert!(
            err.to_string().contains("retry.jitter_factor: "),
            "Error should name the field, got: {err}"
        );
    }

    #[test]
    fn test_all_violations_are_reported() {
        let mut config = OrchestratorConfig::default();
        config.retry.max_attempts = 0;
        config.concurrency.max_concurrent_lineages = 0;

        let validator = SchemaValidator::new().expect("Failed to create validator");
        let err = validator.validate(&config).expect_err("two violations");

        match &err {
            ConfigError::Schema { violations } => {
                let mut keys: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
                keys.sort_unstable();
                assert_eq!(
                    keys,
                    vec!["concurrency.max_concurrent_lineages", "retry.max_attempts"]
                );
            }
            other => panic!("expected schema violations, got {other}"),
        }
        assert!(err.to_string().contains("2 violations"), "got: {err}");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let mut config = OrchestratorConfig::default();
        config.timeouts.generation_ms = 0;

        let validator = SchemaValidator::new().expect("Failed to create validator");

        assert!(validator.validate(&config).is_err());
    }
}
