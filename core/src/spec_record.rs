//! Specification Records: the immutable, language-agnostic description both
//! tracks of a lineage are built against.
//!
//! Records are usually authored as TOML:
//!
//! ```toml
//! namespace = "text"
//! name = "tokenizer"
//! purpose = "Split UTF-8 input into whitespace-separated tokens"
//!
//! [[acceptance_criteria]]
//! name = "splits_on_whitespace"
//! description = "\"a b\" yields [\"a\", \"b\"]"
//!
//! [[external_requirements]]
//! name = "unicode-segmentation"
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Result, TwinTrackError};

pub const DEFAULT_NAMESPACE: &str = "default";

/// One named, independently checkable condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl AcceptanceCriterion {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Named reference to a shared building block the module depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRequirement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_generation() -> u32 {
    1
}

fn default_completeness() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecificationRecord {
    #[serde(default = "default_namespace")]
    namespace: String,
    name: String,
    #[serde(default = "default_generation")]
    generation: u32,
    purpose: String,
    #[serde(default)]
    acceptance_criteria: Vec<AcceptanceCriterion>,
    #[serde(default)]
    external_requirements: Vec<ExternalRequirement>,
    /// Fraction of criteria an implementation must evidence before its
    /// intent may be extracted.
    #[serde(default = "default_completeness")]
    intent_completeness: f64,
}

impl SpecificationRecord {
    pub fn builder(name: impl Into<String>, purpose: impl Into<String>) -> SpecificationBuilder {
        SpecificationBuilder {
            record: Self {
                namespace: default_namespace(),
                name: name.into(),
                generation: default_generation(),
                purpose: purpose.into(),
                acceptance_criteria: Vec::new(),
                external_requirements: Vec::new(),
                intent_completeness: default_completeness(),
            },
        }
    }

    /// Parse and validate a TOML-authored record
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let record: Self = toml::from_str(contents)
            .map_err(|e| TwinTrackError::InvalidSpecification(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| TwinTrackError::SpecificationRead {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TwinTrackError::InvalidSpecification(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TwinTrackError::InvalidSpecification(msg));

        if self.namespace.trim().is_empty() {
            return invalid("namespace cannot be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return invalid("name cannot be empty".to_string());
        }
        if self.purpose.trim().is_empty() {
            return invalid(format!("{}: purpose cannot be empty", self.name));
        }
        if self.generation == 0 {
            return invalid(format!("{}: generation starts at 1", self.name));
        }
        if self.acceptance_criteria.is_empty() {
            return invalid(format!(
                "{}: at least one acceptance criterion is required",
                self.name
            ));
        }

        let mut seen = HashSet::new();
        for criterion in &self.acceptance_criteria {
            if criterion.name.trim().is_empty() {
                return invalid(format!("{}: criterion name cannot be empty", self.name));
            }
            if !seen.insert(criterion.name.as_str()) {
                return invalid(format!(
                    "{}: duplicate criterion '{}'",
                    self.name, criterion.name
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.intent_completeness) {
            return invalid(format!(
                "{}: intent_completeness must be between 0.0 and 1.0, got {}",
                self.name, self.intent_completeness
            ));
        }

        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn acceptance_criteria(&self) -> &[AcceptanceCriterion] {
        &self.acceptance_criteria
    }

    pub fn criterion_names(&self) -> impl Iterator<Item = &str> {
        self.acceptance_criteria.iter().map(|c| c.name.as_str())
    }

    pub fn external_requirements(&self) -> &[ExternalRequirement] {
        &self.external_requirements
    }

    pub fn intent_completeness(&self) -> f64 {
        self.intent_completeness
    }

    /// Identity plus generation, e.g. `text/tokenizer@g2`
    pub fn key(&self) -> String {
        format!("{}/{}@g{}", self.namespace, self.name, self.generation)
    }

    /// Content hash used to detect a different body under the same key.
    pub fn digest(&self) -> Result<String> {
        let body = serde_json::to_vec(self).map_err(|source| TwinTrackError::Serialization {
            what: "specification record",
            source,
        })?;
        Ok(sha256_hex(&body))
    }

    /// Start the next generation of this record. Identity is kept; every
    /// other attribute may be changed on the returned builder.
    pub fn respecify(&self) -> SpecificationBuilder {
        let mut record = self.clone();
        record.generation = self.generation.saturating_add(1);
        SpecificationBuilder { record }
    }
}

/// Builder for [`SpecificationRecord`]; `build` validates.
#[derive(Debug, Clone)]
pub struct SpecificationBuilder {
    record: SpecificationRecord,
}

impl SpecificationBuilder {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.record.namespace = namespace.into();
        self
    }

    pub fn generation(mut self, generation: u32) -> Self {
        self.record.generation = generation;
        self
    }

    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.record.purpose = purpose.into();
        self
    }

    pub fn criterion(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.record
            .acceptance_criteria
            .push(AcceptanceCriterion::new(name, description));
        self
    }

    pub fn without_criteria(mut self) -> Self {
        self.record.acceptance_criteria.clear();
        self
    }

    pub fn requirement(mut self, name: impl Into<String>, reference: Option<String>) -> Self {
        self.record.external_requirements.push(ExternalRequirement {
            name: name.into(),
            reference,
        });
        self
    }

    pub fn intent_completeness(mut self, fraction: f64) -> Self {
        self.record.intent_completeness = fraction;
        self
    }

    pub fn build(self) -> Result<SpecificationRecord> {
        self.record.validate()?;
        Ok(self.record)
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
