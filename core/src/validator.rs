//! Consistency validation: run the shared criteria against a track and
//! compare two tracks' results criterion by criterion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use twintrack_async_utils::{Interrupted, WithDeadlineExt};

use crate::criteria::CriteriaRunner;
use crate::error::{Result, TwinTrackError};
use crate::lineage::GeneratedContent;
use crate::spec_record::SpecificationRecord;
use crate::types::Verdict;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub criterion: String,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Every criterion passed
    Pass,
    /// No criterion passed
    Fail,
    Partial,
}

/// Per-criterion verdicts for one piece of content, in criterion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub verdicts: Vec<CriterionVerdict>,
    pub status: ValidationStatus,
    /// Digest of the content these verdicts were taken against
    pub content_digest: String,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn from_verdicts(verdicts: Vec<CriterionVerdict>, content_digest: String) -> Self {
        let passed = verdicts.iter().filter(|v| v.verdict.is_pass()).count();
        let status = if passed == verdicts.len() {
            ValidationStatus::Pass
        } else if passed == 0 {
            ValidationStatus::Fail
        } else {
            ValidationStatus::Partial
        };
        Self {
            verdicts,
            status,
            content_digest,
            validated_at: Utc::now(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == ValidationStatus::Pass
    }

    pub fn verdict(&self, criterion: &str) -> Option<Verdict> {
        self.verdicts
            .iter()
            .find(|v| v.criterion == criterion)
            .map(|v| v.verdict)
    }

    /// Inconclusive counts as a failure here.
    pub fn passed(&self, criterion: &str) -> bool {
        self.verdict(criterion).is_some_and(Verdict::is_pass)
    }

    pub fn failed_criteria(&self) -> Vec<&str> {
        self.verdicts
            .iter()
            .filter(|v| !v.verdict.is_pass())
            .map(|v| v.criterion.as_str())
            .collect()
    }

    /// Fraction of criteria passed (the track's fitness)
    pub fn pass_ratio(&self) -> f64 {
        if self.verdicts.is_empty() {
            return 0.0;
        }
        let passed = self.verdicts.iter().filter(|v| v.verdict.is_pass()).count();
        passed as f64 / self.verdicts.len() as f64
    }
}

/// Outcome of comparing two validation results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossValidation {
    /// Same pass/fail outcome on every criterion
    pub agree: bool,
    /// Criteria with differing outcomes, in specification order
    pub mismatches: Vec<String>,
    /// Both results pass every criterion
    pub both_pass: bool,
}

pub struct ConsistencyValidator {
    runner: Arc<dyn CriteriaRunner>,
    timeout: Duration,
}

impl ConsistencyValidator {
    pub fn new(runner: Arc<dyn CriteriaRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub fn runner_name(&self) -> &str {
        self.runner.name()
    }

    /// Evaluate every criterion of `spec` against `content`.
    ///
    /// A criterion that fails or is inconclusive is a normal result. A
    /// runner error or timeout is not: it aborts the run with
    /// [`TwinTrackError::Validation`].
    pub async fn validate(
        &self,
        spec: &SpecificationRecord,
        content: &GeneratedContent,
        cancel: &CancellationToken,
    ) -> Result<ValidationResult> {
        let mut verdicts = Vec::with_capacity(spec.acceptance_criteria().len());

        for criterion in spec.acceptance_criteria() {
            let verdict = match self
                .runner
                .evaluate(criterion, content)
                .with_deadline(self.timeout, cancel)
                .await
            {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(err)) => {
                    return Err(TwinTrackError::Validation {
                        criterion: criterion.name.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(Interrupted::Cancelled) => return Err(TwinTrackError::Cancelled),
                Err(timed_out @ Interrupted::TimedOut(_)) => {
                    return Err(TwinTrackError::Validation {
                        criterion: criterion.name.clone(),
                        reason: timed_out.to_string(),
                    });
                }
            };

            if verdict == Verdict::Inconclusive {
                warn!(
                    criterion = %criterion.name,
                    runner = self.runner.name(),
                    "Criterion inconclusive, counting as failure"
                );
            }
            verdicts.push(CriterionVerdict {
                criterion: criterion.name.clone(),
                verdict,
            });
        }

        Ok(ValidationResult::from_verdicts(verdicts, content.digest()))
    }

    /// Compare two results per criterion. Symmetric; never repairs anything.
    pub fn cross_validate(
        a: &ValidationResult,
        b: &ValidationResult,
        spec: &SpecificationRecord,
    ) -> CrossValidation {
        let mismatches: Vec<String> = spec
            .criterion_names()
            .filter(|name| a.passed(name) != b.passed(name))
            .map(str::to_string)
            .collect();
        let both_pass = spec
            .criterion_names()
            .all(|name| a.passed(name) && b.passed(name));

        CrossValidation {
            agree: mismatches.is_empty(),
            mismatches,
            both_pass,
        }
    }
}
