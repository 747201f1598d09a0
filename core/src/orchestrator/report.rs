//! Read-only lineage reports for the operator surface.

use serde::Serialize;
use std::fmt;

use crate::lineage::{Lineage, LineageStatus};
use crate::types::{EventKind, LineageId, MaturityState};
use crate::validator::ConsistencyValidator;

/// Snapshot of one track inside a [`LineageReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackReport {
    pub state: MaturityState,
    pub progress_percentage: u8,
    /// Fraction of criteria the latest validation passed
    pub fitness: Option<f64>,
    pub content_digest: Option<String>,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageReport {
    pub lineage: LineageId,
    pub spec_key: String,
    pub status: LineageStatus,
    pub primary: TrackReport,
    pub sibling: TrackReport,
    /// Criteria the tracks disagree on, from the stored validations
    pub mismatches: Vec<String>,
    pub intent_fingerprint: Option<String>,
    /// Last failure reason recorded on either track
    pub last_failure: Option<String>,
}

impl LineageReport {
    pub fn from_lineage(lineage: &Lineage) -> Self {
        let primary = lineage.primary();
        let sibling = lineage.sibling();

        let mismatches = match (&primary.validation, &sibling.validation) {
            (Some(a), Some(b)) => ConsistencyValidator::cross_validate(a, b, &lineage.spec).mismatches,
            _ => Vec::new(),
        };

        let last_failure = lineage
            .tracks()
            .flat_map(|track| track.events.iter())
            .filter(|event| {
                matches!(
                    event.kind,
                    EventKind::GenerationFailed
                        | EventKind::ExtractionFailed
                        | EventKind::DivergenceDetected
                )
            })
            .max_by_key(|event| event.timestamp)
            .map(|event| event.detail.clone());

        let track = |t: &crate::lineage::Track| TrackReport {
            state: t.state,
            progress_percentage: t.progress_percentage(),
            fitness: t.validation.as_ref().map(|v| v.pass_ratio()),
            content_digest: t.content.as_ref().map(|c| c.digest()),
            events: t.events.len(),
        };

        Self {
            lineage: lineage.id,
            spec_key: lineage.spec.key(),
            status: lineage.status(),
            primary: track(primary),
            sibling: track(sibling),
            mismatches,
            intent_fingerprint: primary.intent.as_ref().map(|i| i.fingerprint.clone()),
            last_failure,
        }
    }
}

impl fmt::Display for LineageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} [{}] {}", self.lineage, self.spec_key, self.status)?;
        writeln!(
            f,
            "  rapid-iteration:      {} ({}%)",
            self.primary.state, self.primary.progress_percentage
        )?;
        write!(
            f,
            "  performance-oriented: {} ({}%)",
            self.sibling.state, self.sibling.progress_percentage
        )?;
        if !self.mismatches.is_empty() {
            write!(f, "\n  mismatches: {}", self.mismatches.join(", "))?;
        }
        if let Some(reason) = &self.last_failure {
            write!(f, "\n  last failure: {reason}")?;
        }
        Ok(())
    }
}
