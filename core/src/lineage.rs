//! Lineage aggregate: one specification, two tracks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::intent::IntentRepresentation;
use crate::spec_record::{SpecificationRecord, sha256_hex};
use crate::types::{LineageId, MaturityState, TrackEvent, TrackKey, TrackRole};
use crate::validator::ValidationResult;

/// Artifact produced by one gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub body: String,
    /// Language or style label, e.g. `python` or `rust`
    pub flavor: String,
    /// Name of the backend that produced it
    pub backend: String,
    pub produced_at: DateTime<Utc>,
}

impl GeneratedContent {
    pub fn new(
        body: impl Into<String>,
        flavor: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            flavor: flavor.into(),
            backend: backend.into(),
            produced_at: Utc::now(),
        }
    }

    pub fn digest(&self) -> String {
        sha256_hex(self.body.as_bytes())
    }
}

/// One implementation attempt within a lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub role: TrackRole,
    pub state: MaturityState,
    pub events: Vec<TrackEvent>,
    /// Latest generated content
    pub content: Option<GeneratedContent>,
    /// Most recent extracted intent
    pub intent: Option<IntentRepresentation>,
    /// Last validation result
    pub validation: Option<ValidationResult>,
    pub updated_at: DateTime<Utc>,
}

impl Track {
    pub fn progress_percentage(&self) -> u8 {
        self.state.progress_percentage()
    }
}

/// Reconciliation marker left on a lineage taken out of service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retirement {
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub id: LineageId,
    pub spec: SpecificationRecord,
    pub created_at: DateTime<Utc>,
    pub retired: Option<Retirement>,
    /// Always `[rapid-iteration, performance-oriented]`
    pub(crate) tracks: [Track; 2],
}

impl Lineage {
    pub fn track(&self, role: TrackRole) -> &Track {
        match role {
            TrackRole::RapidIteration => &self.tracks[0],
            TrackRole::PerformanceOriented => &self.tracks[1],
        }
    }

    /// The rapid-iteration track
    pub fn primary(&self) -> &Track {
        self.track(TrackRole::RapidIteration)
    }

    /// The performance-oriented track
    pub fn sibling(&self) -> &Track {
        self.track(TrackRole::PerformanceOriented)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn key(&self, role: TrackRole) -> TrackKey {
        TrackKey::new(self.id, role)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.is_some()
    }

    pub fn status(&self) -> LineageStatus {
        LineageStatus::from_states(
            self.retired.is_some(),
            self.primary().state,
            self.sibling().state,
        )
    }

    /// Mean of both tracks' progress
    pub fn progress_percentage(&self) -> u8 {
        let total = u16::from(self.primary().progress_percentage())
            + u16::from(self.sibling().progress_percentage());
        (total / 2) as u8
    }
}

/// Lineage-level summary derived from both tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageStatus {
    InProgress,
    Stable,
    /// At least one track exhausted its retry budget or failed permanently
    Stalled,
    /// Tracks disagree on at least one criterion
    Diverged,
    Retired,
}

impl LineageStatus {
    pub fn from_states(retired: bool, primary: MaturityState, sibling: MaturityState) -> Self {
        if retired {
            return Self::Retired;
        }
        let states = [primary, sibling];
        if states.contains(&MaturityState::Diverged) {
            Self::Diverged
        } else if states.contains(&MaturityState::Stalled) {
            Self::Stalled
        } else if states.iter().all(|s| *s == MaturityState::Stable) {
            Self::Stable
        } else {
            Self::InProgress
        }
    }

    /// Whether the orchestrator can still make progress on its own.
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Stable => "stable",
            Self::Stalled => "stalled",
            Self::Diverged => "diverged",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for LineageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the operator listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageOverview {
    pub id: LineageId,
    pub spec_key: String,
    pub primary_state: MaturityState,
    pub sibling_state: MaturityState,
    pub status: LineageStatus,
    pub created_at: DateTime<Utc>,
}
