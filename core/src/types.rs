//! Core vocabulary: track roles, maturity states and event log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a lineage (one pair of tracks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineageId(Uuid);

impl LineageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the hyphenated form used in the store
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LineageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fixed role tag distinguishing the two tracks of a lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackRole {
    /// Generated and validated first; its intent drives the sibling.
    RapidIteration,
    /// Generated from the rapid track's extracted intent.
    PerformanceOriented,
}

impl TrackRole {
    pub fn all() -> [Self; 2] {
        [Self::RapidIteration, Self::PerformanceOriented]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RapidIteration => "rapid-iteration",
            Self::PerformanceOriented => "performance-oriented",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rapid-iteration" => Some(Self::RapidIteration),
            "performance-oriented" => Some(Self::PerformanceOriented),
            _ => None,
        }
    }

    pub fn sibling(self) -> Self {
        match self {
            Self::RapidIteration => Self::PerformanceOriented,
            Self::PerformanceOriented => Self::RapidIteration,
        }
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one track: its owning lineage plus its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackKey {
    pub lineage: LineageId,
    pub role: TrackRole,
}

impl TrackKey {
    pub fn new(lineage: LineageId, role: TrackRole) -> Self {
        Self { lineage, role }
    }

    pub fn sibling(&self) -> Self {
        Self::new(self.lineage, self.role.sibling())
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lineage, self.role)
    }
}

/// Maturity of a single track.
///
/// The forward order is `Specified → InDevelopment → SelfValidated →
/// IntentExtracted → SiblingRequested → SiblingProduced → CrossValidated →
/// Stable`. Each role only walks its own part of that path; see
/// [`MaturityState::successors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaturityState {
    Specified,
    InDevelopment,
    SelfValidated,
    IntentExtracted,
    SiblingRequested,
    SiblingProduced,
    CrossValidated,
    Stable,
    /// Retry budget exhausted or permanent failure; needs manual action.
    Stalled,
    /// Tracks disagree on at least one criterion; needs manual reconciliation.
    Diverged,
}

impl MaturityState {
    pub fn all() -> [Self; 10] {
        [
            Self::Specified,
            Self::InDevelopment,
            Self::SelfValidated,
            Self::IntentExtracted,
            Self::SiblingRequested,
            Self::SiblingProduced,
            Self::CrossValidated,
            Self::Stable,
            Self::Stalled,
            Self::Diverged,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Specified => "specified",
            Self::InDevelopment => "in_development",
            Self::SelfValidated => "self_validated",
            Self::IntentExtracted => "intent_extracted",
            Self::SiblingRequested => "sibling_requested",
            Self::SiblingProduced => "sibling_produced",
            Self::CrossValidated => "cross_validated",
            Self::Stable => "stable",
            Self::Stalled => "stalled",
            Self::Diverged => "diverged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all().into_iter().find(|state| state.as_str() == value)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stable | Self::Stalled | Self::Diverged)
    }

    /// Rough completion figure for dashboards
    pub fn progress_percentage(self) -> u8 {
        match self {
            Self::Specified => 0,
            Self::InDevelopment => 15,
            Self::SelfValidated => 30,
            Self::IntentExtracted => 45,
            Self::SiblingRequested => 55,
            Self::SiblingProduced => 70,
            Self::CrossValidated => 90,
            Self::Stable => 100,
            Self::Stalled | Self::Diverged => 0,
        }
    }

    /// Closed transition table, per role.
    pub fn successors(self, role: TrackRole) -> &'static [MaturityState] {
        use MaturityState::*;
        match (role, self) {
            (TrackRole::RapidIteration, Specified) => &[InDevelopment],
            (TrackRole::RapidIteration, InDevelopment) => &[SelfValidated, Stalled],
            (TrackRole::RapidIteration, SelfValidated) => &[IntentExtracted],
            (TrackRole::RapidIteration, IntentExtracted) => &[CrossValidated, Diverged],
            (TrackRole::PerformanceOriented, Specified) => &[SiblingRequested],
            (TrackRole::PerformanceOriented, SiblingRequested) => &[SiblingProduced, Stalled],
            (TrackRole::PerformanceOriented, SiblingProduced) => {
                &[CrossValidated, Diverged, Stalled]
            }
            (_, CrossValidated) => &[Stable],
            _ => &[],
        }
    }

    pub fn can_transition(self, role: TrackRole, to: MaturityState) -> bool {
        self.successors(role).contains(&to)
    }
}

impl fmt::Display for MaturityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of an event-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Transition,
    GenerationRequested,
    GenerationSucceeded,
    GenerationFailed,
    RetryScheduled,
    ValidationRecorded,
    CriterionInconclusive,
    IntentRecorded,
    ExtractionFailed,
    DivergenceDetected,
    Retired,
}

impl EventKind {
    pub fn all() -> [Self; 12] {
        [
            Self::Created,
            Self::Transition,
            Self::GenerationRequested,
            Self::GenerationSucceeded,
            Self::GenerationFailed,
            Self::RetryScheduled,
            Self::ValidationRecorded,
            Self::CriterionInconclusive,
            Self::IntentRecorded,
            Self::ExtractionFailed,
            Self::DivergenceDetected,
            Self::Retired,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Transition => "transition",
            Self::GenerationRequested => "generation_requested",
            Self::GenerationSucceeded => "generation_succeeded",
            Self::GenerationFailed => "generation_failed",
            Self::RetryScheduled => "retry_scheduled",
            Self::ValidationRecorded => "validation_recorded",
            Self::CriterionInconclusive => "criterion_inconclusive",
            Self::IntentRecorded => "intent_recorded",
            Self::ExtractionFailed => "extraction_failed",
            Self::DivergenceDetected => "divergence_detected",
            Self::Retired => "retired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a track's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

impl TrackEvent {
    pub fn now(kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Outcome of evaluating one acceptance criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// Runner could not decide; aggregated as a failure.
    Inconclusive,
}

impl Verdict {
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names_round_trip() {
        for state in MaturityState::all() {
            assert_eq!(MaturityState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MaturityState::parse("hatched"), None);
    }

    #[test]
    fn test_rapid_track_cannot_request_a_sibling() {
        assert!(!MaturityState::Specified
            .can_transition(TrackRole::RapidIteration, MaturityState::SiblingRequested));
        assert!(MaturityState::Specified
            .can_transition(TrackRole::PerformanceOriented, MaturityState::SiblingRequested));
    }

    #[test]
    fn test_sibling_never_develops_on_its_own() {
        assert!(!MaturityState::Specified
            .can_transition(TrackRole::PerformanceOriented, MaturityState::InDevelopment));
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        for role in TrackRole::all() {
            for state in [MaturityState::Stable, MaturityState::Stalled, MaturityState::Diverged] {
                assert!(state.is_terminal());
                assert!(state.successors(role).is_empty(), "{state} for {role}");
            }
        }
    }

    #[test]
    fn test_every_reachable_edge_moves_forward_or_terminates() {
        let order = |s: MaturityState| {
            MaturityState::all()
                .iter()
                .position(|candidate| *candidate == s)
                .unwrap_or(usize::MAX)
        };
        for role in TrackRole::all() {
            for from in MaturityState::all() {
                for to in from.successors(role) {
                    assert!(
                        to.is_terminal() || order(*to) > order(from),
                        "{role}: {from} -> {to} goes backwards"
                    );
                }
            }
        }
    }

    #[test]
    fn test_roles_are_each_others_sibling() {
        assert_eq!(TrackRole::RapidIteration.sibling(), TrackRole::PerformanceOriented);
        assert_eq!(TrackRole::PerformanceOriented.sibling(), TrackRole::RapidIteration);
        assert_eq!(TrackRole::parse("performance-oriented"), Some(TrackRole::PerformanceOriented));
    }

    #[test]
    fn test_event_kinds_round_trip() {
        for kind in EventKind::all() {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_lineage_ids_parse_back() {
        let id = LineageId::new();
        assert_eq!(LineageId::parse(&id.to_string()), Some(id));
        assert_eq!(LineageId::parse("not-a-uuid"), None);
    }
}
