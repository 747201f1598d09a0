//! Dual-track evolution orchestrator
//!
//! Evolves a module as two independently implemented tracks that share one
//! immutable specification: a rapid-iteration track that is generated and
//! validated first, and a performance-oriented track generated from the
//! intent extracted out of the first. Both tracks must then agree on every
//! acceptance criterion before the lineage is considered stable.
//!
//! ```text
//! SpecificationRecord
//!     │
//!     ▼
//! EvolutionOrchestrator ── LineageStore (SQLite, single source of truth)
//!     │─── rapid-iteration track: generate → validate (retry/backoff)
//!     │─── IntentExtractor: content → implementation-agnostic intent
//!     │─── performance-oriented track: generate from intent
//!     │─── ConsistencyValidator: per-criterion cross validation
//!     ▼
//! Stable | Stalled | Diverged
//! ```
//!
//! Content-producing work is delegated to a [`GenerationGateway`]; criteria
//! are evaluated by a [`CriteriaRunner`]. Both have deterministic in-process
//! implementations ([`ScriptedGateway`], [`MarkerRunner`]) for tests.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod criteria;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod lineage;
pub mod orchestrator;
pub mod retry;
pub mod spec_record;
pub mod store;
pub mod types;
pub mod validator;

pub use config::{ConfigLoader, OrchestratorConfig};
pub use criteria::{CriteriaRunner, MarkerRunner, RunnerError};
pub use error::{Result, TwinTrackError};
pub use gateway::{
    GenerationError, GenerationErrorKind, GenerationGateway, GenerationRequest, Scripted,
    ScriptedGateway,
};
pub use intent::{IntentExtractor, IntentRepresentation, StructuralExtractor};
pub use lineage::{GeneratedContent, Lineage, LineageOverview, LineageStatus, Retirement, Track};
pub use orchestrator::{
    CrossValidationOutcome, EvolutionOrchestrator, LineageReport, Reconciliation, Step, TrackReport,
};
pub use retry::RetryPolicy;
pub use spec_record::{
    AcceptanceCriterion, ExternalRequirement, SpecificationBuilder, SpecificationRecord,
};
pub use store::{Commit, LineageStore, StoreSummary};
pub use types::{EventKind, LineageId, MaturityState, TrackEvent, TrackKey, TrackRole, Verdict};
pub use validator::{
    ConsistencyValidator, CriterionVerdict, CrossValidation, ValidationResult, ValidationStatus,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
