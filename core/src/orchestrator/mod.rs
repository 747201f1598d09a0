//! Evolution orchestrator
//!
//! Owns every transition of every track. Each operation re-reads the
//! lineage from the store, checks ordering, does its delegated work under
//! the retry policy and commits the outcome in one store transaction.
//!
//! At most one operation runs per track at a time. A second caller is
//! rejected with [`TwinTrackError::TrackBusy`] rather than queued.

mod locks;
mod report;

pub use report::{LineageReport, TrackReport};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use twintrack_async_utils::{Interrupted, OrCancelExt, WithDeadlineExt};

use crate::config::OrchestratorConfig;
use crate::criteria::CriteriaRunner;
use crate::error::{Result, TwinTrackError};
use crate::gateway::{GenerationError, GenerationGateway, GenerationRequest};
use crate::intent::{IntentExtractor, IntentRepresentation, StructuralExtractor};
use crate::lineage::{GeneratedContent, Lineage, LineageStatus};
use crate::retry::classifier::{ErrorClass, RetryClassifiable, RetryableError};
use crate::retry::{RetryError, RetryStatus, execute_with_backoff_cancellable};
use crate::spec_record::SpecificationRecord;
use crate::store::{Commit, LineageStore};
use crate::types::{EventKind, LineageId, MaturityState, TrackKey, TrackRole, Verdict};
use crate::validator::{ConsistencyValidator, ValidationResult};
use locks::TrackLocks;

/// Upper bound on `advance` calls in one `drive`; a full lineage needs five.
const MAX_STEPS: usize = 16;

/// Result of comparing the two tracks of a lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrossValidationOutcome {
    /// Both tracks agree and pass every criterion
    Stable,
    Diverged { mismatches: Vec<String> },
    /// The sibling's criteria could not be evaluated within the retry budget
    Stalled { reason: String },
}

/// What one `advance` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Rapid-iteration track left development (`SelfValidated` or `Stalled`)
    PrimaryDeveloped(MaturityState),
    IntentExtracted,
    /// Sibling generation finished (`SiblingProduced` or `Stalled`)
    SiblingProduced(MaturityState),
    CrossValidated(CrossValidationOutcome),
    /// A cross-validated pair was promoted to `Stable`
    Finalized,
    /// Nothing left the orchestrator can do on its own
    Settled(LineageStatus),
}

/// Manual resolution of a stalled or diverged lineage.
#[derive(Debug, Clone)]
pub enum Reconciliation {
    /// Take the lineage out of service; its history is kept
    Retire { reason: String },
    /// Retire and start over from a later generation of the same record
    Respecify { spec: SpecificationRecord },
}

pub struct EvolutionOrchestrator {
    store: Arc<LineageStore>,
    gateway: Arc<dyn GenerationGateway>,
    extractor: Arc<dyn IntentExtractor>,
    validator: ConsistencyValidator,
    config: OrchestratorConfig,
    locks: TrackLocks,
    lineage_slots: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl EvolutionOrchestrator {
    pub fn new(
        store: Arc<LineageStore>,
        gateway: Arc<dyn GenerationGateway>,
        runner: Arc<dyn CriteriaRunner>,
    ) -> Self {
        Self::with_config(store, gateway, runner, OrchestratorConfig::default())
    }

    pub fn with_config(
        store: Arc<LineageStore>,
        gateway: Arc<dyn GenerationGateway>,
        runner: Arc<dyn CriteriaRunner>,
        config: OrchestratorConfig,
    ) -> Self {
        let slots = config.concurrency.max_concurrent_lineages.max(1);
        Self {
            store,
            gateway,
            extractor: Arc::new(StructuralExtractor::new()),
            validator: ConsistencyValidator::new(runner, config.validation_timeout()),
            config,
            locks: TrackLocks::new(),
            lineage_slots: Arc::new(Semaphore::new(slots)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Open the store named by `config` and build an orchestrator on it.
    pub fn open(
        config: OrchestratorConfig,
        gateway: Arc<dyn GenerationGateway>,
        runner: Arc<dyn CriteriaRunner>,
    ) -> Result<Self> {
        let store = LineageStore::open(&config.resolved_store_path())?;
        Ok(Self::with_config(Arc::new(store), gateway, runner, config))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn store(&self) -> &LineageStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle operations
    // ─────────────────────────────────────────────────────────────────────────

    pub fn start_lineage(&self, spec: &SpecificationRecord) -> Result<Lineage> {
        let lineage = self.store.create_lineage(spec)?;
        info!(
            lineage = %lineage.id,
            spec = %spec.key(),
            criteria = spec.acceptance_criteria().len(),
            "Lineage started"
        );
        Ok(lineage)
    }

    /// Generate and self-validate the rapid-iteration track.
    ///
    /// Returns the resulting state: `SelfValidated` once every criterion
    /// passes, `Stalled` when the retry budget runs out or the backend
    /// refuses permanently. A track left `InDevelopment` by an earlier
    /// interrupted call is resumed.
    pub async fn develop_primary(&self, id: LineageId) -> Result<MaturityState> {
        let key = TrackKey::new(id, TrackRole::RapidIteration);
        let _guard = self.locks.try_acquire(key)?;
        let lineage = self.live_lineage(id)?;

        match lineage.primary().state {
            MaturityState::Specified => {
                self.store.commit(
                    key,
                    Commit::to(MaturityState::InDevelopment, "development started"),
                )?;
                info!(lineage = %id, role = %key.role, "Development started");
            }
            MaturityState::InDevelopment => {
                debug!(lineage = %id, "Resuming development");
            }
            other => {
                return Err(TwinTrackError::IllegalTransition {
                    track: key,
                    from: other,
                    to: MaturityState::InDevelopment,
                });
            }
        }

        let spec = &lineage.spec;
        let result = execute_with_backoff_cancellable(
            move |attempt| self.develop_attempt(spec, key, attempt),
            &self.config.retry,
            &self.shutdown,
            move |status| self.record_retry(key, &status),
        )
        .await;

        match settle(result)? {
            AttemptOutcome::Succeeded((content, validation)) => {
                let detail = format!(
                    "all {} criteria passed",
                    validation.verdicts.len()
                );
                self.store.commit(
                    key,
                    Commit::to(MaturityState::SelfValidated, detail)
                        .with_content(content)
                        .with_validation(validation)
                        .with_event(EventKind::ValidationRecorded, "pass"),
                )?;
                info!(lineage = %id, role = %key.role, "Track self-validated");
                Ok(MaturityState::SelfValidated)
            }
            AttemptOutcome::GaveUp { reason } => {
                self.stall(key, &reason)?;
                Ok(MaturityState::Stalled)
            }
        }
    }

    /// Derive the implementation-agnostic intent of the rapid-iteration
    /// track from its committed, passing content.
    ///
    /// An extraction failure is recorded as an event and returned; the
    /// track stays `SelfValidated`.
    pub fn extract_intent(&self, id: LineageId) -> Result<IntentRepresentation> {
        let key = TrackKey::new(id, TrackRole::RapidIteration);
        let _guard = self.locks.try_acquire(key)?;
        let lineage = self.live_lineage(id)?;
        let track = lineage.primary();

        match track.state {
            MaturityState::SelfValidated => {}
            MaturityState::Specified | MaturityState::InDevelopment => {
                return Err(TwinTrackError::not_ready(
                    key,
                    "no committed passing validation yet",
                ));
            }
            other => {
                return Err(TwinTrackError::IllegalTransition {
                    track: key,
                    from: other,
                    to: MaturityState::IntentExtracted,
                });
            }
        }

        let (Some(content), Some(validation)) = (&track.content, &track.validation) else {
            return Err(TwinTrackError::not_ready(key, "no committed content"));
        };
        if !validation.is_pass() || validation.content_digest != content.digest() {
            return Err(TwinTrackError::not_ready(
                key,
                "latest validation does not pass the committed content",
            ));
        }

        match self.extractor.extract(key, &lineage.spec, content) {
            Ok(intent) => {
                self.store.commit(
                    key,
                    Commit::to(
                        MaturityState::IntentExtracted,
                        format!("{} behaviors", intent.behaviors.len()),
                    )
                    .with_intent(intent.clone())
                    .with_event(EventKind::IntentRecorded, intent.fingerprint.clone()),
                )?;
                info!(
                    lineage = %id,
                    extractor = self.extractor.name(),
                    fingerprint = %intent.fingerprint,
                    "Intent extracted"
                );
                Ok(intent)
            }
            Err(err) => {
                self.store
                    .append_event(key, EventKind::ExtractionFailed, err.to_string())?;
                warn!(lineage = %id, error = %err, "Intent extraction failed");
                Err(err)
            }
        }
    }

    /// Generate the performance-oriented track from the extracted intent.
    ///
    /// Transient backend failures are retried; a permanent failure stalls
    /// the sibling at once. The rapid-iteration track is not touched.
    pub async fn produce_sibling(&self, id: LineageId) -> Result<MaturityState> {
        let key = TrackKey::new(id, TrackRole::PerformanceOriented);
        let _guard = self.locks.try_acquire(key)?;
        let lineage = self.live_lineage(id)?;

        let sibling_state = lineage.sibling().state;
        if !matches!(
            sibling_state,
            MaturityState::Specified | MaturityState::SiblingRequested
        ) {
            return Err(TwinTrackError::IllegalTransition {
                track: key,
                from: sibling_state,
                to: MaturityState::SiblingRequested,
            });
        }

        let primary = lineage.primary();
        let intent = match (&primary.intent, primary.state) {
            (Some(intent), MaturityState::IntentExtracted) => intent,
            (_, state) => {
                return Err(TwinTrackError::not_ready(
                    key,
                    format!("rapid-iteration track is {state}, intent not extracted"),
                ));
            }
        };

        if sibling_state == MaturityState::Specified {
            self.store.commit(
                key,
                Commit::to(
                    MaturityState::SiblingRequested,
                    format!("intent {}", intent.fingerprint),
                ),
            )?;
            info!(lineage = %id, role = %key.role, "Sibling requested");
        } else {
            debug!(lineage = %id, "Resuming sibling generation");
        }

        let spec = &lineage.spec;
        let result = execute_with_backoff_cancellable(
            move |attempt| self.generate(spec, Some(intent), key, attempt),
            &self.config.retry,
            &self.shutdown,
            move |status| self.record_retry(key, &status),
        )
        .await;

        match settle(result)? {
            AttemptOutcome::Succeeded(content) => {
                let detail = format!("{} content from {}", content.flavor, content.backend);
                self.store.commit(
                    key,
                    Commit::to(MaturityState::SiblingProduced, detail).with_content(content),
                )?;
                info!(lineage = %id, role = %key.role, "Sibling produced");
                Ok(MaturityState::SiblingProduced)
            }
            AttemptOutcome::GaveUp { reason } => {
                self.stall(key, &reason)?;
                Ok(MaturityState::Stalled)
            }
        }
    }

    /// Validate the sibling and compare it with the rapid-iteration track's
    /// committed result, criterion by criterion.
    ///
    /// Agreement moves both tracks through `CrossValidated` to `Stable`; any
    /// mismatch moves both to `Diverged`. Divergence is never resolved here.
    pub async fn cross_validate(&self, id: LineageId) -> Result<CrossValidationOutcome> {
        let primary_key = TrackKey::new(id, TrackRole::RapidIteration);
        let sibling_key = primary_key.sibling();
        let _guards = self.locks.try_acquire_pair(primary_key, sibling_key)?;
        let lineage = self.live_lineage(id)?;
        let (primary, sibling) = (lineage.primary(), lineage.sibling());

        match sibling.state {
            MaturityState::SiblingProduced => {}
            MaturityState::Specified | MaturityState::SiblingRequested => {
                return Err(TwinTrackError::not_ready(
                    sibling_key,
                    "sibling content not produced yet",
                ));
            }
            other => {
                return Err(TwinTrackError::IllegalTransition {
                    track: sibling_key,
                    from: other,
                    to: MaturityState::CrossValidated,
                });
            }
        }
        if primary.state != MaturityState::IntentExtracted {
            return Err(TwinTrackError::IllegalTransition {
                track: primary_key,
                from: primary.state,
                to: MaturityState::CrossValidated,
            });
        }
        let Some(content) = sibling.content.as_ref() else {
            return Err(TwinTrackError::not_ready(sibling_key, "no committed content"));
        };
        let Some(primary_validation) = primary.validation.as_ref().filter(|v| v.is_pass()) else {
            return Err(TwinTrackError::not_ready(
                primary_key,
                "no committed passing validation",
            ));
        };

        let spec = &lineage.spec;
        let result = execute_with_backoff_cancellable(
            move |_attempt| async move {
                self.validator
                    .validate(spec, content, &self.shutdown)
                    .await
                    .map_err(AttemptError::from)
            },
            &self.config.retry,
            &self.shutdown,
            move |status| self.record_retry(sibling_key, &status),
        )
        .await;

        let sibling_validation = match settle(result)? {
            AttemptOutcome::Succeeded(validation) => validation,
            AttemptOutcome::GaveUp { reason } => {
                self.stall(sibling_key, &reason)?;
                return Ok(CrossValidationOutcome::Stalled { reason });
            }
        };
        self.note_inconclusive(sibling_key, &sibling_validation)?;

        let cross = ConsistencyValidator::cross_validate(primary_validation, &sibling_validation, spec);
        if !cross.agree {
            let detail = TwinTrackError::DivergenceDetected {
                mismatches: cross.mismatches.clone(),
            }
            .to_string();
            self.store.commit_all(vec![
                (
                    primary_key,
                    Commit::to(MaturityState::Diverged, "cross-validation mismatch")
                        .with_event(EventKind::DivergenceDetected, detail.clone()),
                ),
                (
                    sibling_key,
                    Commit::to(MaturityState::Diverged, "cross-validation mismatch")
                        .with_validation(sibling_validation)
                        .with_event(EventKind::DivergenceDetected, detail),
                ),
            ])?;
            warn!(
                lineage = %id,
                mismatches = ?cross.mismatches,
                "Tracks diverged; manual reconciliation required"
            );
            return Ok(CrossValidationOutcome::Diverged {
                mismatches: cross.mismatches,
            });
        }

        self.store.commit_all(vec![
            (
                primary_key,
                Commit::to(MaturityState::CrossValidated, "tracks agree on every criterion"),
            ),
            (
                sibling_key,
                Commit::to(MaturityState::CrossValidated, "tracks agree on every criterion")
                    .with_validation(sibling_validation)
                    .with_event(EventKind::ValidationRecorded, "pass"),
            ),
        ])?;
        self.promote(id)?;
        Ok(CrossValidationOutcome::Stable)
    }

    /// Take exactly one step from the persisted state.
    pub async fn advance(&self, id: LineageId) -> Result<Step> {
        let lineage = self.store.get_lineage(id)?;
        if lineage.is_retired() {
            return Ok(Step::Settled(LineageStatus::Retired));
        }

        use MaturityState::*;
        let step = match (lineage.primary().state, lineage.sibling().state) {
            (Specified | InDevelopment, _) => Step::PrimaryDeveloped(self.develop_primary(id).await?),
            (SelfValidated, _) => {
                self.extract_intent(id)?;
                Step::IntentExtracted
            }
            (IntentExtracted, Specified | SiblingRequested) => {
                Step::SiblingProduced(self.produce_sibling(id).await?)
            }
            (IntentExtracted, SiblingProduced) => {
                Step::CrossValidated(self.cross_validate(id).await?)
            }
            (CrossValidated, CrossValidated) => {
                let primary_key = lineage.key(TrackRole::RapidIteration);
                let _guards = self
                    .locks
                    .try_acquire_pair(primary_key, primary_key.sibling())?;
                self.promote(id)?;
                Step::Finalized
            }
            _ => Step::Settled(lineage.status()),
        };
        Ok(step)
    }

    /// Advance until the lineage settles, then report on it.
    ///
    /// Stops early (with an error) on a contract violation or an extraction
    /// failure, both of which need outside action.
    pub async fn drive(&self, id: LineageId) -> Result<LineageReport> {
        let started = Instant::now();
        for _ in 0..MAX_STEPS {
            match self.advance(id).await? {
                Step::Settled(status) => {
                    info!(
                        lineage = %id,
                        %status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Lineage settled"
                    );
                    break;
                }
                step => debug!(lineage = %id, ?step, "Advanced"),
            }
        }
        self.report(id)
    }

    /// Start a lineage for `spec` and drive it to a settled state, waiting
    /// for a free lineage slot first.
    pub async fn evolve(&self, spec: SpecificationRecord) -> Result<LineageReport> {
        let _permit = match self.lineage_slots.acquire().or_cancel(&self.shutdown).await {
            Ok(Ok(permit)) => permit,
            _ => return Err(TwinTrackError::Cancelled),
        };
        let lineage = self.start_lineage(&spec)?;
        self.drive(lineage.id).await
    }

    /// Evolve several lineages concurrently. Results come back in input
    /// order; one lineage failing does not affect the others.
    pub async fn evolve_many<I>(self: &Arc<Self>, specs: I) -> Vec<Result<LineageReport>>
    where
        I: IntoIterator<Item = SpecificationRecord>,
    {
        let handles: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.evolve(spec).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(err) => Err(TwinTrackError::TaskFailed(err.to_string())),
            });
        }
        results
    }

    /// Resolve a stalled or diverged lineage. `Respecify` returns the new
    /// lineage; it still has to be driven.
    pub fn reconcile(&self, id: LineageId, action: Reconciliation) -> Result<Option<Lineage>> {
        let keys = [
            TrackKey::new(id, TrackRole::RapidIteration),
            TrackKey::new(id, TrackRole::PerformanceOriented),
        ];
        let guards = self.locks.try_acquire_pair(keys[0], keys[1])?;
        let lineage = self.store.get_lineage(id)?;

        let status = lineage.status();
        if !matches!(status, LineageStatus::Stalled | LineageStatus::Diverged) {
            return Err(TwinTrackError::not_ready(
                keys[0],
                format!("lineage is {status}; only stalled or diverged lineages are reconciled"),
            ));
        }

        let successor = match action {
            Reconciliation::Retire { reason } => {
                self.store.retire_lineage(id, &reason)?;
                info!(lineage = %id, %reason, "Lineage retired");
                None
            }
            Reconciliation::Respecify { spec } => {
                let current = &lineage.spec;
                if spec.namespace() != current.namespace() || spec.name() != current.name() {
                    return Err(TwinTrackError::InvalidSpecification(format!(
                        "{} does not continue {}",
                        spec.key(),
                        current.key()
                    )));
                }
                if spec.generation() <= current.generation() {
                    return Err(TwinTrackError::InvalidSpecification(format!(
                        "generation must advance past {}",
                        current.generation()
                    )));
                }
                spec.validate()?;

                self.store
                    .retire_lineage(id, &format!("respecified as {}", spec.key()))?;
                info!(lineage = %id, successor_spec = %spec.key(), "Lineage respecified");
                Some(self.start_lineage(&spec)?)
            }
        };

        drop(guards);
        self.locks.forget(&keys);
        Ok(successor)
    }

    pub fn report(&self, id: LineageId) -> Result<LineageReport> {
        let lineage = self.store.get_lineage(id)?;
        Ok(LineageReport::from_lineage(&lineage))
    }

    /// Cancel in-flight gateway and runner calls and refuse new lineages.
    /// Interrupted tracks keep the state they had before the call.
    pub fn shutdown(&self) {
        info!("Orchestrator shutting down");
        self.shutdown.cancel();
        self.lineage_slots.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn live_lineage(&self, id: LineageId) -> Result<Lineage> {
        let lineage = self.store.get_lineage(id)?;
        if lineage.is_retired() {
            return Err(TwinTrackError::not_ready(
                lineage.key(TrackRole::RapidIteration),
                "lineage is retired",
            ));
        }
        Ok(lineage)
    }

    async fn develop_attempt(
        &self,
        spec: &SpecificationRecord,
        key: TrackKey,
        attempt: u32,
    ) -> std::result::Result<(GeneratedContent, ValidationResult), AttemptError> {
        let content = self.generate(spec, None, key, attempt).await?;
        let validation = self.validator.validate(spec, &content, &self.shutdown).await?;
        self.note_inconclusive(key, &validation)?;

        if validation.is_pass() {
            return Ok((content, validation));
        }

        let failed: Vec<String> = validation
            .failed_criteria()
            .into_iter()
            .map(str::to_string)
            .collect();
        self.store.record_content(key, &content)?;
        self.store.record_validation(key, &validation)?;
        self.store.append_event(
            key,
            EventKind::ValidationRecorded,
            format!("attempt {attempt}: failed {}", failed.join(", ")),
        )?;
        Err(AttemptError::CriteriaUnmet {
            total: validation.verdicts.len(),
            failed,
        })
    }

    async fn generate(
        &self,
        spec: &SpecificationRecord,
        intent: Option<&IntentRepresentation>,
        key: TrackKey,
        attempt: u32,
    ) -> std::result::Result<GeneratedContent, AttemptError> {
        self.store.append_event(
            key,
            EventKind::GenerationRequested,
            format!("attempt {attempt} via {}", self.gateway.name()),
        )?;

        let request = GenerationRequest {
            spec,
            intent,
            role: key.role,
            attempt,
        };
        let started = Instant::now();
        let result = match self
            .gateway
            .generate(request)
            .with_deadline(self.config.generation_timeout(), &self.shutdown)
            .await
        {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(err)) => Err(AttemptError::Generation(err)),
            Err(Interrupted::TimedOut(after)) => Err(AttemptError::TimedOut(after)),
            Err(Interrupted::Cancelled) => {
                return Err(AttemptError::Orchestrator(TwinTrackError::Cancelled));
            }
        };

        match &result {
            Ok(content) => {
                debug!(
                    track = %key,
                    attempt,
                    bytes = content.body.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Generation succeeded"
                );
                self.store.append_event(
                    key,
                    EventKind::GenerationSucceeded,
                    format!("attempt {attempt}: {} bytes of {}", content.body.len(), content.flavor),
                )?;
            }
            Err(err) => {
                self.store.append_event(
                    key,
                    EventKind::GenerationFailed,
                    format!("attempt {attempt}: {err}"),
                )?;
            }
        }
        result
    }

    fn note_inconclusive(&self, key: TrackKey, validation: &ValidationResult) -> Result<()> {
        for verdict in validation
            .verdicts
            .iter()
            .filter(|v| v.verdict == Verdict::Inconclusive)
        {
            self.store.append_event(
                key,
                EventKind::CriterionInconclusive,
                format!("{} via {}", verdict.criterion, self.validator.runner_name()),
            )?;
        }
        Ok(())
    }

    fn record_retry(&self, key: TrackKey, status: &RetryStatus) {
        warn!(
            track = %key,
            attempt = status.attempt,
            sleep_ms = status.sleep.as_millis() as u64,
            elapsed_ms = status.elapsed.as_millis() as u64,
            reason = %status.reason,
            "Attempt failed, retrying"
        );
        let detail = format!(
            "attempt {} failed: {}; retrying in {}ms",
            status.attempt,
            status.reason,
            status.sleep.as_millis()
        );
        if let Err(err) = self.store.append_event(key, EventKind::RetryScheduled, detail) {
            warn!(track = %key, error = %err, "Failed to record retry");
        }
    }

    fn stall(&self, key: TrackKey, reason: &str) -> Result<()> {
        self.store
            .commit(key, Commit::to(MaturityState::Stalled, reason))?;
        error!(track = %key, %reason, "Track stalled; manual action required");
        Ok(())
    }

    fn promote(&self, id: LineageId) -> Result<()> {
        let primary_key = TrackKey::new(id, TrackRole::RapidIteration);
        let detail = "both tracks pass every criterion";
        self.store.commit_all(vec![
            (primary_key, Commit::to(MaturityState::Stable, detail)),
            (primary_key.sibling(), Commit::to(MaturityState::Stable, detail)),
        ])?;
        info!(lineage = %id, "Lineage stable");
        Ok(())
    }
}

/// Failure of a single retried attempt.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error(transparent)]
    Generation(GenerationError),

    #[error("generation timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("{} of {total} criteria failed: {}", .failed.len(), .failed.join(", "))]
    CriteriaUnmet { failed: Vec<String>, total: usize },

    /// The criteria runner could not evaluate
    #[error(transparent)]
    Evaluation(TwinTrackError),

    /// Not the track's fault: cancellation or a store failure
    #[error(transparent)]
    Orchestrator(TwinTrackError),
}

impl From<TwinTrackError> for AttemptError {
    fn from(err: TwinTrackError) -> Self {
        match err {
            TwinTrackError::Validation { .. } => Self::Evaluation(err),
            other => Self::Orchestrator(other),
        }
    }
}

impl RetryClassifiable for AttemptError {
    fn classify(&self) -> ErrorClass {
        match self {
            Self::Generation(err) => err.classify(),
            Self::TimedOut(after) => ErrorClass::Retryable(RetryableError::Timeout(*after)),
            Self::CriteriaUnmet { failed, total } => {
                ErrorClass::Retryable(RetryableError::CriteriaUnmet {
                    failed: failed.len(),
                    total: *total,
                })
            }
            Self::Evaluation(err) | Self::Orchestrator(err) => err.classify(),
        }
    }

    fn suggested_backoff(&self) -> Option<Duration> {
        match self {
            Self::Generation(err) => err.suggested_backoff(),
            Self::Evaluation(err) | Self::Orchestrator(err) => err.suggested_backoff(),
            Self::TimedOut(_) | Self::CriteriaUnmet { .. } => None,
        }
    }
}

enum AttemptOutcome<T> {
    Succeeded(T),
    /// Budget exhausted or permanent failure; the track stalls
    GaveUp { reason: String },
}

/// Sort a retry result into "the track settles" and "the call itself
/// failed". Cancellation and store failures are the latter.
fn settle<T>(result: std::result::Result<T, RetryError<AttemptError>>) -> Result<AttemptOutcome<T>> {
    let err = match result {
        Ok(value) => return Ok(AttemptOutcome::Succeeded(value)),
        Err(err) => err,
    };

    let attempts = err.attempts();
    let exhausted = matches!(err, RetryError::Exhausted { .. });
    match err.into_last_error() {
        None => Err(TwinTrackError::Cancelled),
        Some(AttemptError::Orchestrator(err)) => Err(err),
        Some(last) if exhausted => Ok(AttemptOutcome::GaveUp {
            reason: format!("retry budget exhausted after {attempts} attempts: {last}"),
        }),
        Some(last) => Ok(AttemptOutcome::GaveUp {
            reason: format!("permanent failure on attempt {attempts}: {last}"),
        }),
    }
}
