//! Generation Gateway: the boundary to whatever actually writes code.
//!
//! The orchestrator never produces content itself. It hands a
//! [`GenerationRequest`] to a [`GenerationGateway`] and decides the next
//! track state from the outcome: a [`GenerationErrorKind::Transient`] error
//! is retried with backoff, a [`GenerationErrorKind::Permanent`] one stalls
//! the track immediately.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::intent::IntentRepresentation;
use crate::lineage::GeneratedContent;
use crate::retry::classifier::{ErrorClass, PermanentError, RetryClassifiable, RetryableError};
use crate::spec_record::SpecificationRecord;
use crate::types::TrackRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// Worth retrying (overload, network, timeouts on the backend side)
    Transient,
    /// Retrying cannot help (refusal, unsupported request)
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} generation error: {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == GenerationErrorKind::Transient
    }
}

impl RetryClassifiable for GenerationError {
    fn classify(&self) -> ErrorClass {
        match self.kind {
            GenerationErrorKind::Transient => ErrorClass::Retryable(RetryableError::BackendUnavailable),
            GenerationErrorKind::Permanent => {
                ErrorClass::Permanent(PermanentError::Rejected(self.message.clone()))
            }
        }
    }

    fn suggested_backoff(&self) -> Option<Duration> {
        None
    }
}

/// Everything a backend gets to see for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub spec: &'a SpecificationRecord,
    /// Present only for the performance-oriented track
    pub intent: Option<&'a IntentRepresentation>,
    pub role: TrackRole,
    /// 1-indexed attempt within the current retry loop
    pub attempt: u32,
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<GeneratedContent, GenerationError>;

    /// Backend name recorded on events
    fn name(&self) -> &str;
}

/// One scripted response of a [`ScriptedGateway`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Content(String),
    Transient(String),
    Permanent(String),
    /// Respond with content after sleeping; used to exercise timeouts and
    /// per-track serialization.
    Delayed(Duration, String),
}

/// Deterministic in-process gateway that replays queued responses per role.
///
/// An exhausted queue answers with a permanent error so a misconfigured
/// scenario stalls instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    scripts: Mutex<HashMap<TrackRole, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<TrackRole, u32>>,
    intents_seen: Mutex<Vec<(TrackRole, String)>>,
    flavors: HashMap<TrackRole, String>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        let mut flavors = HashMap::new();
        flavors.insert(TrackRole::RapidIteration, "python".to_string());
        flavors.insert(TrackRole::PerformanceOriented, "rust".to_string());
        Self {
            flavors,
            ..Self::default()
        }
    }

    pub fn with_flavor(mut self, role: TrackRole, flavor: impl Into<String>) -> Self {
        self.flavors.insert(role, flavor.into());
        self
    }

    /// Queue responses for `role`, consumed in order.
    pub fn script<I>(self, role: TrackRole, responses: I) -> Self
    where
        I: IntoIterator<Item = Scripted>,
    {
        self.push(role, responses);
        self
    }

    pub fn push<I>(&self, role: TrackRole, responses: I)
    where
        I: IntoIterator<Item = Scripted>,
    {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        scripts.entry(role).or_default().extend(responses);
    }

    /// Number of `generate` calls received for `role`.
    pub fn calls(&self, role: TrackRole) -> u32 {
        let calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.get(&role).copied().unwrap_or(0)
    }

    /// Fingerprints of the intents passed along with each request for `role`.
    pub fn intents_seen(&self, role: TrackRole) -> Vec<String> {
        let seen = self
            .intents_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        seen.iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, fingerprint)| fingerprint.clone())
            .collect()
    }

    fn next_response(&self, role: TrackRole) -> Option<Scripted> {
        {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            *calls.entry(role).or_insert(0) += 1;
        }
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        scripts.get_mut(&role).and_then(VecDeque::pop_front)
    }

    fn content(&self, role: TrackRole, body: String) -> GeneratedContent {
        let flavor = self
            .flavors
            .get(&role)
            .map(String::as_str)
            .unwrap_or("text");
        GeneratedContent::new(body, flavor, self.name())
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
    ) -> Result<GeneratedContent, GenerationError> {
        if let Some(intent) = request.intent {
            let mut seen = self
                .intents_seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            seen.push((request.role, intent.fingerprint.clone()));
        }

        match self.next_response(request.role) {
            Some(Scripted::Content(body)) => Ok(self.content(request.role, body)),
            Some(Scripted::Delayed(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(self.content(request.role, body))
            }
            Some(Scripted::Transient(message)) => Err(GenerationError::transient(message)),
            Some(Scripted::Permanent(message)) => Err(GenerationError::permanent(message)),
            None => Err(GenerationError::permanent(format!(
                "no scripted response left for {}",
                request.role
            ))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec() -> SpecificationRecord {
        SpecificationRecord::builder("echo", "repeat input")
            .criterion("C1", "echoes")
            .build()
            .expect("spec")
    }

    fn request(spec: &SpecificationRecord, role: TrackRole) -> GenerationRequest<'_> {
        GenerationRequest {
            spec,
            intent: None,
            role,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_replays_responses_in_order_per_role() {
        let spec = spec();
        let gateway = ScriptedGateway::new()
            .script(
                TrackRole::RapidIteration,
                [
                    Scripted::Transient("overloaded".to_string()),
                    Scripted::Content("def echo(x): return x".to_string()),
                ],
            )
            .script(
                TrackRole::PerformanceOriented,
                [Scripted::Content("fn echo() {}".to_string())],
            );

        let first = gateway
            .generate(request(&spec, TrackRole::RapidIteration))
            .await;
        assert_eq!(
            first.expect_err("scripted transient"),
            GenerationError::transient("overloaded")
        );

        let second = gateway
            .generate(request(&spec, TrackRole::RapidIteration))
            .await
            .expect("scripted content");
        assert_eq!(second.body, "def echo(x): return x");
        assert_eq!(second.flavor, "python");
        assert_eq!(second.backend, "scripted");

        let sibling = gateway
            .generate(request(&spec, TrackRole::PerformanceOriented))
            .await
            .expect("scripted content");
        assert_eq!(sibling.flavor, "rust");

        assert_eq!(gateway.calls(TrackRole::RapidIteration), 2);
        assert_eq!(gateway.calls(TrackRole::PerformanceOriented), 1);
    }

    #[tokio::test]
    async fn test_empty_script_is_a_permanent_error() {
        let spec = spec();
        let gateway = ScriptedGateway::new();

        let err = gateway
            .generate(request(&spec, TrackRole::PerformanceOriented))
            .await
            .expect_err("nothing scripted");

        assert!(!err.is_transient());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_classify_as_retryable() {
        assert!(GenerationError::transient("503").is_retryable());
        assert!(!GenerationError::permanent("refused").is_retryable());
    }
}
