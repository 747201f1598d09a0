//! Per-track serialization, concurrent lineages and shutdown.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use twintrack_core::{
    EvolutionOrchestrator, LineageStatus, LineageStore, MarkerRunner, MaturityState,
    OrchestratorConfig, RetryPolicy, Scripted, ScriptedGateway, SpecificationRecord, TrackRole,
    TwinTrackError,
};

const RAPID: &str = "def run(job):\n    return job()\n# ✓ C1\n";
const PERF: &str = "fn run(job: impl Fn()) { job() }\n// ✓ C1\n";

fn spec(name: &str) -> SpecificationRecord {
    SpecificationRecord::builder(name, "Run a job")
        .criterion("C1", "runs the job")
        .build()
        .expect("spec")
}

fn orchestrator(gateway: &Arc<ScriptedGateway>, max_concurrent: usize) -> Arc<EvolutionOrchestrator> {
    let mut config = OrchestratorConfig::default();
    config.retry = RetryPolicy {
        max_attempts: 2,
        base_interval_ms: 1,
        max_interval_ms: 2,
        multiplier: 2.0,
        jitter_factor: 0.0,
    };
    config.concurrency.max_concurrent_lineages = max_concurrent;
    Arc::new(EvolutionOrchestrator::with_config(
        Arc::new(LineageStore::open_in_memory().expect("store")),
        Arc::<ScriptedGateway>::clone(gateway),
        Arc::new(MarkerRunner::new()),
        config,
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_operation_on_a_busy_track_is_rejected() {
    let gateway = Arc::new(ScriptedGateway::new().script(
        TrackRole::RapidIteration,
        [Scripted::Delayed(Duration::from_millis(300), RAPID.to_string())],
    ));
    let orch = orchestrator(&gateway, 4);
    let id = orch.start_lineage(&spec("runner")).expect("start").id;

    let first = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.develop_primary(id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let busy = orch.develop_primary(id).await.expect_err("track busy");
    assert!(
        matches!(
            busy,
            TwinTrackError::TrackBusy {
                role: TrackRole::RapidIteration,
                ..
            }
        ),
        "got: {busy}"
    );

    // The other track of the same lineage is not blocked by the lock.
    let sibling = orch.produce_sibling(id).await.expect_err("no intent yet");
    assert!(matches!(sibling, TwinTrackError::NotReady { .. }));

    let state = first.await.expect("join").expect("develop");
    assert_eq!(state, MaturityState::SelfValidated);
    assert_eq!(gateway.calls(TrackRole::RapidIteration), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn evolve_many_runs_lineages_independently() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script(
                TrackRole::RapidIteration,
                std::iter::repeat_with(|| Scripted::Content(RAPID.to_string())).take(3),
            )
            .script(
                TrackRole::PerformanceOriented,
                std::iter::repeat_with(|| Scripted::Content(PERF.to_string())).take(3),
            ),
    );
    let orch = orchestrator(&gateway, 2);

    let results = orch
        .evolve_many([spec("alpha"), spec("beta"), spec("gamma")])
        .await;

    assert_eq!(results.len(), 3);
    let keys: Vec<String> = results
        .into_iter()
        .map(|result| {
            let report = result.expect("evolve");
            assert_eq!(report.status, LineageStatus::Stable);
            report.spec_key
        })
        .collect();
    assert_eq!(
        keys,
        vec!["default/alpha@g1", "default/beta@g1", "default/gamma@g1"]
    );
    assert_eq!(orch.store().summary().expect("summary").stable, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn evolve_many_reports_duplicates_per_lineage() {
    let gateway = Arc::new(
        ScriptedGateway::new()
            .script(
                TrackRole::RapidIteration,
                std::iter::repeat_with(|| Scripted::Content(RAPID.to_string())).take(2),
            )
            .script(
                TrackRole::PerformanceOriented,
                std::iter::repeat_with(|| Scripted::Content(PERF.to_string())).take(2),
            ),
    );
    let orch = orchestrator(&gateway, 4);

    let results = orch
        .evolve_many([spec("alpha"), spec("beta"), spec("alpha")])
        .await;

    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(TwinTrackError::DuplicateLineage { .. })))
        .count();
    let stable = results
        .iter()
        .filter(|r| matches!(r, Ok(report) if report.status == LineageStatus::Stable))
        .count();
    assert_eq!(duplicates, 1);
    assert_eq!(stable, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_in_flight_generation() {
    let gateway = Arc::new(ScriptedGateway::new().script(
        TrackRole::RapidIteration,
        [Scripted::Delayed(Duration::from_secs(30), RAPID.to_string())],
    ));
    let orch = orchestrator(&gateway, 4);
    let id = orch.start_lineage(&spec("runner")).expect("start").id;

    let in_flight = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.develop_primary(id).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.shutdown();

    let err = tokio::time::timeout(Duration::from_secs(5), in_flight)
        .await
        .expect("cancelled promptly")
        .expect("join")
        .expect_err("cancelled");
    assert!(matches!(err, TwinTrackError::Cancelled), "got: {err}");
    assert!(orch.is_shutting_down());

    // The track keeps the state it had before the call.
    let lineage = orch.store().get_lineage(id).expect("lineage");
    assert_eq!(lineage.primary().state, MaturityState::InDevelopment);
    assert!(lineage.primary().content.is_none());

    let refused = orch.evolve(spec("later")).await.expect_err("shut down");
    assert!(matches!(refused, TwinTrackError::Cancelled));
}
