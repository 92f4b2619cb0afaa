//! Restart controller tests under paused Tokio time.

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use mcp_fleet::agent_runtime::{
    adapters::memory::{InMemoryExecutionBackend, InMemoryRuntimeRepository},
    domain::{
        Deployment, DeploymentKind, DeploymentStatus, LogicalServer, RestartPolicy, ServerConfig,
        ServerName, ServerStatus, SlidingWindowRateLimiter, TransportConfig,
    },
    ports::{FailureDisposition, FailureHandler, RuntimeRepository},
    services::{
        DeploymentOrchestrator, RestartAbort, RestartController, RestartLedger, RestartOutcome,
    },
};
use mockable::DefaultClock;
use rstest::rstest;
use tokio::time::Instant;

type Controller = RestartController<InMemoryRuntimeRepository, DefaultClock>;

struct Harness {
    repository: Arc<InMemoryRuntimeRepository>,
    backend: InMemoryExecutionBackend,
    ledger: Arc<RestartLedger>,
    controller: Controller,
    server: LogicalServer,
    deployment: Deployment,
}

async fn harness(policy: Option<RestartPolicy>, limiter: SlidingWindowRateLimiter) -> Harness {
    let repository = Arc::new(InMemoryRuntimeRepository::new());
    let backend = InMemoryExecutionBackend::new(DeploymentKind::LocalProcess);
    let clock = Arc::new(DefaultClock);
    let orchestrator = Arc::new(
        DeploymentOrchestrator::new(Arc::clone(&repository), Arc::clone(&clock))
            .with_backend(Arc::new(backend.clone())),
    );

    let mut config = ServerConfig::new(TransportConfig::stdio("mcp-tool").expect("valid transport"));
    if let Some(restart_policy) = policy {
        config = config.with_restart_policy(restart_policy);
    }
    let server = LogicalServer::new(
        ServerName::new("flaky").expect("valid name"),
        config,
        &DefaultClock,
    )
    .expect("valid server");
    repository.save_server(&server).await.expect("server saves");
    let deployment = orchestrator
        .start(server.id(), None)
        .await
        .expect("initial start succeeds");

    let ledger = Arc::new(RestartLedger::new(limiter));
    let controller = RestartController::new(orchestrator, Arc::clone(&ledger), clock);
    Harness {
        repository,
        backend,
        ledger,
        controller,
        server,
        deployment,
    }
}

fn generous_limiter() -> SlidingWindowRateLimiter {
    SlidingWindowRateLimiter::new(100, TimeDelta::seconds(60))
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn backoff_doubles_until_retries_are_exhausted() {
    let policy = RestartPolicy::enabled(3, 2, 60);
    let fixture = harness(Some(policy), generous_limiter()).await;
    fixture.backend.fail_next_starts(10).expect("arming succeeds");

    let started = Instant::now();
    let outcome = fixture
        .controller
        .restart(fixture.deployment.id(), &policy)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        RestartOutcome::GaveUp(RestartAbort::RetriesExhausted { attempts: 3 })
    );
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
    assert_eq!(fixture.backend.start_calls().expect("counter readable"), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn default_window_trips_on_third_failed_restart() {
    let policy = RestartPolicy::enabled(3, 2, 60);
    let fixture = harness(Some(policy), SlidingWindowRateLimiter::default()).await;
    fixture.backend.fail_next_starts(10).expect("arming succeeds");

    let started = Instant::now();
    let outcome = fixture
        .controller
        .restart(fixture.deployment.id(), &policy)
        .await;

    assert_eq!(
        outcome,
        RestartOutcome::GaveUp(RestartAbort::RateLimited { max: 3 })
    );
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert_eq!(fixture.backend.start_calls().expect("counter readable"), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn rate_limit_caps_restarts_despite_retry_budget() {
    let policy = RestartPolicy::enabled(10, 1, 60);
    let fixture = harness(Some(policy), SlidingWindowRateLimiter::default()).await;
    fixture.backend.fail_next_starts(10).expect("arming succeeds");

    let started = Instant::now();
    let outcome = fixture
        .controller
        .restart(fixture.deployment.id(), &policy)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        RestartOutcome::GaveUp(RestartAbort::RateLimited { max: 3 })
    );
    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
    assert_eq!(fixture.backend.start_calls().expect("counter readable"), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn success_after_failure_resets_ledger() {
    let policy = RestartPolicy::enabled(3, 2, 60);
    let fixture = harness(Some(policy), generous_limiter()).await;
    fixture.backend.fail_next_starts(1).expect("arming succeeds");
    fixture.ledger.record_unhealthy(fixture.deployment.id());

    let started = Instant::now();
    let outcome = fixture
        .controller
        .restart(fixture.deployment.id(), &policy)
        .await;

    assert_eq!(outcome, RestartOutcome::Restarted { attempts: 2 });
    assert!(started.elapsed() >= Duration::from_secs(3));
    let state = fixture
        .ledger
        .snapshot(fixture.deployment.id())
        .expect("state tracked");
    assert_eq!(state.retry_count(), 0);
    assert_eq!(state.consecutive_failures(), 0);
    assert!(state.restart_timestamps().is_empty());

    let redeployed = fixture
        .repository
        .find_deployment(fixture.deployment.id())
        .await
        .expect("lookup succeeds")
        .expect("row kept");
    assert_eq!(redeployed.status(), DeploymentStatus::Running);
    assert_eq!(redeployed.port(), fixture.deployment.port());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn disabled_policy_marks_deployment_error() {
    let fixture = harness(None, SlidingWindowRateLimiter::default()).await;

    let disposition = fixture
        .controller
        .handle_unhealthy(&fixture.deployment, &fixture.server)
        .await;

    assert_eq!(disposition, FailureDisposition::StopMonitoring);
    let stored = fixture
        .repository
        .find_deployment(fixture.deployment.id())
        .await
        .expect("lookup succeeds")
        .expect("row kept");
    assert_eq!(stored.status(), DeploymentStatus::Error);
    let server = fixture
        .repository
        .find_server(fixture.server.id())
        .await
        .expect("lookup succeeds")
        .expect("server kept");
    assert_eq!(server.status(), ServerStatus::Error);
    assert_eq!(fixture.backend.start_calls().expect("counter readable"), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn giving_up_marks_deployment_failed() {
    let policy = RestartPolicy::enabled(2, 2, 60);
    let fixture = harness(Some(policy), generous_limiter()).await;
    fixture.backend.fail_next_starts(10).expect("arming succeeds");

    let disposition = fixture
        .controller
        .handle_unhealthy(&fixture.deployment, &fixture.server)
        .await;

    assert_eq!(disposition, FailureDisposition::StopMonitoring);
    let stored = fixture
        .repository
        .find_deployment(fixture.deployment.id())
        .await
        .expect("lookup succeeds")
        .expect("row kept");
    assert_eq!(stored.status(), DeploymentStatus::Failed);
    assert!(
        stored
            .last_error()
            .is_some_and(|reason| reason.contains("retries exhausted"))
    );
    assert!(fixture.ledger.snapshot(fixture.deployment.id()).is_none());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn successful_restart_keeps_monitoring() {
    let policy = RestartPolicy::enabled(3, 2, 60);
    let fixture = harness(Some(policy), generous_limiter()).await;

    let disposition = fixture
        .controller
        .handle_unhealthy(&fixture.deployment, &fixture.server)
        .await;

    assert_eq!(disposition, FailureDisposition::Continue);
    assert_eq!(fixture.backend.start_calls().expect("counter readable"), 2);
}
