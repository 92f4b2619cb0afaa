//! Integration tests for deployment orchestration over in-memory backends.

use std::sync::Arc;

use mcp_fleet::agent_runtime::{
    adapters::memory::{InMemoryExecutionBackend, InMemoryRuntimeRepository},
    domain::{
        DeploymentKind, DeploymentStatus, DockerSettings, LogicalServer, RuntimeDomainError,
        ServerConfig, ServerId, ServerName, ServerStatus, TransportConfig,
    },
    ports::{ExecutionBackend, RuntimeRepository},
    services::{DeploymentOrchestrator, OrchestratorError},
};
use mockable::DefaultClock;
use rstest::{fixture, rstest};

type Orchestrator = DeploymentOrchestrator<InMemoryRuntimeRepository, DefaultClock>;

struct Harness {
    repository: Arc<InMemoryRuntimeRepository>,
    local: InMemoryExecutionBackend,
    docker: InMemoryExecutionBackend,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    async fn register(&self, name: &str, config: ServerConfig) -> LogicalServer {
        let server = LogicalServer::new(
            ServerName::new(name).expect("valid server name"),
            config,
            &DefaultClock,
        )
        .expect("valid server");
        self.repository
            .save_server(&server)
            .await
            .expect("server saves");
        server
    }

    async fn stdio_server(&self, name: &str) -> LogicalServer {
        self.register(
            name,
            ServerConfig::new(TransportConfig::stdio("mcp-tool").expect("valid transport")),
        )
        .await
    }

    async fn server_status(&self, server: &LogicalServer) -> ServerStatus {
        self.repository
            .find_server(server.id())
            .await
            .expect("lookup succeeds")
            .expect("server exists")
            .status()
    }
}

#[fixture]
fn harness() -> Harness {
    let repository = Arc::new(InMemoryRuntimeRepository::new());
    let local = InMemoryExecutionBackend::new(DeploymentKind::LocalProcess);
    let docker = InMemoryExecutionBackend::new(DeploymentKind::DockerCompose);
    let orchestrator = DeploymentOrchestrator::new(Arc::clone(&repository), Arc::new(DefaultClock))
        .with_backend(Arc::new(local.clone()))
        .with_backend(Arc::new(docker.clone()));
    Harness {
        repository,
        local,
        docker,
        orchestrator: Arc::new(orchestrator),
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn start_then_stop_round_trips_server_status(harness: Harness) {
    let server = harness.stdio_server("alpha").await;

    let deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");

    assert_eq!(deployment.kind(), DeploymentKind::LocalProcess);
    assert_eq!(deployment.status(), DeploymentStatus::Running);
    assert_eq!(
        deployment.port(),
        Some(InMemoryExecutionBackend::BASE_PORT + 1)
    );
    assert_eq!(harness.server_status(&server).await, ServerStatus::Active);

    let stopped = harness
        .orchestrator
        .stop(server.id())
        .await
        .expect("stop succeeds")
        .expect("process deployment is returned");

    assert_eq!(stopped.id(), deployment.id());
    assert_eq!(stopped.status(), DeploymentStatus::Stopped);
    assert_eq!(harness.server_status(&server).await, ServerStatus::Stopped);
    assert!(
        harness
            .repository
            .find_running_deployment(server.id())
            .await
            .expect("lookup succeeds")
            .is_none()
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn second_start_of_live_deployment_is_rejected(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    let first = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("first start succeeds");

    let second = harness.orchestrator.start(server.id(), None).await;

    assert!(matches!(
        second,
        Err(OrchestratorError::AlreadyRunning { deployment_id, .. }) if deployment_id == first.id()
    ));
    assert_eq!(harness.local.start_calls().expect("counter readable"), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stale_deployment_is_superseded_on_start(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    let stale = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("first start succeeds");
    harness.local.kill(server.id()).expect("kill succeeds");

    let fresh = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("restart over stale row succeeds");

    assert_ne!(fresh.id(), stale.id());
    let previous = harness
        .repository
        .find_deployment(stale.id())
        .await
        .expect("lookup succeeds")
        .expect("stale row kept");
    assert_eq!(previous.status(), DeploymentStatus::Stopped);
    let running = harness
        .repository
        .list_running_deployments()
        .await
        .expect("listing succeeds");
    assert_eq!(running.len(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_starts_create_one_deployment(harness: Harness) {
    let server = harness.stdio_server("alpha").await;

    let first = tokio::spawn({
        let orchestrator = Arc::clone(&harness.orchestrator);
        let server_id = server.id();
        async move { orchestrator.start(server_id, None).await }
    });
    let second = tokio::spawn({
        let orchestrator = Arc::clone(&harness.orchestrator);
        let server_id = server.id();
        async move { orchestrator.start(server_id, None).await }
    });
    let results = [
        first.await.expect("task joins"),
        second.await.expect("task joins"),
    ];

    let successes = results.iter().filter(|result| result.is_ok()).count();
    let rejections = results
        .iter()
        .filter(|result| matches!(result, Err(OrchestratorError::AlreadyRunning { .. })))
        .count();
    assert_eq!((successes, rejections), (1, 1));
    assert_eq!(
        harness
            .repository
            .list_running_deployments()
            .await
            .expect("listing succeeds")
            .len(),
        1
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn remote_server_gets_synthetic_deployment(harness: Harness) {
    let server = harness
        .register(
            "remote",
            ServerConfig::new(TransportConfig::sse("http://mcp.example.com/sse").expect("valid url")),
        )
        .await;

    let deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("remote start succeeds");

    assert_eq!(deployment.kind(), DeploymentKind::Remote);
    assert!(deployment.handle().is_none());
    assert_eq!(harness.server_status(&server).await, ServerStatus::Active);
    assert!(
        harness
            .repository
            .find_deployment(deployment.id())
            .await
            .expect("lookup succeeds")
            .is_none()
    );

    let stopped = harness
        .orchestrator
        .stop(server.id())
        .await
        .expect("remote stop succeeds");
    assert!(stopped.is_none());
    assert_eq!(harness.server_status(&server).await, ServerStatus::Stopped);
    assert_eq!(harness.local.start_calls().expect("counter readable"), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn docker_block_selects_compose_backend(harness: Harness) {
    let server = harness
        .register(
            "boxed",
            ServerConfig::new(TransportConfig::stdio("mcp-tool").expect("valid transport"))
                .with_docker(DockerSettings::new("ghcr.io/example/mcp:latest")),
        )
        .await;

    let deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");

    assert_eq!(deployment.kind(), DeploymentKind::DockerCompose);
    assert_eq!(harness.docker.start_calls().expect("counter readable"), 1);
    assert_eq!(harness.local.start_calls().expect("counter readable"), 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn explicit_local_kind_overrides_docker_block(harness: Harness) {
    let server = harness
        .register(
            "boxed",
            ServerConfig::new(TransportConfig::stdio("mcp-tool").expect("valid transport"))
                .with_docker(DockerSettings::new("ghcr.io/example/mcp:latest")),
        )
        .await;

    let deployment = harness
        .orchestrator
        .start(server.id(), Some(DeploymentKind::LocalProcess))
        .await
        .expect("start succeeds");

    assert_eq!(deployment.kind(), DeploymentKind::LocalProcess);
}

#[rstest]
#[case(DeploymentKind::DockerCompose)]
#[case(DeploymentKind::Remote)]
#[tokio::test(flavor = "multi_thread")]
async fn unsupported_kind_is_rejected(harness: Harness, #[case] kind: DeploymentKind) {
    let server = harness.stdio_server("alpha").await;

    let result = harness.orchestrator.start(server.id(), Some(kind)).await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Domain(
            RuntimeDomainError::UnsupportedDeploymentKind { .. }
        ))
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn missing_backend_is_reported() {
    let repository = Arc::new(InMemoryRuntimeRepository::new());
    let orchestrator = DeploymentOrchestrator::new(Arc::clone(&repository), Arc::new(DefaultClock));
    let server = LogicalServer::new(
        ServerName::new("alpha").expect("valid server name"),
        ServerConfig::new(TransportConfig::stdio("mcp-tool").expect("valid transport")),
        &DefaultClock,
    )
    .expect("valid server");
    repository.save_server(&server).await.expect("server saves");

    let result = orchestrator.start(server.id(), None).await;

    assert!(matches!(
        result,
        Err(OrchestratorError::BackendUnavailable(DeploymentKind::LocalProcess))
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unknown_server_and_idle_stop_are_reported(harness: Harness) {
    let unknown = ServerId::new();
    assert!(matches!(
        harness.orchestrator.start(unknown, None).await,
        Err(OrchestratorError::ServerNotFound(id)) if id == unknown
    ));

    let server = harness.stdio_server("idle").await;
    assert!(matches!(
        harness.orchestrator.stop(server.id()).await,
        Err(OrchestratorError::NoRunningDeployment(id)) if id == server.id()
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn status_flags_stale_deployments(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");

    let live = harness
        .orchestrator
        .status(server.id())
        .await
        .expect("status succeeds");
    assert!(live.running);
    assert!(!live.stale);

    harness.local.kill(server.id()).expect("kill succeeds");
    let stale = harness
        .orchestrator
        .status(server.id())
        .await
        .expect("status succeeds");
    assert!(!stale.running);
    assert!(stale.stale);
    assert!(stale.deployment.is_some());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reconcile_demotes_dead_deployments(harness: Harness) {
    let alive = harness.stdio_server("alive").await;
    let dead = harness.stdio_server("dead").await;
    harness
        .orchestrator
        .start(alive.id(), None)
        .await
        .expect("start succeeds");
    let dead_deployment = harness
        .orchestrator
        .start(dead.id(), None)
        .await
        .expect("start succeeds");
    harness.local.kill(dead.id()).expect("kill succeeds");

    let report = harness
        .orchestrator
        .reconcile()
        .await
        .expect("reconcile succeeds");

    assert_eq!(
        (report.checked, report.alive, report.demoted, report.unknown),
        (2, 1, 1, 0)
    );
    let demoted = harness
        .repository
        .find_deployment(dead_deployment.id())
        .await
        .expect("lookup succeeds")
        .expect("row kept");
    assert_eq!(demoted.status(), DeploymentStatus::Stopped);
    assert_eq!(harness.server_status(&dead).await, ServerStatus::Stopped);
    assert_eq!(harness.server_status(&alive).await, ServerStatus::Active);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn redeploy_keeps_row_and_port(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    let original = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");

    let redeployed = harness
        .orchestrator
        .redeploy(original.id())
        .await
        .expect("redeploy succeeds");

    assert_eq!(redeployed.id(), original.id());
    assert_eq!(redeployed.port(), original.port());
    assert_ne!(redeployed.handle(), original.handle());
    assert_eq!(harness.local.stop_calls().expect("counter readable"), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn redeploy_of_stopped_deployment_is_rejected(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    let deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");
    harness
        .orchestrator
        .stop(server.id())
        .await
        .expect("stop succeeds");

    let result = harness.orchestrator.redeploy(deployment.id()).await;

    assert!(matches!(
        result,
        Err(OrchestratorError::Domain(
            RuntimeDomainError::InvalidStatusTransition { .. }
        ))
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn mark_failed_sets_server_error(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    let deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");

    let failed = harness
        .orchestrator
        .mark_failed(deployment.id(), "restart retries exhausted")
        .await
        .expect("mark failed succeeds");

    assert_eq!(failed.status(), DeploymentStatus::Failed);
    assert_eq!(failed.last_error(), Some("restart retries exhausted"));
    assert_eq!(harness.server_status(&server).await, ServerStatus::Error);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn logs_come_from_the_deployment_backend(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    let deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");

    let logs = harness
        .orchestrator
        .logs(server.id(), 25)
        .await
        .expect("logs succeed");

    let handle = deployment.handle().expect("handle recorded");
    assert_eq!(logs, format!("{handle}: last 25 lines"));
}

#[rstest]
#[case::error(DeploymentStatus::Error)]
#[case::failed(DeploymentStatus::Failed)]
#[tokio::test(flavor = "multi_thread")]
async fn broken_deployment_releases_its_instance(
    harness: Harness,
    #[case] target: DeploymentStatus,
) {
    let server = harness.stdio_server("alpha").await;
    let deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");

    let broken = match target {
        DeploymentStatus::Failed => harness.orchestrator.mark_failed(deployment.id(), "gave up").await,
        _ => harness.orchestrator.mark_error(deployment.id(), "unhealthy").await,
    }
    .expect("marking succeeds");

    assert_eq!(broken.status(), target);
    assert_eq!(harness.local.stop_calls().expect("counter readable"), 1);
    assert!(
        !harness
            .local
            .status(server.id(), deployment.handle())
            .await
            .expect("status readable")
            .running
    );

    let restarted = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start after breakage succeeds");
    assert_ne!(restarted.id(), deployment.id());
    assert_eq!(restarted.status(), DeploymentStatus::Running);
    assert_eq!(harness.server_status(&server).await, ServerStatus::Active);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn start_stops_instance_left_behind_by_errored_row(harness: Harness) {
    let server = harness.stdio_server("alpha").await;
    let mut deployment = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start succeeds");
    deployment
        .mark_error("written by an older supervisor", &DefaultClock)
        .expect("running deployment can error");
    harness
        .repository
        .upsert_deployment(&deployment)
        .await
        .expect("row saves");

    let restarted = harness
        .orchestrator
        .start(server.id(), None)
        .await
        .expect("start replaces the leftover instance");

    assert_eq!(harness.local.stop_calls().expect("counter readable"), 1);
    assert_eq!(harness.local.start_calls().expect("counter readable"), 2);
    assert_ne!(restarted.handle(), deployment.handle());
    assert_eq!(
        harness
            .local
            .status(server.id(), None)
            .await
            .expect("status readable")
            .handle
            .as_deref(),
        restarted.handle()
    );
}
