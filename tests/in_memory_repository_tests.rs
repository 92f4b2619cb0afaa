//! In-memory runtime repository tests, including recovery of deployment rows
//! left behind by a previous supervisor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use mcp_fleet::agent_runtime::{
    adapters::memory::{InMemoryExecutionBackend, InMemoryRuntimeRepository},
    domain::{
        Deployment, DeploymentId, DeploymentKind, DeploymentStatus, HealthCheckResult,
        HealthStatus, LogicalServer, PersistedDeploymentData, ServerConfig, ServerId, ServerName,
        ServerStatus, TransportConfig,
    },
    ports::{RepositoryError, RuntimeRepository},
    services::DeploymentOrchestrator,
};
use mockable::DefaultClock;
use rstest::{fixture, rstest};

#[fixture]
fn repository() -> InMemoryRuntimeRepository {
    InMemoryRuntimeRepository::new()
}

fn server(name: &str) -> LogicalServer {
    LogicalServer::new(
        ServerName::new(name).expect("valid name"),
        ServerConfig::new(TransportConfig::stdio("mcp-tool").expect("valid transport")),
        &DefaultClock,
    )
    .expect("valid server")
}

fn persisted_running(server_id: ServerId, handle: &str, age_secs: i64) -> Deployment {
    let created_at = Utc::now() - TimeDelta::seconds(age_secs);
    Deployment::from_persisted(PersistedDeploymentData {
        id: DeploymentId::new(),
        server_id,
        kind: DeploymentKind::LocalProcess,
        status: DeploymentStatus::Running,
        host: Some("127.0.0.1".to_owned()),
        port: Some(41_000),
        handle: Some(handle.to_owned()),
        last_error: None,
        created_at,
        updated_at: created_at,
    })
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_server_names_are_rejected(repository: InMemoryRuntimeRepository) {
    repository
        .save_server(&server("alpha"))
        .await
        .expect("first save succeeds");

    let result = repository.save_server(&server("alpha")).await;

    assert!(matches!(
        result,
        Err(RepositoryError::DuplicateServerName(name)) if name == "alpha"
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn resaving_a_server_updates_it_in_place(repository: InMemoryRuntimeRepository) {
    let mut alpha = server("alpha");
    repository.save_server(&alpha).await.expect("save succeeds");
    alpha.set_status(ServerStatus::Active, &DefaultClock);

    repository
        .save_server(&alpha)
        .await
        .expect("resave succeeds");

    let servers = repository.list_servers().await.expect("list succeeds");
    assert_eq!(servers.len(), 1);
    assert_eq!(
        servers.first().map(LogicalServer::status),
        Some(ServerStatus::Active)
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn servers_are_listed_by_name(repository: InMemoryRuntimeRepository) {
    for name in ["gamma", "alpha", "beta"] {
        repository
            .save_server(&server(name))
            .await
            .expect("save succeeds");
    }

    let names: Vec<String> = repository
        .list_servers()
        .await
        .expect("list succeeds")
        .iter()
        .map(|item| item.name().as_str().to_owned())
        .collect();

    assert_eq!(names, ["alpha", "beta", "gamma"]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn status_update_requires_known_server(repository: InMemoryRuntimeRepository) {
    let unknown = ServerId::new();

    let result = repository
        .update_server_status(unknown, ServerStatus::Error)
        .await;

    assert!(matches!(result, Err(RepositoryError::ServerNotFound(id)) if id == unknown));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deployments_require_their_server(repository: InMemoryRuntimeRepository) {
    let orphan = persisted_running(ServerId::new(), "4242", 0);

    let result = repository.upsert_deployment(&orphan).await;

    assert!(matches!(result, Err(RepositoryError::ServerNotFound(_))));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn newest_running_deployment_wins(repository: InMemoryRuntimeRepository) {
    let alpha = server("alpha");
    repository.save_server(&alpha).await.expect("save succeeds");
    let older = persisted_running(alpha.id(), "100", 120);
    let newer = persisted_running(alpha.id(), "200", 10);
    repository
        .upsert_deployment(&newer)
        .await
        .expect("upsert succeeds");
    repository
        .upsert_deployment(&older)
        .await
        .expect("upsert succeeds");

    let found = repository
        .find_running_deployment(alpha.id())
        .await
        .expect("lookup succeeds");
    let running = repository
        .list_running_deployments()
        .await
        .expect("list succeeds");

    assert_eq!(found.map(|deployment| deployment.id()), Some(newer.id()));
    let order: Vec<DeploymentId> = running.iter().map(Deployment::id).collect();
    assert_eq!(order, [older.id(), newer.id()]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn health_history_is_newest_first_and_limited(repository: InMemoryRuntimeRepository) {
    let deployment_id = DeploymentId::new();
    let statuses = [
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unhealthy,
    ];
    for (offset, status) in (0_i64..).zip(statuses) {
        let result = HealthCheckResult::new(
            deployment_id,
            status,
            Duration::from_millis(5),
            Utc::now() + TimeDelta::seconds(offset),
        );
        repository
            .record_health_check(&result)
            .await
            .expect("record succeeds");
    }

    let history = repository
        .health_history(deployment_id, 2)
        .await
        .expect("history readable");

    let seen: Vec<HealthStatus> = history.iter().map(HealthCheckResult::status).collect();
    assert_eq!(seen, [HealthStatus::Unhealthy, HealthStatus::Degraded]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reconcile_recovers_rows_from_previous_run(repository: InMemoryRuntimeRepository) {
    let repository = Arc::new(repository);
    let backend = InMemoryExecutionBackend::new(DeploymentKind::LocalProcess);
    let survivor = server("survivor");
    let casualty = server("casualty");
    for item in [&survivor, &casualty] {
        repository.save_server(item).await.expect("save succeeds");
    }
    let survivor_row = persisted_running(survivor.id(), "311", 60);
    let casualty_row = persisted_running(casualty.id(), "312", 30);
    for row in [&survivor_row, &casualty_row] {
        repository
            .upsert_deployment(row)
            .await
            .expect("upsert succeeds");
    }
    backend
        .adopt(survivor.id(), "311")
        .expect("adoption succeeds");
    let orchestrator =
        DeploymentOrchestrator::new(Arc::clone(&repository), Arc::new(DefaultClock))
            .with_backend(Arc::new(backend));

    let report = orchestrator.reconcile().await.expect("reconcile succeeds");

    assert_eq!(report.checked, 2);
    assert_eq!(report.alive, 1);
    assert_eq!(report.demoted, 1);
    let casualty_after = repository
        .find_deployment(casualty_row.id())
        .await
        .expect("lookup succeeds")
        .expect("row kept");
    assert_eq!(casualty_after.status(), DeploymentStatus::Stopped);
    let survivor_after = repository
        .find_running_deployment(survivor.id())
        .await
        .expect("lookup succeeds");
    assert_eq!(
        survivor_after.map(|deployment| deployment.id()),
        Some(survivor_row.id())
    );
}
