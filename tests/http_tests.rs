//! Operator HTTP surface tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use mcp_fleet::{
    agent_runtime::{
        adapters::{
            ProcessPool,
            memory::{InMemoryExecutionBackend, InMemoryRuntimeRepository},
        },
        domain::{
            DeploymentKind, LogicalServer, ServerConfig, ServerId, ServerName, TransportConfig,
        },
        ports::RuntimeRepository,
        services::{AgentRuntime, DeploymentOrchestrator, RuntimeSettings},
    },
    http::router,
};
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::Value;
use tower::ServiceExt;

struct Harness {
    repository: Arc<InMemoryRuntimeRepository>,
    app: Router,
}

impl Harness {
    async fn register(&self, name: &str) -> ServerId {
        let server = LogicalServer::new(
            ServerName::new(name).expect("valid name"),
            ServerConfig::new(TransportConfig::stdio("mcp-tool").expect("valid transport")),
            &DefaultClock,
        )
        .expect("valid server");
        self.repository
            .save_server(&server)
            .await
            .expect("server saves");
        server.id()
    }

    async fn send(&self, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .expect("request builds");
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

#[fixture]
fn harness() -> Harness {
    let repository = Arc::new(InMemoryRuntimeRepository::new());
    let clock = Arc::new(DefaultClock);
    let orchestrator = DeploymentOrchestrator::new(Arc::clone(&repository), Arc::clone(&clock))
        .with_backend(Arc::new(InMemoryExecutionBackend::new(
            DeploymentKind::LocalProcess,
        )));
    let runtime = AgentRuntime::new(
        orchestrator,
        Arc::new(ProcessPool::default()),
        clock,
        RuntimeSettings::default(),
    );
    Harness {
        repository,
        app: router(Arc::new(runtime)),
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn healthz_reports_pool_size(harness: Harness) {
    let (status, body) = harness.send("GET", "/healthz", Body::empty()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["pooled_processes"], 0);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deployment_lifecycle_over_http(harness: Harness) {
    let server_id = harness.register("alpha").await;

    let (status, started) = harness
        .send(
            "POST",
            &format!("/deployments/{server_id}/start"),
            Body::empty(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["success"], true);
    assert_eq!(started["deployment"]["kind"], "local_process");
    assert_eq!(started["deployment"]["status"], "running");

    let (status, report) = harness
        .send(
            "GET",
            &format!("/deployments/{server_id}/status"),
            Body::empty(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"]["running"], true);
    assert_eq!(report["status"]["server_status"], "active");

    let (status, logs) = harness
        .send(
            "GET",
            &format!("/deployments/{server_id}/logs?tail=5"),
            Body::empty(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["logs"], "mem-1: last 5 lines");

    let (status, stopped) = harness
        .send(
            "POST",
            &format!("/deployments/{server_id}/stop"),
            Body::empty(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["deployment"]["status"], "stopped");
    assert_eq!(stopped["message"], format!("server {server_id} stopped"));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn explicit_kind_in_start_body_is_honoured(harness: Harness) {
    let server_id = harness.register("alpha").await;

    let (status, body) = harness
        .send(
            "POST",
            &format!("/deployments/{server_id}/start"),
            Body::from(r#"{"kind": "docker_compose"}"#),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn duplicate_start_is_a_deployment_error(harness: Harness) {
    let server_id = harness.register("alpha").await;
    let uri = format!("/deployments/{server_id}/start");
    harness.send("POST", &uri, Body::empty()).await;

    let (status, body) = harness.send("POST", &uri, Body::empty()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "DEPLOYMENT_ERROR");
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|message| message.contains("already running"))
    );
}

#[rstest]
#[case("POST", "/deployments/not-a-uuid/start")]
#[case("GET", "/deployments/not-a-uuid/status")]
#[case("POST", "/proxy/not-a-uuid")]
#[tokio::test(flavor = "multi_thread")]
async fn malformed_server_id_is_rejected(
    harness: Harness,
    #[case] method: &str,
    #[case] uri: &str,
) {
    let (status, body) = harness.send(method, uri, Body::empty()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"], "invalid server id: not-a-uuid");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn unknown_server_is_not_found(harness: Harness) {
    let unknown = ServerId::new();

    let (status, body) = harness
        .send(
            "GET",
            &format!("/deployments/{unknown}/status"),
            Body::empty(),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stopping_idle_server_is_not_found(harness: Harness) {
    let server_id = harness.register("idle").await;

    let (status, body) = harness
        .send(
            "POST",
            &format!("/deployments/{server_id}/stop"),
            Body::empty(),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["error"],
        format!("no running deployment for server {server_id}")
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn proxy_route_reports_unknown_server(harness: Harness) {
    let unknown = ServerId::new();

    let (status, body) = harness
        .send(
            "POST",
            &format!("/proxy/{unknown}/messages"),
            Body::from(r#"{"jsonrpc": "2.0", "id": "q", "method": "tools/list"}"#),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "q");
    assert_eq!(body["error"]["code"], -32603);
}
