//! Proxy router dispatching JSON-RPC requests to the owning transport.
//!
//! The request body is parsed once; the envelope outcome decides both early
//! validation and the final error shape.

use crate::agent_runtime::{
    adapters::ProcessPool,
    domain::{
        LogicalServer, ServerId, TransportConfig,
        jsonrpc::{EnvelopeError, JsonRpcErrorResponse, JsonRpcRequest},
    },
    error::RuntimeError,
    ports::RuntimeRepository,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Proxy timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxySettings {
    /// Deadline for forwarded HTTP requests.
    pub request_timeout: Duration,
    /// Deadline for a single stdio call.
    pub stdio_timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            stdio_timeout: Duration::from_secs(30),
        }
    }
}

/// Inbound request to proxy.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the server's proxy prefix, including any query string.
    pub path: String,
    /// Inbound headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Vec<u8>,
}

impl ProxyRequest {
    /// Builds a `POST /` request carrying a JSON body.
    #[must_use]
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            path: "/".to_owned(),
            headers,
            body: body.into(),
        }
    }
}

/// Response returned to the proxy caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw body.
    pub body: Vec<u8>,
}

impl ProxyResponse {
    /// Serializes `value` as a JSON response.
    #[must_use]
    pub fn json(status: StatusCode, value: &impl Serialize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body: serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns the decoder error for non-JSON bodies.
    pub fn json_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Routes proxied requests to subprocesses, deployments, or remote URLs.
pub struct ProxyRouter<R>
where
    R: RuntimeRepository,
{
    repository: Arc<R>,
    pool: Arc<ProcessPool>,
    client: reqwest::Client,
    settings: ProxySettings,
}

impl<R> ProxyRouter<R>
where
    R: RuntimeRepository,
{
    /// Creates a router over the shared pool.
    #[must_use]
    pub fn new(repository: Arc<R>, pool: Arc<ProcessPool>, settings: ProxySettings) -> Self {
        Self {
            repository,
            pool,
            client: reqwest::Client::new(),
            settings,
        }
    }

    /// Routes `request` for `server_id`; failures become error responses.
    pub async fn route(&self, server_id: ServerId, request: ProxyRequest) -> ProxyResponse {
        let envelope = JsonRpcRequest::parse(&request.body);
        match self.dispatch(server_id, &request, &envelope).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    server_id = %server_id,
                    code = err.code(),
                    error = %err,
                    "proxy request failed"
                );
                error_response(&err, &envelope)
            }
        }
    }

    async fn dispatch(
        &self,
        server_id: ServerId,
        request: &ProxyRequest,
        envelope: &Result<JsonRpcRequest, EnvelopeError>,
    ) -> Result<ProxyResponse, RuntimeError> {
        let server = self.load_server(server_id).await?;
        let rpc = envelope.as_ref().map_err(|err| RuntimeError::from(err.clone()))?;
        debug!(
            server_id = %server_id,
            request_id = %rpc.id(),
            method = rpc.method(),
            transport = server.config().transport.kind(),
            "routing proxy request"
        );

        match &server.config().transport {
            TransportConfig::Sse(config) => {
                let url = join_url(config.url(), &request.path);
                self.forward(server_id, &url, request, config.headers().iter())
                    .await
            }
            TransportConfig::Stdio(config) => {
                let value = self
                    .pool
                    .send_request(server_id, config, rpc, self.settings.stdio_timeout)
                    .await?;
                Ok(ProxyResponse::json(StatusCode::OK, &value))
            }
            TransportConfig::Executable(_) | TransportConfig::Lambda(_) => {
                let url = self.deployment_url(server_id, &request.path).await?;
                self.forward(server_id, &url, request, std::iter::empty())
                    .await
            }
        }
    }

    async fn load_server(&self, server_id: ServerId) -> Result<LogicalServer, RuntimeError> {
        self.repository
            .find_server(server_id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("server {server_id} not found")))
    }

    async fn deployment_url(&self, server_id: ServerId, path: &str) -> Result<String, RuntimeError> {
        let deployment = self
            .repository
            .find_running_deployment(server_id)
            .await?
            .ok_or_else(|| {
                RuntimeError::Deployment(format!("no running deployment for server {server_id}"))
            })?;
        let (Some(host), Some(port)) = (deployment.host(), deployment.port()) else {
            return Err(RuntimeError::Deployment(format!(
                "deployment {} for server {server_id} has no address",
                deployment.id()
            )));
        };
        Ok(join_url(&format!("http://{host}:{port}"), path))
    }

    async fn forward<'a>(
        &self,
        server_id: ServerId,
        url: &str,
        request: &ProxyRequest,
        extra_headers: impl Iterator<Item = (&'a String, &'a String)>,
    ) -> Result<ProxyResponse, RuntimeError> {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .timeout(self.settings.request_timeout)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            if !is_skipped_request_header(name) {
                builder = builder.header(name, value);
            }
        }
        for (name, value) in extra_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|err| {
            RuntimeError::Proxy(format!("request to server {server_id} failed: {err}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Proxy(format!(
                "server {server_id} responded with {status}: {}",
                detail.trim()
            )));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if !is_skipped_response_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        let body = response.bytes().await.map_err(|err| {
            RuntimeError::Proxy(format!("reading response from server {server_id} failed: {err}"))
        })?;
        Ok(ProxyResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Shapes a routing failure for the caller.
///
/// Callers with a valid envelope see NotFound, Deployment, and Proxy failures
/// as a JSON-RPC error with HTTP 200; everything else is a plain error body.
fn error_response(
    err: &RuntimeError,
    envelope: &Result<JsonRpcRequest, EnvelopeError>,
) -> ProxyResponse {
    match envelope {
        Ok(rpc) if err.is_jsonrpc_shaped() => ProxyResponse::json(
            StatusCode::OK,
            &JsonRpcErrorResponse::internal(Some(rpc.id().clone()), err.to_string()),
        ),
        _ => ProxyResponse::json(
            err.status_code(),
            &json!({"error": err.to_string(), "code": err.code()}),
        ),
    }
}

fn is_skipped_request_header(name: &HeaderName) -> bool {
    *name == header::HOST || is_skipped_response_header(name)
}

fn is_skipped_response_header(name: &HeaderName) -> bool {
    [
        header::CONTENT_LENGTH,
        header::CONTENT_ENCODING,
        header::CONNECTION,
        header::TRANSFER_ENCODING,
    ]
    .contains(name)
}

/// Joins a base URL and a request path with exactly one slash.
fn join_url(base: &str, path: &str) -> String {
    let trimmed_path = path.trim_start_matches('/');
    if trimmed_path.is_empty() {
        return base.to_owned();
    }
    format!("{}/{trimmed_path}", base.trim_end_matches('/'))
}
