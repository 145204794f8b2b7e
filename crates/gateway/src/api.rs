//! HTTP API: health, metrics, VM stats and Docker management

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use gateway_lib::{
    health::{ComponentStatus, HealthRegistry},
    ContainerRecord, DockerOps, GatewayError, ImageRecord, MetricsOrchestrator, PollOutcome,
    Scorer, SshTransport, VolumeRecord,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
pub struct AppState<T: SshTransport, S: Scorer + 'static> {
    pub health_registry: HealthRegistry,
    pub orchestrator: MetricsOrchestrator<T, S>,
    pub docker: DockerOps<T>,
}

impl<T: SshTransport, S: Scorer + 'static> AppState<T, S> {
    pub fn new(
        health_registry: HealthRegistry,
        orchestrator: MetricsOrchestrator<T, S>,
        docker: DockerOps<T>,
    ) -> Self {
        Self {
            health_registry,
            orchestrator,
            docker,
        }
    }
}

type SharedState<T, S> = State<Arc<AppState<T, S>>>;

/// Error body: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = if err.is_invalid_request() {
            StatusCode::BAD_REQUEST
        } else if err.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::BAD_GATEWAY
        };
        if status != StatusCode::BAD_REQUEST {
            error!(error = %err, status = status.as_u16(), "Request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmEntry {
    pub name: String,
    pub host: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>, output: String) -> Self {
        Self {
            message: message.into(),
            output,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvResponse {
    pub env_vars: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub output: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetEnvRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecRequest {
    #[serde(default)]
    pub command: String,
}

/// 200 when healthy or degraded, 503 when unhealthy
async fn healthz<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_vms<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
) -> Json<Vec<VmEntry>> {
    let vms = state
        .docker
        .runner()
        .tunnels()
        .registry()
        .iter()
        .map(|(name, host)| VmEntry {
            name: name.to_string(),
            host: host.to_string(),
        })
        .collect();
    Json(vms)
}

async fn vm_stats<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path(vm): Path<String>,
) -> ApiResult<Vec<ContainerRecord>> {
    match state.orchestrator.poll_vm(&vm).await? {
        PollOutcome::Completed(records) => Ok(Json(records)),
        PollOutcome::AlreadyInFlight => Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("A metrics poll for {} is already in progress", vm),
        )),
    }
}

async fn list_images<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path(vm): Path<String>,
) -> ApiResult<Vec<ImageRecord>> {
    Ok(Json(state.docker.list_images(&vm).await?))
}

async fn remove_image<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, image)): Path<(String, String)>,
) -> ApiResult<MessageResponse> {
    let output = state.docker.remove_image(&vm, &image).await?;
    Ok(Json(MessageResponse::new("Image deleted", output)))
}

async fn list_volumes<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path(vm): Path<String>,
) -> ApiResult<Vec<VolumeRecord>> {
    Ok(Json(state.docker.list_volumes(&vm).await?))
}

async fn remove_volume<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, volume)): Path<(String, String)>,
) -> ApiResult<MessageResponse> {
    let output = state.docker.remove_volume(&vm, &volume).await?;
    Ok(Json(MessageResponse::new("Volume deleted", output)))
}

async fn bridge_network<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path(vm): Path<String>,
) -> ApiResult<Value> {
    Ok(Json(state.docker.bridge_network(&vm).await?))
}

async fn deploy<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path(vm): Path<String>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<MessageResponse> {
    let container_id = state
        .docker
        .deploy(&vm, &request.image, &request.name)
        .await?;
    info!(vm = %vm, image = %request.image, name = %request.name, "Container deployed");
    Ok(Json(MessageResponse::new("Container deployed", container_id)))
}

async fn inspect_container<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, container)): Path<(String, String)>,
) -> ApiResult<Value> {
    Ok(Json(state.docker.inspect_container(&vm, &container).await?))
}

async fn container_env<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, container)): Path<(String, String)>,
) -> ApiResult<EnvResponse> {
    let env_vars = state.docker.env_vars(&vm, &container).await?;
    Ok(Json(EnvResponse { env_vars }))
}

async fn set_container_env<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, container)): Path<(String, String)>,
    Json(request): Json<SetEnvRequest>,
) -> ApiResult<MessageResponse> {
    state
        .docker
        .set_env_var(&vm, &container, &request.key, &request.value)
        .await?;
    Ok(Json(MessageResponse::new(
        "Environment variable exported in a one-off shell; the container configuration is unchanged",
        String::new(),
    )))
}

async fn container_logs<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, container)): Path<(String, String)>,
) -> ApiResult<LogsResponse> {
    let logs = state.docker.logs(&vm, &container).await?;
    Ok(Json(LogsResponse { logs }))
}

async fn stop_container<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, container)): Path<(String, String)>,
) -> ApiResult<MessageResponse> {
    let output = state.docker.stop(&vm, &container).await?;
    Ok(Json(MessageResponse::new("Container stopped", output)))
}

async fn restart_container<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, container)): Path<(String, String)>,
) -> ApiResult<MessageResponse> {
    let output = state.docker.restart(&vm, &container).await?;
    Ok(Json(MessageResponse::new("Container restarted", output)))
}

async fn exec_in_container<T: SshTransport, S: Scorer + 'static>(
    State(state): SharedState<T, S>,
    Path((vm, container)): Path<(String, String)>,
    Json(request): Json<ExecRequest>,
) -> ApiResult<ExecResponse> {
    let output = state.docker.exec(&vm, &container, &request.command).await?;
    Ok(Json(ExecResponse { output }))
}

/// Create the API router
pub fn create_router<T: SshTransport, S: Scorer + 'static>(state: Arc<AppState<T, S>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz::<T, S>))
        .route("/readyz", get(readyz::<T, S>))
        .route("/metrics", get(metrics))
        .route("/api/vms", get(list_vms::<T, S>))
        .route("/api/vms/:vm/stats", get(vm_stats::<T, S>))
        .route("/api/vms/:vm/images", get(list_images::<T, S>))
        .route("/api/vms/:vm/images/:image", delete(remove_image::<T, S>))
        .route("/api/vms/:vm/volumes", get(list_volumes::<T, S>))
        .route("/api/vms/:vm/volumes/:volume", delete(remove_volume::<T, S>))
        .route("/api/vms/:vm/network", get(bridge_network::<T, S>))
        .route("/api/vms/:vm/containers", post(deploy::<T, S>))
        .route(
            "/api/vms/:vm/containers/:container/inspect",
            get(inspect_container::<T, S>),
        )
        .route(
            "/api/vms/:vm/containers/:container/env",
            get(container_env::<T, S>).post(set_container_env::<T, S>),
        )
        .route(
            "/api/vms/:vm/containers/:container/logs",
            get(container_logs::<T, S>),
        )
        .route(
            "/api/vms/:vm/containers/:container/stop",
            post(stop_container::<T, S>),
        )
        .route(
            "/api/vms/:vm/containers/:container/restart",
            post(restart_container::<T, S>),
        )
        .route(
            "/api/vms/:vm/containers/:container/exec",
            post(exec_in_container::<T, S>),
        )
        .with_state(state)
}

/// Start the API server
pub async fn serve<T: SshTransport, S: Scorer + 'static>(
    port: u16,
    state: Arc<AppState<T, S>>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
