//! HTTP control surface
//!
//! JSON over HTTP/1.1. Routes mirror the gRPC service; recoverable errors
//! map to status codes through [`Error::to_http_status`] with the reason in
//! an `{"error": "..."}` body.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use orch_core::{
    Accelerator, AcceleratorType, AvailableResources, Error, JobId, JobSpec, JobState, Node,
    NodeId, Result,
};
use orch_sched::Scheduler;
use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

/// Error wrapper so handlers can use `?` on core errors
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the router over the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(cluster_status))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/submit", post(submit_job))
        .route("/jobs/cancel", post(cancel_job))
        .route("/jobs/complete", post(complete_job))
        .route("/jobs/dequeue", post(dequeue_job))
        .route("/nodes", get(list_nodes))
        .route("/nodes/register", post(register_node))
        .route("/nodes/heartbeat", post(node_heartbeat))
        .route("/nodes/deregister", post(deregister_node))
        .route("/workers", get(list_workers))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve the HTTP surface until the task is aborted
pub async fn serve_http(addr: SocketAddr, state: AppState) -> Result<()> {
    let app = router(state);
    info!("HTTP server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::internal(format!("failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::internal(format!("HTTP server failed: {}", e)))?;
    Ok(())
}

// -- handlers ----------------------------------------------------------------

/// Liveness: healthy iff the scheduling tick has run recently.
async fn health(State(state): State<AppState>) -> Response {
    if state.scheduler.is_healthy() {
        Json(json!({ "status": "healthy" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy" })),
        )
            .into_response()
    }
}

async fn cluster_status(State(state): State<AppState>) -> Json<Value> {
    let status = state.scheduler.allocator().cluster_status().await;
    Json(serde_json::to_value(status).unwrap_or(Value::Null))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.scheduler.stats().await;
    let cluster = state.scheduler.allocator().cluster_status().await;
    Json(json!({ "jobs": jobs, "cluster": cluster }))
}

/// Prometheus metrics, collected at scrape time from the live state.
async fn metrics(State(state): State<AppState>) -> Response {
    let registry = Registry::new();
    let status = state.scheduler.allocator().cluster_status().await;
    let jobs = state.scheduler.stats().await;

    let gauges: [(&str, &str, i64); 6] = [
        ("orchestrator_nodes_total", "Registered nodes", status.total_nodes as i64),
        ("orchestrator_nodes_healthy", "Healthy nodes", status.healthy_nodes as i64),
        ("orchestrator_gpus_total", "Accelerators in the fleet", status.total_gpus as i64),
        ("orchestrator_gpus_used", "Accelerators held by live allocations", status.used_gpus as i64),
        ("orchestrator_allocations", "Live allocations", status.allocations as i64),
        (
            "orchestrator_invariant_violations_total",
            "Allocator invariant violations observed",
            state.scheduler.invariant_violations() as i64,
        ),
    ];
    for (name, help, value) in gauges {
        if let Ok(gauge) = IntGauge::new(name, help) {
            gauge.set(value);
            let _ = registry.register(Box::new(gauge));
        }
    }

    if let Ok(by_state) = IntGaugeVec::new(
        Opts::new("orchestrator_jobs", "Jobs in the registry by state"),
        &["state"],
    ) {
        for (job_state, count) in &jobs {
            by_state.with_label_values(&[job_state.as_str()]).set(*count as i64);
        }
        let _ = registry.register(Box::new(by_state));
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(error = %e, "encoding metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    state: Option<String>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Value>> {
    let filter = match query.state.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<JobState>()
                .map_err(Error::invalid_request)?,
        ),
    };
    let jobs = state.scheduler.list(filter).await;
    Ok(Json(serde_json::to_value(jobs).unwrap_or(Value::Null)))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let job = state.scheduler.get(&JobId::new(id)).await?;
    Ok(Json(serde_json::to_value(job).unwrap_or(Value::Null)))
}

async fn submit_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> ApiResult<Json<Value>> {
    let id = state.scheduler.submit(spec).await?;
    Ok(Json(json!({ "job_id": id })))
}

#[derive(Debug, Deserialize)]
struct JobIdPayload {
    job_id: String,
}

async fn cancel_job(
    State(state): State<AppState>,
    Json(payload): Json<JobIdPayload>,
) -> ApiResult<Json<Value>> {
    state.scheduler.cancel(&JobId::new(payload.job_id)).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct CompletePayload {
    job_id: String,
    #[serde(default)]
    error: Option<String>,
}

async fn complete_job(
    State(state): State<AppState>,
    Json(payload): Json<CompletePayload>,
) -> ApiResult<Json<Value>> {
    let outcome = payload.error.filter(|e| !e.is_empty());
    state
        .scheduler
        .complete(&JobId::new(payload.job_id), outcome)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct DequeuePayload {
    worker_id: String,
    #[serde(default)]
    available: AvailableResources,
}

async fn dequeue_job(
    State(state): State<AppState>,
    Json(payload): Json<DequeuePayload>,
) -> ApiResult<Json<Value>> {
    let job = state
        .scheduler
        .dequeue(&NodeId::new(payload.worker_id), &payload.available)
        .await?;
    Ok(Json(json!({ "job": job })))
}

/// Node registration payload; the wire shape the agents send.
#[derive(Debug, Deserialize)]
struct RegisterNodePayload {
    id: String,
    address: String,
    #[serde(default)]
    accelerators: Vec<AcceleratorPayload>,
    #[serde(default)]
    total_memory_gb: u64,
    #[serde(default)]
    total_cpus: u32,
}

#[derive(Debug, Deserialize)]
struct AcceleratorPayload {
    id: String,
    #[serde(rename = "type")]
    kind: AcceleratorType,
    #[serde(default)]
    memory_gb: u64,
}

impl RegisterNodePayload {
    fn into_node(self) -> Result<Node> {
        if self.id.is_empty() {
            return Err(Error::invalid_request("node id is required"));
        }
        let node_id = NodeId::new(self.id);
        Ok(Node {
            accelerators: self
                .accelerators
                .into_iter()
                .map(|a| Accelerator {
                    id: a.id,
                    node_id: node_id.clone(),
                    kind: a.kind,
                    memory_gb: a.memory_gb,
                    allocated: false,
                    job_id: None,
                    allocated_at: None,
                })
                .collect(),
            id: node_id,
            address: self.address,
            total_memory_gb: self.total_memory_gb,
            used_memory_gb: 0,
            total_cpus: self.total_cpus,
            used_cpus: 0,
            healthy: false,
            last_heartbeat: chrono::Utc::now(),
            unhealthy_since: None,
        })
    }
}

async fn register_node(
    State(state): State<AppState>,
    Json(payload): Json<RegisterNodePayload>,
) -> ApiResult<Json<Value>> {
    let node = payload.into_node()?;
    let node_id = node.id.clone();
    state.scheduler.allocator().register_node(node).await;
    Ok(Json(json!({ "status": "registered", "node_id": node_id })))
}

#[derive(Debug, Deserialize)]
struct NodeIdPayload {
    node_id: String,
}

async fn node_heartbeat(
    State(state): State<AppState>,
    Json(payload): Json<NodeIdPayload>,
) -> ApiResult<Json<Value>> {
    state
        .scheduler
        .allocator()
        .heartbeat(&NodeId::new(payload.node_id))
        .await?;
    Ok(Json(json!({ "status": "ok" })))
}

async fn deregister_node(
    State(state): State<AppState>,
    Json(payload): Json<NodeIdPayload>,
) -> ApiResult<Json<Value>> {
    let node = state
        .scheduler
        .allocator()
        .deregister_node(&NodeId::new(payload.node_id))
        .await?;
    Ok(Json(json!({ "status": "deregistered", "node_id": node.id })))
}

async fn list_nodes(State(state): State<AppState>) -> Json<Value> {
    let nodes = state.scheduler.allocator().nodes().await;
    Json(serde_json::to_value(nodes).unwrap_or(Value::Null))
}

async fn list_workers(State(state): State<AppState>) -> Json<Value> {
    let workers = state.scheduler.allocator().workers_available().await;
    let entries: Vec<Value> = workers
        .into_iter()
        .map(|(node_id, available)| {
            json!({ "node_id": node_id, "available": available })
        })
        .collect();
    Json(Value::Array(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use orch_alloc::Allocator;
    use orch_core::AuditStream;
    use tower::ServiceExt;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        }
    }

    fn test_router() -> (Router, Arc<Scheduler>) {
        let allocator = Arc::new(Allocator::new(AuditStream::default()));
        let scheduler = Arc::new(Scheduler::with_defaults(allocator));
        (router(AppState::new(scheduler.clone())), scheduler)
    }

    fn post_json(path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn node_payload(id: &str, gpus: usize) -> Value {
        json!({
            "id": id,
            "address": "10.0.0.1:9000",
            "accelerators": (0..gpus).map(|i| json!({
                "id": format!("gpu-{}", i),
                "type": "A100",
                "memory_gb": 80,
            })).collect::<Vec<_>>(),
            "total_memory_gb": 512,
            "total_cpus": 64,
        })
    }

    #[tokio::test]
    async fn test_health_reflects_tick() {
        let (app, scheduler) = test_router();

        let response = app.clone().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        scheduler.tick().await;
        let response = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_submit_tick_and_query_flow() {
        let (app, scheduler) = test_router();

        let response = app
            .clone()
            .oneshot(post_json("/nodes/register", node_payload("n1", 4)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let submit = json!({
            "name": "tune-7b",
            "tenant": "t1",
            "type": "lora_train",
            "priority": 1,
            "request": { "gpus": 2, "memory_gb": 64, "cpus": 8 },
        });
        let response = app.clone().oneshot(post_json("/jobs/submit", submit)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();

        scheduler.tick().await;

        let response = app
            .clone()
            .oneshot(get_req("/jobs?state=running"))
            .await
            .unwrap();
        let jobs = body_json(response).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
        assert_eq!(jobs[0]["id"], job_id.as_str());

        let response = app.clone().oneshot(get_req("/status")).await.unwrap();
        assert_eq!(body_json(response).await["used_gpus"], 2);

        // Completion callback releases the capacity
        let response = app
            .clone()
            .oneshot(post_json("/jobs/complete", json!({ "job_id": job_id })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get_req(&format!("/jobs/{}", job_id))).await.unwrap();
        assert_eq!(body_json(response).await["state"], "completed");

        let response = app.oneshot(get_req("/status")).await.unwrap();
        assert_eq!(body_json(response).await["used_gpus"], 0);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (app, scheduler) = test_router();
        app.clone()
            .oneshot(post_json("/nodes/register", node_payload("n1", 2)))
            .await
            .unwrap();

        let submit = json!({
            "tenant": "t1",
            "type": "eval",
            "request": { "gpus": 1 },
        });
        let response = app.clone().oneshot(post_json("/jobs/submit", submit)).await.unwrap();
        let job_id = body_json(response).await["job_id"].as_str().unwrap().to_string();
        scheduler.tick().await;

        let response = app
            .clone()
            .oneshot(post_json("/jobs/cancel", json!({ "job_id": job_id })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);

        let response = app.clone().oneshot(get_req(&format!("/jobs/{}", job_id))).await.unwrap();
        assert_eq!(body_json(response).await["state"], "cancelled");

        // A late completion callback is 404, and the state stands
        let response = app
            .clone()
            .oneshot(post_json("/jobs/complete", json!({ "job_id": job_id })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get_req("/status")).await.unwrap();
        assert_eq!(body_json(response).await["used_gpus"], 0);
    }

    #[tokio::test]
    async fn test_worker_dequeue_endpoint() {
        let (app, _scheduler) = test_router();
        app.clone()
            .oneshot(post_json("/nodes/register", node_payload("n1", 2)))
            .await
            .unwrap();

        // Nothing queued yet
        let body = json!({
            "worker_id": "n1",
            "available": { "gpus": 2, "memory_gb": 256, "cpus": 32 },
        });
        let response = app.clone().oneshot(post_json("/jobs/dequeue", body.clone())).await.unwrap();
        assert_eq!(body_json(response).await["job"], Value::Null);

        let submit = json!({
            "tenant": "t1",
            "type": "lora_train",
            "request": { "gpus": 1, "memory_gb": 32, "cpus": 4 },
        });
        app.clone().oneshot(post_json("/jobs/submit", submit)).await.unwrap();

        let response = app.clone().oneshot(post_json("/jobs/dequeue", body)).await.unwrap();
        let handed = body_json(response).await;
        assert_eq!(handed["job"]["state"], "running");
        assert_eq!(handed["job"]["allocation"]["node_id"], "n1");
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let (app, _scheduler) = test_router();

        // Unknown job
        let response = app.clone().oneshot(get_req("/jobs/ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("ghost"));

        // Unknown state filter
        let response = app.clone().oneshot(get_req("/jobs?state=bogus")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Zero-resource submission
        let submit = json!({ "tenant": "t1", "type": "eval", "request": {} });
        let response = app.clone().oneshot(post_json("/jobs/submit", submit)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Heartbeat for an unknown node
        let response = app
            .oneshot(post_json("/nodes/heartbeat", json!({ "node_id": "ghost" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_nodes_and_workers_listing() {
        let (app, _scheduler) = test_router();
        app.clone()
            .oneshot(post_json("/nodes/register", node_payload("n1", 2)))
            .await
            .unwrap();

        let response = app.clone().oneshot(get_req("/nodes")).await.unwrap();
        let nodes = body_json(response).await;
        assert_eq!(nodes.as_array().unwrap().len(), 1);
        assert_eq!(nodes[0]["healthy"], true);

        let response = app.clone().oneshot(get_req("/workers")).await.unwrap();
        let workers = body_json(response).await;
        assert_eq!(workers[0]["available"]["gpus"], 2);

        let response = app.oneshot(get_req("/stats")).await.unwrap();
        let stats = body_json(response).await;
        assert_eq!(stats["cluster"]["total_nodes"], 1);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, scheduler) = test_router();
        app.clone()
            .oneshot(post_json("/nodes/register", node_payload("n1", 2)))
            .await
            .unwrap();
        scheduler.tick().await;

        let response = app.oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("orchestrator_gpus_total 2"));
        assert!(text.contains("orchestrator_nodes_healthy 1"));
    }
}
