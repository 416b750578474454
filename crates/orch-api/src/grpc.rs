//! gRPC control surface
//!
//! Implements the `Orchestrator` service from orch-proto with the same
//! semantics as the HTTP surface; both delegate to the same scheduler.

use orch_core::{AvailableResources, Error, JobId, JobSpec, JobState, Node, NodeId};
use orch_proto::orchestrator::v1 as proto;
use orch_proto::Orchestrator;
use orch_sched::Scheduler;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::debug;

/// The Orchestrator gRPC service
#[derive(Clone)]
pub struct OrchestratorService {
    scheduler: Arc<Scheduler>,
}

impl OrchestratorService {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Wrap the service for mounting on a tonic server.
    pub fn into_server(self) -> orch_proto::OrchestratorServer<Self> {
        orch_proto::OrchestratorServer::new(self)
    }
}

/// Map core errors onto gRPC status codes
fn to_status(err: Error) -> Status {
    let message = err.to_string();
    match err {
        Error::InvalidRequest(_) | Error::InvalidConfiguration(_) => {
            Status::invalid_argument(message)
        }
        Error::NotFound(_) => Status::not_found(message),
        Error::QuotaExceeded(_) => Status::resource_exhausted(message),
        Error::PermissionDenied(_) => Status::permission_denied(message),
        Error::Conflict(_) => Status::already_exists(message),
        Error::DeadlineExceeded(_) => Status::deadline_exceeded(message),
        Error::Unavailable(_) => Status::unavailable(message),
        _ => Status::internal(message),
    }
}

#[tonic::async_trait]
impl Orchestrator for OrchestratorService {
    async fn submit_job(
        &self,
        request: Request<proto::SubmitJobRequest>,
    ) -> std::result::Result<Response<proto::SubmitJobResponse>, Status> {
        let req = request.into_inner();
        debug!(tenant = %req.tenant, "received SubmitJob");

        let spec = JobSpec::try_from(req)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let job_id = self.scheduler.submit(spec).await.map_err(to_status)?;

        Ok(Response::new(proto::SubmitJobResponse {
            job_id: job_id.to_string(),
        }))
    }

    async fn get_job(
        &self,
        request: Request<proto::GetJobRequest>,
    ) -> std::result::Result<Response<proto::GetJobResponse>, Status> {
        let req = request.into_inner();
        let job = self
            .scheduler
            .get(&JobId::new(req.job_id))
            .await
            .map_err(to_status)?;

        Ok(Response::new(proto::GetJobResponse {
            job: Some(job.into()),
        }))
    }

    async fn list_jobs(
        &self,
        request: Request<proto::ListJobsRequest>,
    ) -> std::result::Result<Response<proto::ListJobsResponse>, Status> {
        let req = request.into_inner();
        let filter = if req.state.is_empty() {
            None
        } else {
            Some(
                req.state
                    .parse::<JobState>()
                    .map_err(Status::invalid_argument)?,
            )
        };

        let jobs = self.scheduler.list(filter).await;
        Ok(Response::new(proto::ListJobsResponse {
            jobs: jobs.into_iter().map(Into::into).collect(),
        }))
    }

    async fn cancel_job(
        &self,
        request: Request<proto::CancelJobRequest>,
    ) -> std::result::Result<Response<proto::CancelJobResponse>, Status> {
        let req = request.into_inner();
        self.scheduler
            .cancel(&JobId::new(req.job_id))
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::CancelJobResponse { success: true }))
    }

    async fn complete_job(
        &self,
        request: Request<proto::CompleteJobRequest>,
    ) -> std::result::Result<Response<proto::CompleteJobResponse>, Status> {
        let req = request.into_inner();
        let outcome = if req.error.is_empty() {
            None
        } else {
            Some(req.error)
        };
        self.scheduler
            .complete(&JobId::new(req.job_id), outcome)
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::CompleteJobResponse { success: true }))
    }

    async fn dequeue_job(
        &self,
        request: Request<proto::DequeueJobRequest>,
    ) -> std::result::Result<Response<proto::DequeueJobResponse>, Status> {
        let req = request.into_inner();
        if req.worker_id.is_empty() {
            return Err(Status::invalid_argument("worker_id is required"));
        }
        let available: AvailableResources = req.available.map(Into::into).unwrap_or_default();

        let job = self
            .scheduler
            .dequeue(&NodeId::new(req.worker_id), &available)
            .await
            .map_err(to_status)?;

        Ok(Response::new(proto::DequeueJobResponse {
            job: job.map(Into::into),
        }))
    }

    async fn register_node(
        &self,
        request: Request<proto::RegisterNodeRequest>,
    ) -> std::result::Result<Response<proto::RegisterNodeResponse>, Status> {
        let req = request.into_inner();
        let node_proto = req
            .node
            .ok_or_else(|| Status::invalid_argument("node is required"))?;
        let node =
            Node::try_from(node_proto).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let node_id = node.id.to_string();

        let created = self.scheduler.allocator().register_node(node).await;
        Ok(Response::new(proto::RegisterNodeResponse {
            node_id,
            created,
        }))
    }

    async fn get_cluster_status(
        &self,
        _request: Request<proto::ClusterStatusRequest>,
    ) -> std::result::Result<Response<proto::ClusterStatusResponse>, Status> {
        let status = self.scheduler.allocator().cluster_status().await;
        Ok(Response::new(status.into()))
    }
}
