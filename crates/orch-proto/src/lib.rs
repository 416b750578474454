//! # orch-proto
//!
//! Protocol buffer definitions and generated gRPC bindings for the OpenLoRA
//! orchestrator.
//!
//! The `Orchestrator` service mirrors the HTTP surface: job submission and
//! lifecycle, worker pull, node registration, and cluster status. Both
//! surfaces delegate to the same in-process scheduler and allocator, so the
//! message shapes here are thin mirrors of the core types; the conversions
//! live in [`conversions`].

pub mod conversions;

// Generated protobuf code
pub mod orchestrator {
    pub mod v1 {
        tonic::include_proto!("openlora.orchestrator.v1");
    }
}

// Re-export commonly used types for convenience (both server and client)
pub use orchestrator::v1::{
    orchestrator_client::OrchestratorClient,
    orchestrator_server::{Orchestrator, OrchestratorServer},
    Accelerator, Allocation, AvailableResources, CancelJobRequest, CancelJobResponse,
    ClusterStatusRequest, ClusterStatusResponse, CompleteJobRequest, CompleteJobResponse,
    DequeueJobRequest, DequeueJobResponse, GetJobRequest, GetJobResponse, Job, JobState, JobType,
    ListJobsRequest, ListJobsResponse, Node, RegisterNodeRequest, RegisterNodeResponse,
    ResourceRequest, SubmitJobRequest, SubmitJobResponse,
};

/// Common error type for proto operations
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, ProtoError>;

/// Utility functions for working with protobuf timestamps
pub mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use prost_types::Timestamp;

    /// Convert a chrono timestamp to a protobuf Timestamp
    pub fn from_chrono(time: DateTime<Utc>) -> Timestamp {
        Timestamp {
            seconds: time.timestamp(),
            nanos: time.timestamp_subsec_nanos() as i32,
        }
    }

    /// Convert a protobuf Timestamp to a chrono timestamp
    pub fn to_chrono(timestamp: &Timestamp) -> DateTime<Utc> {
        Utc.timestamp_opt(timestamp.seconds, timestamp.nanos as u32)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Current time as a protobuf Timestamp
    pub fn now() -> Timestamp {
        from_chrono(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let proto_ts = timestamp::from_chrono(now);
        let back = timestamp::to_chrono(&proto_ts);
        assert_eq!(back.timestamp(), now.timestamp());
        assert_eq!(back.timestamp_subsec_nanos(), now.timestamp_subsec_nanos());
    }

    #[test]
    fn test_proto_creation() {
        let request = SubmitJobRequest {
            name: "tune-7b".to_string(),
            tenant: "t1".to_string(),
            r#type: JobType::LoraTrain as i32,
            priority: 2,
            resources: Some(ResourceRequest {
                gpus: 2,
                gpu_type: String::new(),
                memory_gb: 64,
                cpus: 8,
                max_wait_secs: 0,
            }),
            config_json: "{}".to_string(),
            max_retries: 1,
        };

        assert_eq!(request.tenant, "t1");
        assert_eq!(request.resources.as_ref().unwrap().gpus, 2);
    }
}
