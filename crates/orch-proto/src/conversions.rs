//! Conversions between orch-core types and protobuf types
//!
//! This module provides bidirectional conversions between the rich types
//! defined in orch-core and the protobuf message types used on the wire.
//! Optional proto fields follow the proto3 convention: empty string or zero
//! means unset.

use crate::{orchestrator::v1 as proto, timestamp, ProtoError};
use orch_core as core;

// Conversions for JobState
impl From<core::JobState> for proto::JobState {
    fn from(state: core::JobState) -> Self {
        match state {
            core::JobState::Queued => proto::JobState::Queued,
            core::JobState::Running => proto::JobState::Running,
            core::JobState::Completed => proto::JobState::Completed,
            core::JobState::Failed => proto::JobState::Failed,
            core::JobState::Cancelled => proto::JobState::Cancelled,
            core::JobState::Retrying => proto::JobState::Retrying,
        }
    }
}

impl TryFrom<proto::JobState> for core::JobState {
    type Error = ProtoError;

    fn try_from(state: proto::JobState) -> Result<Self, Self::Error> {
        match state {
            proto::JobState::Queued => Ok(core::JobState::Queued),
            proto::JobState::Running => Ok(core::JobState::Running),
            proto::JobState::Completed => Ok(core::JobState::Completed),
            proto::JobState::Failed => Ok(core::JobState::Failed),
            proto::JobState::Cancelled => Ok(core::JobState::Cancelled),
            proto::JobState::Retrying => Ok(core::JobState::Retrying),
            proto::JobState::Unspecified => {
                Err(ProtoError::InvalidData("Unspecified job state".to_string()))
            }
        }
    }
}

// Conversions for JobType
impl From<core::JobType> for proto::JobType {
    fn from(kind: core::JobType) -> Self {
        match kind {
            core::JobType::LoraTrain => proto::JobType::LoraTrain,
            core::JobType::RlTrain => proto::JobType::RlTrain,
            core::JobType::Eval => proto::JobType::Eval,
            core::JobType::Inference => proto::JobType::Inference,
        }
    }
}

impl TryFrom<proto::JobType> for core::JobType {
    type Error = ProtoError;

    fn try_from(kind: proto::JobType) -> Result<Self, Self::Error> {
        match kind {
            proto::JobType::LoraTrain => Ok(core::JobType::LoraTrain),
            proto::JobType::RlTrain => Ok(core::JobType::RlTrain),
            proto::JobType::Eval => Ok(core::JobType::Eval),
            proto::JobType::Inference => Ok(core::JobType::Inference),
            proto::JobType::Unspecified => {
                Err(ProtoError::InvalidData("Unspecified job type".to_string()))
            }
        }
    }
}

// Conversions for ResourceRequest
impl From<core::ResourceRequest> for proto::ResourceRequest {
    fn from(request: core::ResourceRequest) -> Self {
        Self {
            gpus: request.gpus,
            gpu_type: request.gpu_type.map(|t| t.to_string()).unwrap_or_default(),
            memory_gb: request.memory_gb,
            cpus: request.cpus,
            max_wait_secs: request.max_wait_secs.unwrap_or(0),
        }
    }
}

impl From<proto::ResourceRequest> for core::ResourceRequest {
    fn from(proto: proto::ResourceRequest) -> Self {
        Self {
            gpus: proto.gpus,
            gpu_type: if proto.gpu_type.is_empty() {
                None
            } else {
                Some(core::AcceleratorType::from(proto.gpu_type))
            },
            memory_gb: proto.memory_gb,
            cpus: proto.cpus,
            max_wait_secs: if proto.max_wait_secs == 0 {
                None
            } else {
                Some(proto.max_wait_secs)
            },
        }
    }
}

// Conversions for AvailableResources
impl From<proto::AvailableResources> for core::AvailableResources {
    fn from(proto: proto::AvailableResources) -> Self {
        Self {
            gpus: proto.gpus,
            memory_gb: proto.memory_gb,
            cpus: proto.cpus,
        }
    }
}

// Conversions for Allocation
impl From<core::Allocation> for proto::Allocation {
    fn from(allocation: core::Allocation) -> Self {
        Self {
            id: allocation.id.to_string(),
            job_id: allocation.job_id.to_string(),
            tenant: allocation.tenant,
            node_id: allocation.node_id.to_string(),
            accelerator_ids: allocation.accelerator_ids,
            memory_gb: allocation.memory_gb,
            cpus: allocation.cpus,
            created_at: Some(timestamp::from_chrono(allocation.created_at)),
        }
    }
}

// Conversions for Job
impl From<core::Job> for proto::Job {
    fn from(job: core::Job) -> Self {
        Self {
            id: job.id.to_string(),
            tenant: job.tenant,
            name: job.name,
            r#type: proto::JobType::from(job.kind) as i32,
            state: proto::JobState::from(job.state) as i32,
            priority: job.priority,
            request: Some(job.request.into()),
            config_json: if job.config.is_null() {
                String::new()
            } else {
                job.config.to_string()
            },
            allocation: job.allocation.map(Into::into),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: Some(timestamp::from_chrono(job.created_at)),
            started_at: job.started_at.map(timestamp::from_chrono),
            completed_at: job.completed_at.map(timestamp::from_chrono),
            error: job.error.unwrap_or_default(),
        }
    }
}

// Conversions for node registration
impl TryFrom<proto::Node> for core::Node {
    type Error = ProtoError;

    fn try_from(proto: proto::Node) -> Result<Self, Self::Error> {
        if proto.id.is_empty() {
            return Err(ProtoError::InvalidData("Missing node id".to_string()));
        }
        let node_id = core::NodeId::new(proto.id);

        let accelerators = proto
            .accelerators
            .into_iter()
            .map(|a| core::Accelerator {
                id: a.id,
                node_id: node_id.clone(),
                kind: core::AcceleratorType::from(a.r#type),
                memory_gb: a.memory_gb,
                allocated: a.allocated,
                job_id: if a.job_id.is_empty() {
                    None
                } else {
                    Some(core::JobId::new(a.job_id))
                },
                allocated_at: None,
            })
            .collect();

        Ok(Self {
            id: node_id,
            address: proto.address,
            accelerators,
            total_memory_gb: proto.total_memory_gb,
            used_memory_gb: proto.used_memory_gb,
            total_cpus: proto.total_cpus,
            used_cpus: proto.used_cpus,
            healthy: proto.healthy,
            last_heartbeat: proto
                .last_heartbeat
                .map(|ts| timestamp::to_chrono(&ts))
                .unwrap_or_else(chrono::Utc::now),
            unhealthy_since: None,
        })
    }
}

// Conversions for SubmitJobRequest
impl TryFrom<proto::SubmitJobRequest> for core::JobSpec {
    type Error = ProtoError;

    fn try_from(request: proto::SubmitJobRequest) -> Result<Self, Self::Error> {
        let kind = proto::JobType::try_from(request.r#type)
            .map_err(|_| ProtoError::InvalidData(format!("Unknown job type: {}", request.r#type)))?
            .try_into()?;

        let config = if request.config_json.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&request.config_json)?
        };

        Ok(Self {
            name: request.name,
            tenant: request.tenant,
            kind,
            priority: request.priority,
            request: request.resources.map(Into::into).unwrap_or_default(),
            config,
            max_retries: request.max_retries,
        })
    }
}

// Conversions for ClusterStatus
impl From<core::ClusterStatus> for proto::ClusterStatusResponse {
    fn from(status: core::ClusterStatus) -> Self {
        Self {
            total_nodes: status.total_nodes as u32,
            healthy_nodes: status.healthy_nodes as u32,
            total_gpus: status.total_gpus as u32,
            used_gpus: status.used_gpus as u32,
            gpu_utilization: status.gpu_utilization,
            allocations: status.allocations as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_job_state_round_trip() {
        for state in [
            core::JobState::Queued,
            core::JobState::Running,
            core::JobState::Completed,
            core::JobState::Failed,
            core::JobState::Cancelled,
            core::JobState::Retrying,
        ] {
            let proto_state = proto::JobState::from(state);
            let back: core::JobState = proto_state.try_into().unwrap();
            assert_eq!(back, state);
        }

        assert!(core::JobState::try_from(proto::JobState::Unspecified).is_err());
    }

    #[test]
    fn test_resource_request_optionals() {
        let empty_type = proto::ResourceRequest {
            gpus: 2,
            gpu_type: String::new(),
            memory_gb: 64,
            cpus: 8,
            max_wait_secs: 0,
        };
        let request = core::ResourceRequest::from(empty_type);
        assert!(request.gpu_type.is_none());
        assert!(request.max_wait_secs.is_none());

        let typed = proto::ResourceRequest {
            gpus: 1,
            gpu_type: "H100".to_string(),
            memory_gb: 32,
            cpus: 4,
            max_wait_secs: 120,
        };
        let request = core::ResourceRequest::from(typed);
        assert_eq!(request.gpu_type, Some(core::AcceleratorType::H100));
        assert_eq!(request.max_wait_secs, Some(120));
    }

    #[test]
    fn test_submit_request_to_spec() {
        let request = proto::SubmitJobRequest {
            name: "tune".to_string(),
            tenant: "t1".to_string(),
            r#type: proto::JobType::LoraTrain as i32,
            priority: 2,
            resources: Some(proto::ResourceRequest {
                gpus: 2,
                gpu_type: String::new(),
                memory_gb: 64,
                cpus: 8,
                max_wait_secs: 0,
            }),
            config_json: r#"{"base_model":"llama-7b"}"#.to_string(),
            max_retries: 1,
        };

        let spec = core::JobSpec::try_from(request).unwrap();
        assert_eq!(spec.kind, core::JobType::LoraTrain);
        assert_eq!(spec.request.gpus, 2);
        assert_eq!(spec.config["base_model"], "llama-7b");

        let bad_json = proto::SubmitJobRequest {
            name: String::new(),
            tenant: "t1".to_string(),
            r#type: proto::JobType::Eval as i32,
            priority: 0,
            resources: None,
            config_json: "{not json".to_string(),
            max_retries: 0,
        };
        assert!(core::JobSpec::try_from(bad_json).is_err());
    }

    #[test]
    fn test_job_to_proto() {
        let job = core::Job {
            id: core::JobId::new("j1"),
            tenant: "t1".to_string(),
            name: "tune".to_string(),
            kind: core::JobType::LoraTrain,
            state: core::JobState::Running,
            priority: 2,
            request: core::ResourceRequest { gpus: 1, ..Default::default() },
            config: serde_json::Value::Null,
            allocation: Some(core::Allocation {
                id: core::AllocationId::new("a1"),
                job_id: core::JobId::new("j1"),
                tenant: "t1".to_string(),
                node_id: core::NodeId::new("n1"),
                accelerator_ids: vec!["gpu-0".to_string()],
                memory_gb: 0,
                cpus: 0,
                created_at: Utc::now(),
            }),
            retry_count: 0,
            max_retries: 0,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            error: None,
        };

        let proto_job = proto::Job::from(job);
        assert_eq!(proto_job.state, proto::JobState::Running as i32);
        assert_eq!(proto_job.allocation.as_ref().unwrap().node_id, "n1");
        assert!(proto_job.completed_at.is_none());
        assert!(proto_job.config_json.is_empty());
    }

    #[test]
    fn test_node_registration_requires_id() {
        let missing = proto::Node {
            id: String::new(),
            address: "10.0.0.1:9000".to_string(),
            accelerators: vec![],
            total_memory_gb: 0,
            used_memory_gb: 0,
            total_cpus: 0,
            used_cpus: 0,
            healthy: false,
            last_heartbeat: None,
        };
        assert!(core::Node::try_from(missing).is_err());

        let node = proto::Node {
            id: "n1".to_string(),
            address: "10.0.0.1:9000".to_string(),
            accelerators: vec![proto::Accelerator {
                id: "gpu-0".to_string(),
                r#type: "A100".to_string(),
                memory_gb: 80,
                allocated: false,
                job_id: String::new(),
            }],
            total_memory_gb: 512,
            used_memory_gb: 0,
            total_cpus: 64,
            used_cpus: 0,
            healthy: false,
            last_heartbeat: None,
        };
        let core_node = core::Node::try_from(node).unwrap();
        assert_eq!(core_node.accelerators[0].node_id, core::NodeId::new("n1"));
        assert_eq!(core_node.accelerators[0].kind, core::AcceleratorType::A100);
    }
}
