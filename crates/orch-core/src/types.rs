//! Core type definitions for the orchestrator
//!
//! These structures model the accelerator fleet (nodes, accelerators), the
//! demand side (resource requests, jobs), and the bookkeeping between them
//! (allocations, quotas). They are mutated only by the allocator and the
//! scheduler; everything here is plain data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a compute node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new NodeId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string representation of the NodeId
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Create a new JobId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random JobId
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation of the JobId
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id is empty (unassigned)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Unique identifier for an allocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationId(String);

impl AllocationId {
    /// Create a new AllocationId from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random AllocationId
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation of the AllocationId
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AllocationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AllocationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle state of a job
///
/// Terminal states are `Completed`, `Failed`, and `Cancelled`; a job never
/// transitions out of a terminal state. `Retrying` shares the queue with
/// `Queued` and only records that the job has failed at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl JobState {
    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Whether a job in this state lives in the scheduling queue
    pub fn is_queued(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Retrying)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            "retrying" => Ok(JobState::Retrying),
            _ => Err(format!("Unknown job state: {}", s)),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Retrying => write!(f, "retrying"),
        }
    }
}

/// The kind of work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    LoraTrain,
    RlTrain,
    Eval,
    Inference,
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lora_train" => Ok(JobType::LoraTrain),
            "rl_train" => Ok(JobType::RlTrain),
            "eval" => Ok(JobType::Eval),
            "inference" => Ok(JobType::Inference),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::LoraTrain => write!(f, "lora_train"),
            JobType::RlTrain => write!(f, "rl_train"),
            JobType::Eval => write!(f, "eval"),
            JobType::Inference => write!(f, "inference"),
        }
    }
}

/// Well-known job priority levels
///
/// Priorities are plain integers; these are the conventional levels.
pub mod priority {
    pub const LOW: i32 = 0;
    pub const NORMAL: i32 = 1;
    pub const HIGH: i32 = 2;
    pub const CRITICAL: i32 = 3;
}

/// Accelerator hardware type
///
/// The set is open: unknown tags round-trip through `Other` rather than
/// failing to parse, so new hardware can join the fleet without a code
/// change on the orchestrator side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AcceleratorType {
    A100,
    H100,
    L40s,
    TpuV4,
    Other(String),
}

impl From<String> for AcceleratorType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "A100" => AcceleratorType::A100,
            "H100" => AcceleratorType::H100,
            "L40S" => AcceleratorType::L40s,
            "TPU-v4" => AcceleratorType::TpuV4,
            _ => AcceleratorType::Other(s),
        }
    }
}

impl From<&str> for AcceleratorType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<AcceleratorType> for String {
    fn from(t: AcceleratorType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for AcceleratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceleratorType::A100 => write!(f, "A100"),
            AcceleratorType::H100 => write!(f, "H100"),
            AcceleratorType::L40s => write!(f, "L40S"),
            AcceleratorType::TpuV4 => write!(f, "TPU-v4"),
            AcceleratorType::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A discrete compute device (GPU or TPU) addressable as one allocation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accelerator {
    /// Device identifier, unique within the owning node
    pub id: String,

    /// Node that owns this device
    pub node_id: NodeId,

    /// Hardware type tag
    #[serde(rename = "type")]
    pub kind: AcceleratorType,

    /// Device memory in GB
    pub memory_gb: u64,

    /// Whether the device is currently held by a live allocation
    #[serde(default)]
    pub allocated: bool,

    /// Job holding the device; only meaningful while `allocated`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// When the device was last claimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_at: Option<DateTime<Utc>>,
}

impl Accelerator {
    /// Whether this device can satisfy a request for the given type filter
    pub fn matches(&self, filter: Option<&AcceleratorType>) -> bool {
        !self.allocated && filter.map_or(true, |t| &self.kind == t)
    }
}

/// A compute node and its resource pools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier
    pub id: NodeId,

    /// Network address of the node agent
    pub address: String,

    /// Accelerators hosted by this node, sorted by id
    pub accelerators: Vec<Accelerator>,

    /// Total host memory pool in GB
    pub total_memory_gb: u64,

    /// Host memory charged to live allocations
    #[serde(default)]
    pub used_memory_gb: u64,

    /// Total CPU pool
    pub total_cpus: u32,

    /// CPUs charged to live allocations
    #[serde(default)]
    pub used_cpus: u32,

    /// Whether the node is eligible for new placements
    #[serde(default)]
    pub healthy: bool,

    /// Last heartbeat received from the node agent
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,

    /// When the node was marked unhealthy; cleared on recovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_since: Option<DateTime<Utc>>,
}

impl Node {
    /// Free host memory in GB
    pub fn free_memory_gb(&self) -> u64 {
        self.total_memory_gb.saturating_sub(self.used_memory_gb)
    }

    /// Free CPUs
    pub fn free_cpus(&self) -> u32 {
        self.total_cpus.saturating_sub(self.used_cpus)
    }

    /// Count of unallocated accelerators matching the given type filter
    pub fn free_accelerators(&self, filter: Option<&AcceleratorType>) -> usize {
        self.accelerators.iter().filter(|a| a.matches(filter)).count()
    }

    /// Free resources on this node, for worker reporting
    pub fn available(&self) -> AvailableResources {
        AvailableResources {
            gpus: self.free_accelerators(None) as u32,
            memory_gb: self.free_memory_gb(),
            cpus: self.free_cpus(),
        }
    }
}

/// Resource requirements for a job
///
/// Immutable value object; validated once at submission.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Number of accelerators required
    #[serde(default)]
    pub gpus: u32,

    /// Restrict placement to this accelerator type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<AcceleratorType>,

    /// Host memory in GB
    #[serde(default)]
    pub memory_gb: u64,

    /// CPUs
    #[serde(default)]
    pub cpus: u32,

    /// Queued-phase deadline in seconds; unset means wait forever
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_secs: Option<u64>,
}

impl ResourceRequest {
    /// Reject requests that ask for nothing at all
    pub fn validate(&self) -> crate::Result<()> {
        if self.gpus == 0 && self.memory_gb == 0 {
            return Err(crate::Error::invalid_request(
                "resource request must ask for at least one gpu or some memory",
            ));
        }
        Ok(())
    }

    /// Whether this request fits inside a declared capacity
    pub fn fits_within(&self, available: &AvailableResources) -> bool {
        self.gpus <= available.gpus
            && self.memory_gb <= available.memory_gb
            && self.cpus <= available.cpus
    }
}

/// Free resources, as declared by a pulling worker or reported per node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailableResources {
    #[serde(default)]
    pub gpus: u32,
    #[serde(default)]
    pub memory_gb: u64,
    #[serde(default)]
    pub cpus: u32,
}

/// A concrete reservation of resources on one node for one job
///
/// Created by the allocator on success, destroyed by release, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Allocation identifier
    pub id: AllocationId,

    /// Job the reservation belongs to
    pub job_id: JobId,

    /// Tenant charged for the reservation
    pub tenant: String,

    /// Node the resources live on
    pub node_id: NodeId,

    /// Claimed accelerator ids
    pub accelerator_ids: Vec<String>,

    /// Host memory charged in GB
    pub memory_gb: u64,

    /// CPUs charged
    pub cpus: u32,

    /// When the reservation was made
    pub created_at: DateTime<Utc>,
}

/// Per-tenant cap on simultaneously allocated resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    /// Tenant the quota applies to
    pub tenant: String,

    /// Maximum accelerators held at once
    pub max_gpus: u32,

    /// Maximum memory held at once, in GB
    pub max_memory_gb: u64,

    /// Accelerators currently held by live allocations
    #[serde(default)]
    pub used_gpus: u32,

    /// Memory currently held by live allocations, in GB
    #[serde(default)]
    pub used_memory_gb: u64,
}

impl Quota {
    /// Create a quota with zero usage
    pub fn new(tenant: impl Into<String>, max_gpus: u32, max_memory_gb: u64) -> Self {
        Self {
            tenant: tenant.into(),
            max_gpus,
            max_memory_gb,
            used_gpus: 0,
            used_memory_gb: 0,
        }
    }

    /// Whether granting the request would push usage over the cap
    pub fn would_exceed(&self, request: &ResourceRequest) -> bool {
        self.used_gpus + request.gpus > self.max_gpus
            || self.used_memory_gb + request.memory_gb > self.max_memory_gb
    }

    /// Whether the request exceeds the cap even from zero usage
    pub fn exceeds_maximum(&self, request: &ResourceRequest) -> bool {
        request.gpus > self.max_gpus || request.memory_gb > self.max_memory_gb
    }
}

/// The payload a client submits to create a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Owning tenant
    pub tenant: String,

    /// Kind of work
    #[serde(rename = "type")]
    pub kind: JobType,

    /// Priority; higher schedules first
    #[serde(default)]
    pub priority: i32,

    /// Resource requirements
    #[serde(default)]
    pub request: ResourceRequest,

    /// Free-form job configuration, passed through to the worker
    #[serde(default)]
    pub config: serde_json::Value,

    /// Failure retries before the job is declared failed
    #[serde(default)]
    pub max_retries: u32,
}

/// A job and its full lifecycle record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier
    pub id: JobId,

    /// Owning tenant
    pub tenant: String,

    /// Display name
    pub name: String,

    /// Kind of work
    #[serde(rename = "type")]
    pub kind: JobType,

    /// Lifecycle state
    pub state: JobState,

    /// Priority; higher schedules first
    pub priority: i32,

    /// Resource requirements
    pub request: ResourceRequest,

    /// Free-form job configuration
    #[serde(default)]
    pub config: serde_json::Value,

    /// Live reservation; present exactly while `state == Running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation: Option<Allocation>,

    /// Failures so far
    #[serde(default)]
    pub retry_count: u32,

    /// Failure retries before the job is declared failed
    #[serde(default)]
    pub max_retries: u32,

    /// Submission time; also the priority tie-break
    pub created_at: DateTime<Utc>,

    /// Latest start time; rewritten on retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal transition time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Why the job failed, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Build a queued job from a submission payload
    pub fn from_spec(spec: JobSpec) -> Self {
        Self {
            id: JobId::generate(),
            tenant: spec.tenant,
            name: spec.name,
            kind: spec.kind,
            state: JobState::Queued,
            priority: spec.priority,
            request: spec.request,
            config: spec.config,
            allocation: None,
            retry_count: 0,
            max_retries: spec.max_retries,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Aggregated cluster snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub total_gpus: usize,
    pub used_gpus: usize,
    pub gpu_utilization: f64,
    pub allocations: usize,
}
