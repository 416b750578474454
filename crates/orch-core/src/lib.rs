//! # orch-core
//!
//! Core types, traits, and utilities for the OpenLoRA resource orchestrator.
//!
//! This crate provides the foundational data structures and interfaces shared
//! across the orchestrator components:
//!
//! - Identifiers and tagged enumerations for jobs, nodes, and accelerators
//! - The resource request / allocation / quota data model
//! - A unified error type with HTTP status mapping
//! - Audit event emission with per-stream sequence numbers
//! - The admission policy hook consulted before a job is accepted

pub mod audit;
pub mod error;
pub mod policy;
pub mod types;

// Re-export commonly used types at the crate root
pub use audit::{AuditEvent, AuditKind, AuditSink, AuditStream, TracingAuditSink};
pub use error::{Error, Result};
pub use policy::{AllowAll, PolicyDecision, PolicyEvaluator};
pub use types::{
    Accelerator, AcceleratorType, Allocation, AllocationId, AvailableResources, ClusterStatus,
    Job, JobId, JobSpec, JobState, JobType, Node, NodeId, Quota, ResourceRequest,
};
