//! Audit event emission
//!
//! The orchestrator emits structured events describing every state change
//! that matters to governance: job lifecycle transitions, allocation
//! create/release, node registration and health. Events carry a
//! monotonically increasing per-stream sequence number; hash-chaining of the
//! records is the audit sink's job, not ours.

use crate::types::{AllocationId, JobId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The kind of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    JobSubmitted,
    JobStarted,
    JobCompleted,
    JobFailed,
    JobCancelled,
    JobRetrying,
    AllocationCreated,
    AllocationReleased,
    NodeRegistered,
    NodeUnhealthy,
    NodeReaped,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditKind::JobSubmitted => "job_submitted",
            AuditKind::JobStarted => "job_started",
            AuditKind::JobCompleted => "job_completed",
            AuditKind::JobFailed => "job_failed",
            AuditKind::JobCancelled => "job_cancelled",
            AuditKind::JobRetrying => "job_retrying",
            AuditKind::AllocationCreated => "allocation_created",
            AuditKind::AllocationReleased => "allocation_released",
            AuditKind::NodeRegistered => "node_registered",
            AuditKind::NodeUnhealthy => "node_unhealthy",
            AuditKind::NodeReaped => "node_reaped",
        };
        write!(f, "{}", s)
    }
}

/// A single audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Per-stream sequence number, strictly increasing
    pub seq: u64,

    /// What happened
    pub kind: AuditKind,

    /// When it happened
    pub at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<AllocationId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

/// Destination for audit events
///
/// Emission is fire-and-forget: a slow or broken sink must never stall the
/// scheduler, so implementations should buffer or drop internally.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent);
}

/// Default sink that writes events to the tracing log
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, event: AuditEvent) {
        tracing::info!(
            seq = event.seq,
            kind = %event.kind,
            job_id = event.job_id.as_ref().map(|j| j.as_str()),
            node_id = event.node_id.as_ref().map(|n| n.as_str()),
            allocation_id = event.allocation_id.as_ref().map(|a| a.as_str()),
            tenant = event.tenant.as_deref(),
            detail = %event.detail,
            "audit"
        );
    }
}

/// Sink that retains events in memory, for tests
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out everything emitted so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, event: AuditEvent) {
        self.events.lock().expect("audit sink lock poisoned").push(event);
    }
}

/// An audit stream: stamps sequence numbers and forwards to the sink
///
/// One stream per orchestrator process. Cloning shares the counter, so all
/// emitters in the process observe a single monotonic sequence.
#[derive(Clone)]
pub struct AuditStream {
    seq: Arc<AtomicU64>,
    sink: Arc<dyn AuditSink>,
}

impl AuditStream {
    /// Create a stream backed by the given sink
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            seq: Arc::new(AtomicU64::new(0)),
            sink,
        }
    }

    /// Stamp and emit an event built by the closure
    pub async fn emit(&self, kind: AuditKind, build: impl FnOnce(&mut AuditEvent)) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut event = AuditEvent {
            seq,
            kind,
            at: Utc::now(),
            job_id: None,
            node_id: None,
            allocation_id: None,
            tenant: None,
            detail: String::new(),
        };
        build(&mut event);
        self.sink.emit(event).await;
    }

    /// The sequence number of the most recently emitted event
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

impl Default for AuditStream {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl fmt::Debug for AuditStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditStream").field("seq", &self.last_seq()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_numbers_are_monotonic() {
        let sink = Arc::new(MemoryAuditSink::new());
        let stream = AuditStream::new(sink.clone());

        for _ in 0..5 {
            stream.emit(AuditKind::JobSubmitted, |_| {}).await;
        }

        let events = sink.events();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.seq, i as u64 + 1);
        }
        assert_eq!(stream.last_seq(), 5);
    }

    #[tokio::test]
    async fn test_clones_share_the_stream() {
        let sink = Arc::new(MemoryAuditSink::new());
        let stream = AuditStream::new(sink.clone());
        let other = stream.clone();

        stream.emit(AuditKind::NodeRegistered, |_| {}).await;
        other.emit(AuditKind::NodeUnhealthy, |_| {}).await;

        let seqs: Vec<u64> = sink.events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_event_fields() {
        let sink = Arc::new(MemoryAuditSink::new());
        let stream = AuditStream::new(sink.clone());

        stream
            .emit(AuditKind::AllocationCreated, |e| {
                e.job_id = Some(JobId::new("j1"));
                e.node_id = Some(NodeId::new("n1"));
                e.tenant = Some("t1".to_string());
                e.detail = "2 gpus".to_string();
            })
            .await;

        let events = sink.events();
        assert_eq!(events[0].kind, AuditKind::AllocationCreated);
        assert_eq!(events[0].job_id, Some(JobId::new("j1")));
        assert_eq!(events[0].detail, "2 gpus");
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&AuditKind::AllocationReleased).unwrap();
        assert_eq!(json, "\"allocation_released\"");
    }
}
