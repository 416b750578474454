//! Checkpoint hook
//!
//! The orchestrator is an in-memory authoritative scheduler; the checkpoint
//! is an optional extension point, not a database. The whole state — job
//! registry, live-allocation map, inventory, quotas — is serialized as one
//! JSON document. On boot, a checkpoint younger than the configured window
//! is replayed before the listeners open; anything older is ignored as
//! stale.

use chrono::{DateTime, Duration, Utc};
use orch_core::{Allocation, Job, Node, Quota};
use orch_sched::Scheduler;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// A point-in-time snapshot of the orchestrator state
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,

    pub nodes: Vec<Node>,
    pub quotas: Vec<Quota>,
    pub allocations: Vec<Allocation>,
    pub jobs: Vec<Job>,
}

impl Checkpoint {
    /// Capture the current scheduler and allocator state
    pub async fn capture(scheduler: &Scheduler) -> Self {
        let (nodes, quotas, allocations) = scheduler.allocator().export().await;
        let jobs = scheduler.export().await;
        Self {
            saved_at: Utc::now(),
            nodes,
            quotas,
            allocations,
            jobs,
        }
    }

    /// Replay this checkpoint into the scheduler and allocator
    pub async fn restore_into(self, scheduler: &Scheduler) {
        info!(
            saved_at = %self.saved_at,
            jobs = self.jobs.len(),
            nodes = self.nodes.len(),
            allocations = self.allocations.len(),
            "replaying checkpoint"
        );
        scheduler
            .allocator()
            .restore(self.nodes, self.quotas, self.allocations)
            .await;
        scheduler.restore(self.jobs).await;
    }

    /// Whether this checkpoint is recent enough to replay
    pub fn is_fresh(&self, max_age_secs: i64) -> bool {
        Utc::now() - self.saved_at <= Duration::seconds(max_age_secs)
    }

    /// Write the checkpoint atomically: temp file in the same directory,
    /// then rename over the target.
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(self)?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load a checkpoint if the file exists; a missing file is not an error.
    pub fn load(path: &Path) -> crate::Result<Option<Self>> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint = serde_json::from_slice(&content)?;
        Ok(Some(checkpoint))
    }

    /// Load and replay a fresh checkpoint; stale or missing files are
    /// skipped with a log line rather than failing boot.
    pub async fn maybe_restore(
        path: &Path,
        max_age_secs: i64,
        scheduler: &Scheduler,
    ) -> crate::Result<bool> {
        match Self::load(path)? {
            Some(checkpoint) if checkpoint.is_fresh(max_age_secs) => {
                checkpoint.restore_into(scheduler).await;
                Ok(true)
            }
            Some(checkpoint) => {
                warn!(
                    saved_at = %checkpoint.saved_at,
                    "checkpoint is stale, starting empty"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_alloc::Allocator;
    use orch_core::{
        Accelerator, AcceleratorType, AuditStream, JobSpec, JobState, JobType, NodeId,
        ResourceRequest,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    fn node(id: &str, gpus: usize) -> Node {
        Node {
            id: NodeId::new(id),
            address: "10.0.0.1:9000".to_string(),
            accelerators: (0..gpus)
                .map(|i| Accelerator {
                    id: format!("gpu-{}", i),
                    node_id: NodeId::new(id),
                    kind: AcceleratorType::A100,
                    memory_gb: 80,
                    allocated: false,
                    job_id: None,
                    allocated_at: None,
                })
                .collect(),
            total_memory_gb: 512,
            used_memory_gb: 0,
            total_cpus: 64,
            used_cpus: 0,
            healthy: false,
            last_heartbeat: Utc::now(),
            unhealthy_since: None,
        }
    }

    fn scheduler() -> Arc<Scheduler> {
        let allocator = Arc::new(Allocator::new(AuditStream::default()));
        Arc::new(Scheduler::with_defaults(allocator))
    }

    async fn populated_scheduler() -> Arc<Scheduler> {
        let sched = scheduler();
        sched.allocator().register_node(node("n1", 2)).await;
        sched
            .submit(JobSpec {
                name: "tune".to_string(),
                tenant: "t1".to_string(),
                kind: JobType::LoraTrain,
                priority: 1,
                request: ResourceRequest { gpus: 1, memory_gb: 32, cpus: 4, ..Default::default() },
                config: serde_json::Value::Null,
                max_retries: 0,
            })
            .await
            .unwrap();
        sched.tick().await;
        sched
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.json");

        let sched = populated_scheduler().await;
        let checkpoint = Checkpoint::capture(&sched).await;
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.nodes.len(), 1);
        assert_eq!(loaded.allocations.len(), 1);
        assert!(loaded.is_fresh(60));
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.json");
        assert!(Checkpoint::load(&path).unwrap().is_none());

        let sched = scheduler();
        let restored = Checkpoint::maybe_restore(&path, 60, &sched).await.unwrap();
        assert!(!restored);
    }

    #[tokio::test]
    async fn test_restore_resumes_scheduling() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.json");

        let original = populated_scheduler().await;
        let running = original.list(Some(JobState::Running)).await;
        assert_eq!(running.len(), 1);
        Checkpoint::capture(&original).await.save(&path).unwrap();

        let replacement = scheduler();
        let restored = Checkpoint::maybe_restore(&path, 60, &replacement).await.unwrap();
        assert!(restored);

        let job = &replacement.list(Some(JobState::Running)).await[0];
        assert_eq!(job.id, running[0].id);
        replacement.allocator().verify_invariants().await.unwrap();

        // Completing the restored job frees the restored allocation
        replacement.complete(&job.id, None).await.unwrap();
        assert_eq!(replacement.allocator().cluster_status().await.used_gpus, 0);
    }

    #[tokio::test]
    async fn test_stale_checkpoint_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.json");

        let sched = populated_scheduler().await;
        let mut checkpoint = Checkpoint::capture(&sched).await;
        checkpoint.saved_at = Utc::now() - Duration::seconds(120);
        checkpoint.save(&path).unwrap();

        let replacement = scheduler();
        let restored = Checkpoint::maybe_restore(&path, 60, &replacement).await.unwrap();
        assert!(!restored);
        assert!(replacement.list(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoint.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Checkpoint::load(&path).is_err());
    }
}
