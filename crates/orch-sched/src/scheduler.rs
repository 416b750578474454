//! The scheduler
//!
//! Owns the job registry and the queue, runs the periodic scheduling tick,
//! and mediates the job lifecycle. Two locks are in play: the allocator's
//! lock over inventory/quota/allocations, and this scheduler's lock over the
//! registry and heap. The tick never holds both at once — it pops under the
//! scheduler lock, drops it for the allocator call, then reacquires to
//! record the outcome. That keeps allocator critical sections short and
//! stops a slow placement from blocking cancels.

use crate::queue::{JobQueue, QueueEntry};
use chrono::{Duration, Utc};
use orch_alloc::Allocator;
use orch_core::{
    AllowAll, AuditKind, AuditStream, AvailableResources, Error, Job, JobId, JobSpec, JobState,
    NodeId, PolicyDecision, PolicyEvaluator, Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// The tick must have run this recently for the process to report healthy.
const TICK_HEALTH_WINDOW_SECS: i64 = 5;

/// Scheduler timing and policy knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Scheduling tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Heartbeat age after which a node is marked unhealthy, in seconds
    pub heartbeat_timeout_secs: i64,

    /// Unhealthy age after which jobs on a node are reaped, in seconds
    pub reap_after_secs: i64,

    /// Allow submissions through when the policy evaluator is unreachable
    pub policy_fail_open: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            heartbeat_timeout_secs: 30,
            reap_after_secs: 600,
            policy_fail_open: false,
        }
    }
}

#[derive(Debug, Default)]
struct SchedState {
    jobs: HashMap<JobId, Job>,
    queue: JobQueue,
}

/// The job scheduler
pub struct Scheduler {
    state: RwLock<SchedState>,
    allocator: Arc<Allocator>,
    policy: Arc<dyn PolicyEvaluator>,
    audit: AuditStream,
    config: SchedulerConfig,
    /// Epoch milliseconds of the last completed tick
    last_tick_ms: AtomicI64,
    /// Set when an invariant violation pauses scheduling for one cycle
    skip_next_tick: AtomicBool,
    invariant_violations: AtomicU64,
}

impl Scheduler {
    pub fn new(
        allocator: Arc<Allocator>,
        policy: Arc<dyn PolicyEvaluator>,
        audit: AuditStream,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            state: RwLock::new(SchedState::default()),
            allocator,
            policy,
            audit,
            config,
            last_tick_ms: AtomicI64::new(0),
            skip_next_tick: AtomicBool::new(false),
            invariant_violations: AtomicU64::new(0),
        }
    }

    /// Scheduler with the allow-all policy and default config, for tests and
    /// embedded use.
    pub fn with_defaults(allocator: Arc<Allocator>) -> Self {
        Self::new(
            allocator,
            Arc::new(AllowAll),
            AuditStream::default(),
            SchedulerConfig::default(),
        )
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    // -- lifecycle operations ------------------------------------------------

    /// Admit a job: policy check, synchronous quota sanity check, then into
    /// the registry and the queue. Returns the assigned job id.
    pub async fn submit(&self, spec: JobSpec) -> Result<JobId> {
        spec.request.validate()?;
        if spec.tenant.is_empty() {
            return Err(Error::invalid_request("job tenant is required"));
        }

        match self.policy.evaluate(&spec).await {
            Ok(PolicyDecision::Allow) => {}
            Ok(PolicyDecision::Deny { reason }) => {
                return Err(Error::permission_denied(reason));
            }
            Err(e) if self.config.policy_fail_open => {
                warn!(error = %e, "policy evaluator unreachable, failing open");
            }
            Err(e) => {
                return Err(Error::unavailable(format!("policy evaluator: {}", e)));
            }
        }

        // Reject outright only what could never fit under the tenant's cap;
        // transiently over-quota requests wait in the queue.
        self.allocator.check_submit_quota(&spec.tenant, &spec.request).await?;

        let job = Job::from_spec(spec);
        let (id, tenant) = (job.id.clone(), job.tenant.clone());
        {
            let mut state = self.state.write().await;
            state.queue.push(QueueEntry::new(job.id.clone(), job.priority, job.created_at));
            state.jobs.insert(job.id.clone(), job);
        }

        info!(job_id = %id, tenant = %tenant, "job submitted");
        let event_id = id.clone();
        self.audit
            .emit(AuditKind::JobSubmitted, |e| {
                e.job_id = Some(event_id);
                e.tenant = Some(tenant);
            })
            .await;
        Ok(id)
    }

    /// Cancel a job. Legal from `queued`, `retrying`, or `running`; by the
    /// time this returns the job is `cancelled` and any allocation released.
    pub async fn cancel(&self, job_id: &JobId) -> Result<()> {
        let released = {
            let mut state = self.state.write().await;
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;

            if job.state.is_terminal() {
                return Err(Error::invalid_request(format!(
                    "job {} is already {}",
                    job_id, job.state
                )));
            }

            job.state = JobState::Cancelled;
            job.completed_at = Some(Utc::now());
            let released = job.allocation.take();
            state.queue.remove(job_id);
            released
        };

        if let Some(allocation) = released {
            if let Err(e) = self.allocator.release(&allocation.id).await {
                warn!(job_id = %job_id, error = %e, "releasing allocation of cancelled job");
            }
        }

        info!(job_id = %job_id, "job cancelled");
        let event_id = job_id.clone();
        self.audit
            .emit(AuditKind::JobCancelled, |e| {
                e.job_id = Some(event_id);
            })
            .await;
        Ok(())
    }

    /// Record the worker's completion callback. `error` of `None` completes
    /// the job; otherwise it retries under `max_retries` and fails after.
    /// Calling this for a job already in a terminal state changes nothing
    /// and returns `NotFound`, so workers can repeat the callback safely.
    pub async fn complete(&self, job_id: &JobId, outcome: Option<String>) -> Result<()> {
        enum Transition {
            Completed,
            Retrying,
            Failed,
        }

        let (transition, released) = {
            let mut state = self.state.write().await;
            let job = state
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| Error::not_found(format!("job {}", job_id)))?;

            if job.state.is_terminal() {
                return Err(Error::not_found(format!(
                    "no active job {} ({})",
                    job_id, job.state
                )));
            }
            if job.state != JobState::Running {
                return Err(Error::invalid_request(format!(
                    "job {} has not started ({})",
                    job_id, job.state
                )));
            }

            let released = job.allocation.take();
            let mut reenqueue = None;
            let transition = match outcome {
                None => {
                    job.state = JobState::Completed;
                    job.completed_at = Some(Utc::now());
                    job.error = None;
                    Transition::Completed
                }
                Some(reason) if job.retry_count < job.max_retries => {
                    job.retry_count += 1;
                    job.state = JobState::Retrying;
                    job.error = Some(reason);
                    // Same priority, original created_at: FIFO within the
                    // priority level is preserved across retries.
                    reenqueue = Some(QueueEntry::new(job.id.clone(), job.priority, job.created_at));
                    Transition::Retrying
                }
                Some(reason) => {
                    job.state = JobState::Failed;
                    job.completed_at = Some(Utc::now());
                    job.error = Some(reason);
                    Transition::Failed
                }
            };
            if let Some(entry) = reenqueue {
                state.queue.push(entry);
            }
            (transition, released)
        };

        if let Some(allocation) = released {
            if let Err(e) = self.allocator.release(&allocation.id).await {
                warn!(job_id = %job_id, error = %e, "releasing allocation on completion");
            }
        }

        let (kind, label) = match transition {
            Transition::Completed => (AuditKind::JobCompleted, "completed"),
            Transition::Retrying => (AuditKind::JobRetrying, "retrying"),
            Transition::Failed => (AuditKind::JobFailed, "failed"),
        };
        info!(job_id = %job_id, outcome = label, "completion recorded");
        let event_id = job_id.clone();
        self.audit.emit(kind, |e| e.job_id = Some(event_id)).await;
        Ok(())
    }

    /// Fetch a job record.
    pub async fn get(&self, job_id: &JobId) -> Result<Job> {
        let state = self.state.read().await;
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("job {}", job_id)))
    }

    /// List jobs, optionally filtered by state, oldest first.
    pub async fn list(&self, filter: Option<JobState>) -> Vec<Job> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| filter.map_or(true, |f| j.state == f))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Job counts per state.
    pub async fn stats(&self) -> HashMap<String, usize> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for job in state.jobs.values() {
            *counts.entry(job.state.to_string()).or_insert(0) += 1;
        }
        counts
    }

    // -- worker pull ---------------------------------------------------------

    /// Hand the best queued job that fits the worker's declared capacity to
    /// the worker, recording an allocation bound to the worker's node. The
    /// bookkeeping is identical to the push path; only node selection is
    /// pinned. Returns `None` when nothing fits.
    pub async fn dequeue(
        &self,
        worker_id: &NodeId,
        available: &AvailableResources,
    ) -> Result<Option<Job>> {
        let mut attempted: HashSet<JobId> = HashSet::new();

        loop {
            // Pick the highest-ranked fitting job under the scheduler lock.
            let candidate = {
                let mut state = self.state.write().await;
                let chosen = state.queue.ordered().into_iter().find(|entry| {
                    if attempted.contains(&entry.job_id) {
                        return false;
                    }
                    state
                        .jobs
                        .get(&entry.job_id)
                        .map_or(false, |job| job.request.fits_within(available))
                });
                match chosen {
                    Some(entry) => {
                        state.queue.remove(&entry.job_id);
                        let job = state.jobs.get(&entry.job_id).cloned();
                        job.map(|j| (entry, j))
                    }
                    None => return Ok(None),
                }
            };

            let Some((entry, job)) = candidate else {
                return Ok(None);
            };

            match self
                .allocator
                .allocate_on_node(&job.id, &job.tenant, &job.request, worker_id)
                .await
            {
                Ok(allocation) => {
                    let started = self.record_start(&job.id, allocation).await?;
                    return Ok(started);
                }
                Err(Error::NotFound(msg)) => {
                    // Unknown worker: put the job back and tell the caller.
                    let mut state = self.state.write().await;
                    if state.jobs.get(&entry.job_id).map_or(false, |j| j.state.is_queued()) {
                        state.queue.push(entry);
                    }
                    return Err(Error::not_found(msg));
                }
                Err(e) if e.is_schedulable_again() => {
                    // This job does not fit the node right now; a smaller
                    // queued job still might.
                    debug!(job_id = %entry.job_id, error = %e, "dequeue candidate skipped");
                    attempted.insert(entry.job_id.clone());
                    let mut state = self.state.write().await;
                    if state.jobs.get(&entry.job_id).map_or(false, |j| j.state.is_queued()) {
                        state.queue.push(entry);
                    }
                }
                Err(e) => {
                    let mut state = self.state.write().await;
                    if state.jobs.get(&entry.job_id).map_or(false, |j| j.state.is_queued()) {
                        state.queue.push(entry);
                    }
                    return Err(e);
                }
            }
        }
    }

    // -- scheduling tick -----------------------------------------------------

    /// One scheduling pass: expire queued-phase deadlines, then drain the
    /// queue in priority order until the head job cannot be placed.
    pub async fn tick(&self) {
        if self.skip_next_tick.swap(false, Ordering::SeqCst) {
            warn!("scheduling paused for this cycle after invariant violation");
            self.mark_tick();
            return;
        }

        if let Err(e) = self.allocator.verify_invariants().await {
            error!(error = %e, "allocator invariants violated; pausing scheduling");
            self.invariant_violations.fetch_add(1, Ordering::Relaxed);
            self.skip_next_tick.store(true, Ordering::SeqCst);
            self.mark_tick();
            return;
        }

        self.expire_deadlines().await;

        // Quota-blocked entries are parked here rather than re-pushed, so a
        // single tick makes exactly one pass over the queue.
        let mut blocked: Vec<QueueEntry> = Vec::new();

        loop {
            // Pop under the scheduler lock, then drop it for the allocator
            // call.
            let candidate = {
                let mut state = self.state.write().await;
                match state.queue.pop() {
                    Some(entry) => state.jobs.get(&entry.job_id).cloned().map(|j| (entry, j)),
                    None => break,
                }
            };

            let Some((entry, job)) = candidate else {
                // Registry entry vanished; queue entry was stale.
                continue;
            };

            match self
                .allocator
                .allocate(&job.id, &job.tenant, &job.request)
                .await
            {
                Ok(allocation) => {
                    if let Err(e) = self.record_start(&job.id, allocation).await {
                        warn!(job_id = %job.id, error = %e, "recording job start");
                    }
                }
                Err(Error::NoSuitableNode(_)) => {
                    // Head-of-line: nothing fits the top job, so stop the
                    // whole tick rather than starve it with smaller jobs.
                    let mut state = self.state.write().await;
                    if state.jobs.get(&entry.job_id).map_or(false, |j| j.state.is_queued()) {
                        state.queue.push(entry);
                    }
                    break;
                }
                Err(Error::QuotaExceeded(msg)) => {
                    // Tenant-local; later jobs may belong to other tenants.
                    let mut state = self.state.write().await;
                    if let Some(j) = state.jobs.get_mut(&entry.job_id) {
                        if j.state.is_queued() {
                            j.error = Some(msg);
                            blocked.push(entry);
                        }
                    }
                    continue;
                }
                Err(e) => {
                    self.fail_job(&entry.job_id, e.to_string()).await;
                    continue;
                }
            }
        }

        if !blocked.is_empty() {
            let mut state = self.state.write().await;
            for entry in blocked {
                if state.jobs.get(&entry.job_id).map_or(false, |j| j.state.is_queued()) {
                    state.queue.push(entry);
                }
            }
        }

        self.mark_tick();
    }

    /// Health sweep: flip stale nodes unhealthy, then reap jobs stranded on
    /// nodes that have stayed unhealthy past the reap window.
    pub async fn sweep(&self) {
        let timeout = Duration::seconds(self.config.heartbeat_timeout_secs);
        let flipped = self.allocator.sweep_unhealthy(timeout).await;
        if !flipped.is_empty() {
            warn!(nodes = flipped.len(), "nodes lost to heartbeat timeout");
        }

        let reap_after = Duration::seconds(self.config.reap_after_secs);
        for allocation in self.allocator.reap_candidates(reap_after).await {
            info!(
                job_id = %allocation.job_id,
                node_id = %allocation.node_id,
                "reaping job on lost node"
            );

            let taken = {
                let mut state = self.state.write().await;
                match state.jobs.get_mut(&allocation.job_id) {
                    Some(job) if job.state == JobState::Running => {
                        job.state = JobState::Failed;
                        job.error = Some("node lost".to_string());
                        job.completed_at = Some(Utc::now());
                        job.allocation.take()
                    }
                    _ => None,
                }
            };

            if taken.is_some() {
                if let Err(e) = self.allocator.release(&allocation.id).await {
                    warn!(allocation_id = %allocation.id, error = %e, "releasing reaped allocation");
                }
                let (job_id, node_id) = (allocation.job_id.clone(), allocation.node_id.clone());
                self.audit
                    .emit(AuditKind::NodeReaped, |e| {
                        e.job_id = Some(job_id);
                        e.node_id = Some(node_id);
                        e.detail = "node lost".to_string();
                    })
                    .await;
            }
        }
    }

    /// Whether the tick has run recently enough to report the process
    /// healthy.
    pub fn is_healthy(&self) -> bool {
        let last = self.last_tick_ms.load(Ordering::SeqCst);
        if last == 0 {
            return false;
        }
        Utc::now().timestamp_millis() - last <= TICK_HEALTH_WINDOW_SECS * 1000
    }

    /// Invariant violations observed since start; exported as a metric.
    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    // -- checkpoint support --------------------------------------------------

    /// Clone out the job registry for checkpointing.
    pub async fn export(&self) -> Vec<Job> {
        let state = self.state.read().await;
        state.jobs.values().cloned().collect()
    }

    /// Replace the registry from a checkpoint and rebuild the queue from the
    /// jobs that were queued or retrying.
    pub async fn restore(&self, jobs: Vec<Job>) {
        let mut state = self.state.write().await;
        let mut queue = JobQueue::new();
        let mut registry = HashMap::with_capacity(jobs.len());
        for job in jobs {
            if job.state.is_queued() {
                queue.push(QueueEntry::new(job.id.clone(), job.priority, job.created_at));
            }
            registry.insert(job.id.clone(), job);
        }
        state.jobs = registry;
        state.queue = queue;
        debug!(jobs = state.jobs.len(), queued = state.queue.len(), "scheduler state restored");
    }

    // -- internals -----------------------------------------------------------

    fn mark_tick(&self) {
        self.last_tick_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    /// Mark a job running with its allocation. If the job was cancelled
    /// while the allocation was in flight, the allocation is released and
    /// the cancel stands.
    async fn record_start(&self, job_id: &JobId, allocation: orch_core::Allocation) -> Result<Option<Job>> {
        let outcome = {
            let mut state = self.state.write().await;
            match state.jobs.get_mut(job_id) {
                Some(job) if job.state.is_queued() => {
                    job.state = JobState::Running;
                    job.started_at = Some(Utc::now());
                    job.allocation = Some(allocation.clone());
                    job.error = None;
                    Ok(Some(job.clone()))
                }
                Some(job) => Err(job.state),
                None => Err(JobState::Cancelled),
            }
        };

        match outcome {
            Ok(job) => {
                info!(job_id = %job_id, node_id = %allocation.node_id, "job started");
                let event_id = job_id.clone();
                let node_id = allocation.node_id.clone();
                self.audit
                    .emit(AuditKind::JobStarted, |e| {
                        e.job_id = Some(event_id);
                        e.node_id = Some(node_id);
                    })
                    .await;
                Ok(job)
            }
            Err(state) => {
                warn!(job_id = %job_id, state = %state, "job left the queue mid-placement; releasing");
                if let Err(e) = self.allocator.release(&allocation.id).await {
                    warn!(allocation_id = %allocation.id, error = %e, "releasing orphaned allocation");
                }
                Ok(None)
            }
        }
    }

    /// Fail queued jobs whose queued-phase deadline has elapsed.
    async fn expire_deadlines(&self) {
        let now = Utc::now();
        let expired: Vec<JobId> = {
            let state = self.state.read().await;
            state
                .queue
                .ordered()
                .into_iter()
                .filter_map(|entry| {
                    let job = state.jobs.get(&entry.job_id)?;
                    let max_wait = job.request.max_wait_secs?;
                    if now - job.created_at > Duration::seconds(max_wait as i64) {
                        Some(entry.job_id)
                    } else {
                        None
                    }
                })
                .collect()
        };

        for job_id in expired {
            self.fail_job(&job_id, "deadline_exceeded".to_string()).await;
        }
    }

    /// Transition a queued job straight to failed.
    async fn fail_job(&self, job_id: &JobId, reason: String) {
        let failed = {
            let mut state = self.state.write().await;
            state.queue.remove(job_id);
            match state.jobs.get_mut(job_id) {
                Some(job) if !job.state.is_terminal() => {
                    job.state = JobState::Failed;
                    job.error = Some(reason.clone());
                    job.completed_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };

        if failed {
            warn!(job_id = %job_id, reason = %reason, "job failed");
            let event_id = job_id.clone();
            self.audit
                .emit(AuditKind::JobFailed, |e| {
                    e.job_id = Some(event_id);
                    e.detail = reason;
                })
                .await;
        }
    }
}
