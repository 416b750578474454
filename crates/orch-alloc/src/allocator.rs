//! The allocator
//!
//! Given a resource request and a tenant, finds and reserves a contiguous
//! slice of accelerators on one node, or fails. Placement is best-fit by
//! residual free accelerators to limit fragmentation, with all ties broken
//! by ascending id so decisions are reproducible.
//!
//! One `RwLock` guards inventory, quotas, and the live-allocation map
//! together. The free-capacity read, the flag writes, and the quota charge
//! for a single decision all happen under one write guard; nothing else can
//! interleave and double-allocate a device. Audit events are emitted after
//! the guard is dropped.

use crate::inventory::Inventory;
use crate::quota::QuotaLedger;
use chrono::{Duration, Utc};
use orch_core::{
    Allocation, AllocationId, AuditKind, AuditStream, AvailableResources, ClusterStatus, Error,
    JobId, Node, NodeId, Quota, ResourceRequest, Result,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct AllocatorState {
    inventory: Inventory,
    quotas: QuotaLedger,
    allocations: HashMap<AllocationId, Allocation>,
}

/// Cluster-wide resource allocator
pub struct Allocator {
    state: RwLock<AllocatorState>,
    audit: AuditStream,
}

impl Allocator {
    pub fn new(audit: AuditStream) -> Self {
        Self {
            state: RwLock::new(AllocatorState::default()),
            audit,
        }
    }

    // -- inventory surface ---------------------------------------------------

    /// Register or re-register a node. Returns whether the node was new.
    pub async fn register_node(&self, node: Node) -> bool {
        let node_id = node.id.clone();
        let was_new = {
            let mut state = self.state.write().await;
            state.inventory.register(node)
        };
        self.audit
            .emit(AuditKind::NodeRegistered, |e| {
                e.node_id = Some(node_id);
            })
            .await;
        was_new
    }

    /// Record a heartbeat for a node.
    pub async fn heartbeat(&self, node_id: &NodeId) -> Result<()> {
        let mut state = self.state.write().await;
        state.inventory.heartbeat(node_id, Utc::now())
    }

    /// Flip a node unhealthy. Its live allocations remain until the worker
    /// reports the jobs lost or the reaper claims them.
    pub async fn mark_unhealthy(&self, node_id: &NodeId) -> Result<()> {
        let flipped = {
            let mut state = self.state.write().await;
            state.inventory.mark_unhealthy(node_id, Utc::now())?
        };
        if flipped {
            let node_id = node_id.clone();
            self.audit
                .emit(AuditKind::NodeUnhealthy, |e| {
                    e.node_id = Some(node_id);
                })
                .await;
        }
        Ok(())
    }

    /// Remove a node. Refused while live allocations reference it.
    pub async fn deregister_node(&self, node_id: &NodeId) -> Result<Node> {
        let mut state = self.state.write().await;
        let live = state.allocations.values().filter(|a| &a.node_id == node_id).count();
        if live > 0 {
            return Err(Error::conflict(format!(
                "node {} still holds {} live allocation(s)",
                node_id, live
            )));
        }
        state.inventory.remove(node_id)
    }

    /// Mark every node with a stale heartbeat unhealthy; returns the ids of
    /// nodes flipped by this pass.
    pub async fn sweep_unhealthy(&self, timeout: Duration) -> Vec<NodeId> {
        let flipped = {
            let mut state = self.state.write().await;
            state.inventory.sweep(Utc::now(), timeout)
        };
        for node_id in &flipped {
            let node_id = node_id.clone();
            self.audit
                .emit(AuditKind::NodeUnhealthy, |e| {
                    e.node_id = Some(node_id);
                })
                .await;
        }
        flipped
    }

    /// Allocations stranded on nodes that have been unhealthy longer than
    /// `reap_after`. The scheduler fails these jobs and releases them.
    pub async fn reap_candidates(&self, reap_after: Duration) -> Vec<Allocation> {
        let state = self.state.read().await;
        let now = Utc::now();
        let lost: Vec<NodeId> = state
            .inventory
            .nodes()
            .filter(|n| {
                !n.healthy
                    && n.unhealthy_since
                        .map_or(false, |since| now - since > reap_after)
            })
            .map(|n| n.id.clone())
            .collect();

        state
            .allocations
            .values()
            .filter(|a| lost.contains(&a.node_id))
            .cloned()
            .collect()
    }

    // -- quota surface -------------------------------------------------------

    /// Install or replace a tenant quota.
    pub async fn set_quota(&self, quota: Quota) {
        let mut state = self.state.write().await;
        state.quotas.set(quota);
    }

    /// Current quota record for a tenant, if one exists.
    pub async fn quota(&self, tenant: &str) -> Option<Quota> {
        let state = self.state.read().await;
        state.quotas.get(tenant).cloned()
    }

    /// Synchronous submit-time check: reject only requests that could never
    /// fit under the tenant's cap. Transient over-quota is the tick's
    /// business, not submit's.
    pub async fn check_submit_quota(&self, tenant: &str, request: &ResourceRequest) -> Result<()> {
        let state = self.state.read().await;
        state.quotas.check_maximum(tenant, request)
    }

    // -- allocation ----------------------------------------------------------

    /// Reserve resources for a job anywhere in the cluster.
    pub async fn allocate(
        &self,
        job_id: &JobId,
        tenant: &str,
        request: &ResourceRequest,
    ) -> Result<Allocation> {
        request.validate()?;
        let allocation = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.quotas.check(tenant, request)?;
            let node_id = Self::select_node(&state.inventory, request)?;
            Self::commit(state, &node_id, job_id, tenant, request)
        };
        self.emit_created(&allocation).await;
        Ok(allocation)
    }

    /// Reserve resources for a job on one specific node; the worker-pull
    /// path. Bookkeeping is identical to [`allocate`](Self::allocate), only
    /// node selection is skipped.
    pub async fn allocate_on_node(
        &self,
        job_id: &JobId,
        tenant: &str,
        request: &ResourceRequest,
        node_id: &NodeId,
    ) -> Result<Allocation> {
        request.validate()?;
        let allocation = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            state.quotas.check(tenant, request)?;

            let node = state
                .inventory
                .get(node_id)
                .ok_or_else(|| Error::not_found(format!("node {}", node_id)))?;
            if !Self::node_fits(node, request) {
                return Err(Error::no_suitable_node(format!(
                    "node {} cannot satisfy the request",
                    node_id
                )));
            }
            Self::commit(state, node_id, job_id, tenant, request)
        };
        self.emit_created(&allocation).await;
        Ok(allocation)
    }

    /// Release an allocation by id. Releasing an unknown id changes nothing
    /// and returns `NotFound`, so callers can treat release as idempotent.
    pub async fn release(&self, allocation_id: &AllocationId) -> Result<Allocation> {
        let allocation = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let allocation = state
                .allocations
                .remove(allocation_id)
                .ok_or_else(|| Error::not_found(format!("allocation {}", allocation_id)))?;

            match state.inventory.get_mut(&allocation.node_id) {
                Some(node) => {
                    for accel in node.accelerators.iter_mut() {
                        if allocation.accelerator_ids.contains(&accel.id) {
                            accel.allocated = false;
                            accel.job_id = None;
                            accel.allocated_at = None;
                        }
                    }
                    node.used_memory_gb = node.used_memory_gb.saturating_sub(allocation.memory_gb);
                    node.used_cpus = node.used_cpus.saturating_sub(allocation.cpus);
                }
                None => {
                    // Deregistration is refused while allocations are live,
                    // so a missing node here is bookkeeping corruption.
                    warn!(
                        allocation_id = %allocation.id,
                        node_id = %allocation.node_id,
                        "released allocation references an unknown node"
                    );
                }
            }

            state.quotas.credit(&allocation.tenant, &allocation);
            allocation
        };

        let (id, job_id, node_id, tenant) = (
            allocation.id.clone(),
            allocation.job_id.clone(),
            allocation.node_id.clone(),
            allocation.tenant.clone(),
        );
        self.audit
            .emit(AuditKind::AllocationReleased, |e| {
                e.allocation_id = Some(id);
                e.job_id = Some(job_id);
                e.node_id = Some(node_id);
                e.tenant = Some(tenant);
            })
            .await;
        Ok(allocation)
    }

    // -- queries -------------------------------------------------------------

    /// Aggregated cluster snapshot.
    pub async fn cluster_status(&self) -> ClusterStatus {
        let state = self.state.read().await;
        let mut total_gpus = 0;
        let mut used_gpus = 0;
        let mut healthy_nodes = 0;

        for node in state.inventory.nodes() {
            if node.healthy {
                healthy_nodes += 1;
            }
            for accel in &node.accelerators {
                total_gpus += 1;
                if accel.allocated {
                    used_gpus += 1;
                }
            }
        }

        let gpu_utilization = if total_gpus > 0 {
            used_gpus as f64 / total_gpus as f64 * 100.0
        } else {
            0.0
        };

        ClusterStatus {
            total_nodes: state.inventory.len(),
            healthy_nodes,
            total_gpus,
            used_gpus,
            gpu_utilization,
            allocations: state.allocations.len(),
        }
    }

    /// Node records, in ascending id order.
    pub async fn nodes(&self) -> Vec<Node> {
        let state = self.state.read().await;
        state.inventory.nodes().cloned().collect()
    }

    /// Free resources per healthy node, for worker reporting.
    pub async fn workers_available(&self) -> Vec<(NodeId, AvailableResources)> {
        let state = self.state.read().await;
        state
            .inventory
            .nodes()
            .filter(|n| n.healthy)
            .map(|n| (n.id.clone(), n.available()))
            .collect()
    }

    /// Number of live allocations.
    pub async fn allocation_count(&self) -> usize {
        self.state.read().await.allocations.len()
    }

    /// Cross-check the redundant bookkeeping: accelerator flags against the
    /// live-allocation map, node usage counters against the allocations on
    /// each node, and quota usage against the allocations per tenant.
    pub async fn verify_invariants(&self) -> Result<()> {
        let state = self.state.read().await;

        let mut held_by_node: HashMap<NodeId, (usize, u64, u32)> = HashMap::new();
        let mut held_by_tenant: HashMap<String, (u32, u64)> = HashMap::new();
        for alloc in state.allocations.values() {
            let entry = held_by_node.entry(alloc.node_id.clone()).or_default();
            entry.0 += alloc.accelerator_ids.len();
            entry.1 += alloc.memory_gb;
            entry.2 += alloc.cpus;

            let usage = held_by_tenant.entry(alloc.tenant.clone()).or_default();
            usage.0 += alloc.accelerator_ids.len() as u32;
            usage.1 += alloc.memory_gb;
        }

        for node in state.inventory.nodes() {
            let (gpus, memory_gb, cpus) =
                held_by_node.get(&node.id).copied().unwrap_or((0, 0, 0));

            if gpus > node.accelerators.len() {
                return Err(Error::invariant(format!(
                    "node {} holds {} allocated accelerators but only has {}",
                    node.id,
                    gpus,
                    node.accelerators.len()
                )));
            }
            if node.used_memory_gb != memory_gb || node.used_cpus != cpus {
                return Err(Error::invariant(format!(
                    "node {} usage counters ({} GB, {} cpus) disagree with live allocations ({} GB, {} cpus)",
                    node.id, node.used_memory_gb, node.used_cpus, memory_gb, cpus
                )));
            }

            let flagged = node.accelerators.iter().filter(|a| a.allocated).count();
            if flagged != gpus {
                return Err(Error::invariant(format!(
                    "node {} has {} accelerators flagged allocated but {} held by live allocations",
                    node.id, flagged, gpus
                )));
            }
        }

        for quota in state.quotas.quotas() {
            let (gpus, memory_gb) = held_by_tenant.get(&quota.tenant).copied().unwrap_or((0, 0));
            if quota.used_gpus != gpus || quota.used_memory_gb != memory_gb {
                return Err(Error::invariant(format!(
                    "tenant {} quota counters ({} gpus, {} GB) disagree with live allocations ({} gpus, {} GB)",
                    quota.tenant, quota.used_gpus, quota.used_memory_gb, gpus, memory_gb
                )));
            }
        }

        Ok(())
    }

    // -- checkpoint support --------------------------------------------------

    /// Clone out the full state for checkpointing.
    pub async fn export(&self) -> (Vec<Node>, Vec<Quota>, Vec<Allocation>) {
        let state = self.state.read().await;
        (
            state.inventory.nodes().cloned().collect(),
            state.quotas.quotas().cloned().collect(),
            state.allocations.values().cloned().collect(),
        )
    }

    /// Replace the full state from a checkpoint.
    pub async fn restore(&self, nodes: Vec<Node>, quotas: Vec<Quota>, allocations: Vec<Allocation>) {
        let mut state = self.state.write().await;
        let mut inventory = Inventory::new();
        for node in nodes {
            // Verbatim, including health and usage; register() would reset
            // liveness and defeat the point of the checkpoint.
            inventory.insert_restored(node);
        }
        let mut ledger = QuotaLedger::new();
        for quota in quotas {
            ledger.set(quota);
        }
        state.inventory = inventory;
        state.quotas = ledger;
        state.allocations = allocations.into_iter().map(|a| (a.id.clone(), a)).collect();
        debug!("allocator state restored from checkpoint");
    }

    // -- internals -----------------------------------------------------------

    fn node_fits(node: &Node, request: &ResourceRequest) -> bool {
        node.healthy
            && node.free_memory_gb() >= request.memory_gb
            && node.free_cpus() >= request.cpus
            && node.free_accelerators(request.gpu_type.as_ref()) >= request.gpus as usize
    }

    /// Best-fit node selection: among healthy nodes that fit, pick the one
    /// left with the fewest free accelerators after placement. Iteration is
    /// id-ascending and the comparison strict, so ties go to the lowest id.
    fn select_node(inventory: &Inventory, request: &ResourceRequest) -> Result<NodeId> {
        let mut best: Option<(usize, NodeId)> = None;
        for node in inventory.nodes() {
            if !Self::node_fits(node, request) {
                continue;
            }
            let residual =
                node.free_accelerators(request.gpu_type.as_ref()) - request.gpus as usize;
            if best.as_ref().map_or(true, |(r, _)| residual < *r) {
                best = Some((residual, node.id.clone()));
            }
        }
        best.map(|(_, id)| id)
            .ok_or_else(|| Error::no_suitable_node("no healthy node fits the request"))
    }

    /// Claim resources on the chosen node. Callers have already verified the
    /// node fits; the claim itself is deterministic, taking the first
    /// eligible accelerators in id order.
    fn commit(
        state: &mut AllocatorState,
        node_id: &NodeId,
        job_id: &JobId,
        tenant: &str,
        request: &ResourceRequest,
    ) -> Allocation {
        let now = Utc::now();
        let node = state
            .inventory
            .get_mut(node_id)
            .expect("selected node vanished under the allocation lock");

        let mut accelerator_ids = Vec::with_capacity(request.gpus as usize);
        for accel in node.accelerators.iter_mut() {
            if accelerator_ids.len() == request.gpus as usize {
                break;
            }
            if accel.matches(request.gpu_type.as_ref()) {
                accel.allocated = true;
                accel.job_id = Some(job_id.clone());
                accel.allocated_at = Some(now);
                accelerator_ids.push(accel.id.clone());
            }
        }

        node.used_memory_gb += request.memory_gb;
        node.used_cpus += request.cpus;

        let allocation = Allocation {
            id: AllocationId::generate(),
            job_id: job_id.clone(),
            tenant: tenant.to_string(),
            node_id: node_id.clone(),
            accelerator_ids,
            memory_gb: request.memory_gb,
            cpus: request.cpus,
            created_at: now,
        };

        state.quotas.charge(tenant, request);
        state.allocations.insert(allocation.id.clone(), allocation.clone());

        debug!(
            allocation_id = %allocation.id,
            job_id = %job_id,
            node_id = %node_id,
            gpus = allocation.accelerator_ids.len(),
            "allocated"
        );
        allocation
    }

    async fn emit_created(&self, allocation: &Allocation) {
        let (id, job_id, node_id, tenant, gpus) = (
            allocation.id.clone(),
            allocation.job_id.clone(),
            allocation.node_id.clone(),
            allocation.tenant.clone(),
            allocation.accelerator_ids.len(),
        );
        self.audit
            .emit(AuditKind::AllocationCreated, |e| {
                e.allocation_id = Some(id);
                e.job_id = Some(job_id);
                e.node_id = Some(node_id);
                e.tenant = Some(tenant);
                e.detail = format!("{} accelerator(s)", gpus);
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_core::{Accelerator, AcceleratorType};

    fn test_allocator() -> Allocator {
        Allocator::new(AuditStream::default())
    }

    fn node(id: &str, gpus: usize, kind: AcceleratorType) -> Node {
        Node {
            id: NodeId::new(id),
            address: "10.0.0.1:9000".to_string(),
            accelerators: (0..gpus)
                .map(|i| Accelerator {
                    id: format!("gpu-{}", i),
                    node_id: NodeId::new(id),
                    kind: kind.clone(),
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

    fn request(gpus: u32) -> ResourceRequest {
        ResourceRequest { gpus, memory_gb: 32, cpus: 4, ..Default::default() }
    }

    #[tokio::test]
    async fn test_allocate_and_release_round_trip() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;

        let before = alloc.cluster_status().await;
        let allocation = alloc.allocate(&JobId::new("j1"), "t1", &request(2)).await.unwrap();
        assert_eq!(allocation.accelerator_ids, vec!["gpu-0", "gpu-1"]);

        let status = alloc.cluster_status().await;
        assert_eq!(status.used_gpus, 2);
        assert_eq!(status.allocations, 1);
        alloc.verify_invariants().await.unwrap();

        alloc.release(&allocation.id).await.unwrap();
        let after = alloc.cluster_status().await;
        assert_eq!(after, before);
        alloc.verify_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_unknown_is_not_found() {
        let alloc = test_allocator();
        let err = alloc.release(&AllocationId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_best_fit_prefers_smallest_residual() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 8, AcceleratorType::A100)).await;
        alloc.register_node(node("n2", 2, AcceleratorType::A100)).await;

        // Both fit; n2 leaves residual 0 vs n1's 6
        let allocation = alloc.allocate(&JobId::new("j1"), "t1", &request(2)).await.unwrap();
        assert_eq!(allocation.node_id, NodeId::new("n2"));
    }

    #[tokio::test]
    async fn test_best_fit_ties_break_by_id() {
        let alloc = test_allocator();
        alloc.register_node(node("n2", 4, AcceleratorType::A100)).await;
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;

        let allocation = alloc.allocate(&JobId::new("j1"), "t1", &request(1)).await.unwrap();
        assert_eq!(allocation.node_id, NodeId::new("n1"));
    }

    #[tokio::test]
    async fn test_gpu_type_filter() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;

        let mut req = request(1);
        req.gpu_type = Some(AcceleratorType::H100);
        let err = alloc.allocate(&JobId::new("j1"), "t1", &req).await.unwrap_err();
        assert!(matches!(err, Error::NoSuitableNode(_)));

        req.gpu_type = Some(AcceleratorType::A100);
        assert!(alloc.allocate(&JobId::new("j1"), "t1", &req).await.is_ok());
    }

    #[tokio::test]
    async fn test_unhealthy_node_is_skipped() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;
        alloc.mark_unhealthy(&NodeId::new("n1")).await.unwrap();

        let err = alloc.allocate(&JobId::new("j1"), "t1", &request(1)).await.unwrap_err();
        assert!(matches!(err, Error::NoSuitableNode(_)));
    }

    #[tokio::test]
    async fn test_quota_enforced_atomically() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 8, AcceleratorType::A100)).await;
        alloc.set_quota(Quota::new("t1", 2, 1024)).await;

        let a1 = alloc.allocate(&JobId::new("j1"), "t1", &request(2)).await.unwrap();
        let err = alloc.allocate(&JobId::new("j2"), "t1", &request(1)).await.unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded(_)));

        // Another tenant is unaffected
        assert!(alloc.allocate(&JobId::new("j3"), "t2", &request(1)).await.is_ok());

        // Releasing frees the quota
        alloc.release(&a1.id).await.unwrap();
        assert!(alloc.allocate(&JobId::new("j4"), "t1", &request(2)).await.is_ok());
        alloc.verify_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_early() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;

        let empty = ResourceRequest::default();
        let err = alloc.allocate(&JobId::new("j1"), "t1", &empty).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_memory_and_cpu_bounds() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;

        let req = ResourceRequest { gpus: 1, memory_gb: 600, cpus: 4, ..Default::default() };
        let err = alloc.allocate(&JobId::new("j1"), "t1", &req).await.unwrap_err();
        assert!(matches!(err, Error::NoSuitableNode(_)));

        let req = ResourceRequest { gpus: 1, memory_gb: 32, cpus: 128, ..Default::default() };
        let err = alloc.allocate(&JobId::new("j1"), "t1", &req).await.unwrap_err();
        assert!(matches!(err, Error::NoSuitableNode(_)));
    }

    #[tokio::test]
    async fn test_allocate_on_node() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 2, AcceleratorType::A100)).await;
        alloc.register_node(node("n2", 8, AcceleratorType::A100)).await;

        let allocation = alloc
            .allocate_on_node(&JobId::new("j1"), "t1", &request(2), &NodeId::new("n2"))
            .await
            .unwrap();
        assert_eq!(allocation.node_id, NodeId::new("n2"));
        alloc.verify_invariants().await.unwrap();

        let err = alloc
            .allocate_on_node(&JobId::new("j2"), "t1", &request(1), &NodeId::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // n1 only has 2 devices
        let err = alloc
            .allocate_on_node(&JobId::new("j3"), "t1", &request(3), &NodeId::new("n1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuitableNode(_)));
    }

    #[tokio::test]
    async fn test_deregister_refused_with_live_allocations() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;

        let allocation = alloc.allocate(&JobId::new("j1"), "t1", &request(1)).await.unwrap();
        let err = alloc.deregister_node(&NodeId::new("n1")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        alloc.release(&allocation.id).await.unwrap();
        assert!(alloc.deregister_node(&NodeId::new("n1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_reregister_keeps_allocation_visible() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;
        let allocation = alloc.allocate(&JobId::new("j1"), "t1", &request(2)).await.unwrap();

        // Agent restart
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;
        alloc.verify_invariants().await.unwrap();

        let status = alloc.cluster_status().await;
        assert_eq!(status.used_gpus, 2);
        assert_eq!(status.allocations, 1);

        alloc.release(&allocation.id).await.unwrap();
        assert_eq!(alloc.cluster_status().await.used_gpus, 0);
    }

    #[tokio::test]
    async fn test_reap_candidates() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;
        let allocation = alloc.allocate(&JobId::new("j1"), "t1", &request(1)).await.unwrap();

        alloc.mark_unhealthy(&NodeId::new("n1")).await.unwrap();

        // Not yet past the reap window
        assert!(alloc.reap_candidates(Duration::seconds(600)).await.is_empty());

        // With a zero window, the allocation is reported immediately
        let candidates = alloc.reap_candidates(Duration::seconds(-1)).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, allocation.id);
    }

    #[tokio::test]
    async fn test_checkpoint_export_restore() {
        let alloc = test_allocator();
        alloc.register_node(node("n1", 4, AcceleratorType::A100)).await;
        alloc.set_quota(Quota::new("t1", 4, 1024)).await;
        alloc.allocate(&JobId::new("j1"), "t1", &request(2)).await.unwrap();

        let (nodes, quotas, allocations) = alloc.export().await;

        let restored = test_allocator();
        restored.restore(nodes, quotas, allocations).await;
        restored.verify_invariants().await.unwrap();

        let status = restored.cluster_status().await;
        assert_eq!(status.used_gpus, 2);
        assert_eq!(status.allocations, 1);
        assert_eq!(restored.quota("t1").await.unwrap().used_gpus, 2);
    }
}
