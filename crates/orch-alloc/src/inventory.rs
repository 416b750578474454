//! Node and accelerator inventory
//!
//! Authoritative catalogue of the fleet. The inventory itself is plain
//! state; thread safety comes from the allocator, which owns it behind the
//! allocation lock.

use chrono::{DateTime, Duration, Utc};
use orch_core::{Error, Node, NodeId, Result};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// The node catalogue
///
/// Nodes are kept in a `BTreeMap` so iteration is always in ascending id
/// order; allocation tie-breaks depend on that determinism.
#[derive(Debug, Default)]
pub struct Inventory {
    nodes: BTreeMap<NodeId, Node>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node, or re-register an existing one.
    ///
    /// Idempotent on id. Re-registration rebinds the address and refreshes
    /// the heartbeat but preserves allocation flags and usage counters: a
    /// restarted agent must not lose outstanding leases.
    pub fn register(&mut self, mut node: Node) -> bool {
        node.accelerators.sort_by(|a, b| a.id.cmp(&b.id));
        node.healthy = true;
        node.last_heartbeat = Utc::now();
        node.unhealthy_since = None;

        if let Some(existing) = self.nodes.get(&node.id) {
            node.used_memory_gb = existing.used_memory_gb;
            node.used_cpus = existing.used_cpus;
            for accel in &mut node.accelerators {
                if let Some(prior) = existing.accelerators.iter().find(|a| a.id == accel.id) {
                    accel.allocated = prior.allocated;
                    accel.job_id = prior.job_id.clone();
                    accel.allocated_at = prior.allocated_at;
                }
            }
            info!(node_id = %node.id, "re-registered node, leases preserved");
            self.nodes.insert(node.id.clone(), node);
            false
        } else {
            info!(node_id = %node.id, accelerators = node.accelerators.len(), "registered node");
            self.nodes.insert(node.id.clone(), node);
            true
        }
    }

    /// Record a heartbeat, recovering the node if it was unhealthy.
    pub fn heartbeat(&mut self, node_id: &NodeId, ts: DateTime<Utc>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::not_found(format!("node {}", node_id)))?;

        node.last_heartbeat = ts;
        if !node.healthy {
            info!(node_id = %node_id, "node recovered");
            node.healthy = true;
            node.unhealthy_since = None;
        }
        Ok(())
    }

    /// Flip a node unhealthy. Live allocations on it remain; they just stop
    /// attracting new work. Returns whether the state actually changed.
    pub fn mark_unhealthy(&mut self, node_id: &NodeId, now: DateTime<Utc>) -> Result<bool> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| Error::not_found(format!("node {}", node_id)))?;

        if !node.healthy {
            return Ok(false);
        }
        warn!(node_id = %node_id, "marking node unhealthy");
        node.healthy = false;
        node.unhealthy_since = Some(now);
        Ok(true)
    }

    /// Insert a node verbatim, keeping its health and usage fields. Used
    /// when replaying a checkpoint; live registration goes through
    /// [`register`](Self::register).
    pub fn insert_restored(&mut self, mut node: Node) {
        node.accelerators.sort_by(|a, b| a.id.cmp(&b.id));
        self.nodes.insert(node.id.clone(), node);
    }

    /// Remove a node from the catalogue.
    pub fn remove(&mut self, node_id: &NodeId) -> Result<Node> {
        self.nodes
            .remove(node_id)
            .ok_or_else(|| Error::not_found(format!("node {}", node_id)))
    }

    /// Flip every node whose heartbeat is older than `timeout` unhealthy and
    /// return their ids.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout: Duration) -> Vec<NodeId> {
        let mut flipped = Vec::new();
        for node in self.nodes.values_mut() {
            if node.healthy && now - node.last_heartbeat > timeout {
                warn!(
                    node_id = %node.id,
                    last_heartbeat = %node.last_heartbeat,
                    "heartbeat timeout, marking node unhealthy"
                );
                node.healthy = false;
                node.unhealthy_since = Some(now);
                flipped.push(node.id.clone());
            }
        }
        flipped
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn get_mut(&mut self, node_id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(node_id)
    }

    /// Nodes in ascending id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
