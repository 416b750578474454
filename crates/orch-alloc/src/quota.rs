//! Per-tenant quota ledger
//!
//! Tracks in-flight resource usage against per-tenant caps. The ledger is
//! owned by the allocator and mutated only under the allocation lock, so a
//! quota check and the charge it authorizes are atomic.

use orch_core::{Allocation, Error, Quota, ResourceRequest, Result};
use std::collections::HashMap;
use tracing::debug;

/// The quota ledger. A tenant with no record is unlimited.
#[derive(Debug, Default)]
pub struct QuotaLedger {
    quotas: HashMap<String, Quota>,
}

impl QuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a tenant's quota, keeping current usage.
    pub fn set(&mut self, quota: Quota) {
        let usage = self.quotas.get(&quota.tenant).map(|q| (q.used_gpus, q.used_memory_gb));
        let mut quota = quota;
        if let Some((gpus, memory)) = usage {
            quota.used_gpus = gpus;
            quota.used_memory_gb = memory;
        }
        self.quotas.insert(quota.tenant.clone(), quota);
    }

    pub fn get(&self, tenant: &str) -> Option<&Quota> {
        self.quotas.get(tenant)
    }

    /// Fail if granting the request would push the tenant over its cap.
    pub fn check(&self, tenant: &str, request: &ResourceRequest) -> Result<()> {
        if let Some(quota) = self.quotas.get(tenant) {
            if quota.would_exceed(request) {
                return Err(Error::quota_exceeded(format!(
                    "tenant {} holds {}/{} gpus, {}/{} GB; request for {} gpus, {} GB does not fit",
                    tenant,
                    quota.used_gpus,
                    quota.max_gpus,
                    quota.used_memory_gb,
                    quota.max_memory_gb,
                    request.gpus,
                    request.memory_gb,
                )));
            }
        }
        Ok(())
    }

    /// Fail if the request can never fit, even with zero usage. Used for the
    /// synchronous check at submit time.
    pub fn check_maximum(&self, tenant: &str, request: &ResourceRequest) -> Result<()> {
        if let Some(quota) = self.quotas.get(tenant) {
            if quota.exceeds_maximum(request) {
                return Err(Error::quota_exceeded(format!(
                    "request for {} gpus, {} GB exceeds tenant {} quota of {} gpus, {} GB",
                    request.gpus, request.memory_gb, tenant, quota.max_gpus, quota.max_memory_gb,
                )));
            }
        }
        Ok(())
    }

    /// Charge a granted request against the tenant.
    pub fn charge(&mut self, tenant: &str, request: &ResourceRequest) {
        if let Some(quota) = self.quotas.get_mut(tenant) {
            quota.used_gpus += request.gpus;
            quota.used_memory_gb += request.memory_gb;
            debug!(
                tenant,
                used_gpus = quota.used_gpus,
                used_memory_gb = quota.used_memory_gb,
                "charged quota"
            );
        }
    }

    /// Return a released allocation's resources to the tenant.
    pub fn credit(&mut self, tenant: &str, allocation: &Allocation) {
        if let Some(quota) = self.quotas.get_mut(tenant) {
            quota.used_gpus = quota.used_gpus.saturating_sub(allocation.accelerator_ids.len() as u32);
            quota.used_memory_gb = quota.used_memory_gb.saturating_sub(allocation.memory_gb);
            debug!(
                tenant,
                used_gpus = quota.used_gpus,
                used_memory_gb = quota.used_memory_gb,
                "credited quota"
            );
        }
    }

    pub fn quotas(&self) -> impl Iterator<Item = &Quota> {
        self.quotas.values()
    }
}
