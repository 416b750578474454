//! Admission policy hook
//!
//! The orchestrator is not a policy-decision engine: before a submission
//! commits, it consults an injected evaluator and acts on the verdict. The
//! evaluator is typically a client for an external governance service; the
//! default implementation allows everything so the scheduler is testable in
//! isolation.

use crate::types::JobSpec;
use crate::Result;

/// Verdict from the policy evaluator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny { reason: reason.into() }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// Synchronous allow/deny evaluation of a job submission
///
/// Returning `Err` means the evaluator itself is unreachable; whether that
/// fails the submission open or closed is the caller's configuration.
#[async_trait::async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn evaluate(&self, spec: &JobSpec) -> Result<PolicyDecision>;
}

/// Default evaluator: allows every submission
#[derive(Debug, Default, Clone)]
pub struct AllowAll;

#[async_trait::async_trait]
impl PolicyEvaluator for AllowAll {
    async fn evaluate(&self, _spec: &JobSpec) -> Result<PolicyDecision> {
        Ok(PolicyDecision::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobType, ResourceRequest};

    fn spec() -> JobSpec {
        JobSpec {
            name: "test".to_string(),
            tenant: "t1".to_string(),
            kind: JobType::Eval,
            priority: 0,
            request: ResourceRequest { gpus: 1, ..Default::default() },
            config: serde_json::Value::Null,
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_allow_all() {
        let decision = AllowAll.evaluate(&spec()).await.unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_deny_carries_reason() {
        let decision = PolicyDecision::deny("dataset not cleared");
        assert!(!decision.is_allowed());
        match decision {
            PolicyDecision::Deny { reason } => assert_eq!(reason, "dataset not cleared"),
            _ => unreachable!(),
        }
    }
}
