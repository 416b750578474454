//! # orch-sched
//!
//! Job queue and scheduler for the OpenLoRA orchestrator.
//!
//! The queue is a priority heap with a back-index so mid-queue cancellation
//! stays O(log n). The scheduler owns the job registry, drives the periodic
//! scheduling tick, and mediates the whole job lifecycle: submission through
//! the policy hook, placement through the allocator, completion, fixed-count
//! retry, queued-phase deadlines, and the reaping of jobs stranded on lost
//! nodes.

pub mod queue;
pub mod scheduler;

pub use queue::{JobQueue, QueueEntry};
pub use scheduler::{Scheduler, SchedulerConfig};

pub use orch_core::{Error, Result};
