//! # orch-alloc
//!
//! Resource inventory, per-tenant quota accounting, and the allocator for
//! the OpenLoRA orchestrator.
//!
//! The three concerns live behind a single lock on purpose: every allocator
//! decision reads free capacity, flips accelerator flags, and charges the
//! tenant quota as one atomic step. Splitting the lock is where double
//! allocation bugs come from.

pub mod allocator;
pub mod inventory;
pub mod quota;

pub use allocator::Allocator;
pub use inventory::Inventory;
pub use quota::QuotaLedger;

pub use orch_core::{Error, Result};
