//! # orch-api
//!
//! The orchestrator's control surface: a REST API over HTTP/1.1 JSON and a
//! parallel gRPC service with the same semantics. Both delegate to the same
//! in-process [`Scheduler`](orch_sched::Scheduler) and
//! [`Allocator`](orch_alloc::Allocator); neither owns any state of its own.

pub mod grpc;
pub mod http;

pub use grpc::OrchestratorService;
pub use http::{router, serve_http, AppState};

pub use orch_core::{Error, Result};
