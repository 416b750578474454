//! Daemon lifecycle
//!
//! Wires the allocator, scheduler, and both control surfaces together and
//! runs them until a shutdown signal arrives. The scheduling tick, the
//! health sweeper, and the checkpoint writer are independent background
//! tasks holding references to the same scheduler.

use crate::checkpoint::Checkpoint;
use crate::config::DaemonConfig;
use crate::{DaemonError, Result};
use orch_alloc::Allocator;
use orch_api::{AppState, OrchestratorService};
use orch_core::{AllowAll, AuditSink, AuditStream, PolicyEvaluator, TracingAuditSink};
use orch_sched::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// The orchestrator daemon
pub struct Daemon {
    config: DaemonConfig,
    scheduler: Arc<Scheduler>,
    services: Vec<ServiceHandle>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// Handle to a running background service
struct ServiceHandle {
    name: String,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl Daemon {
    /// Start the background services and listeners.
    pub async fn start(&mut self) -> Result<()> {
        info!("starting OpenLoRA resource orchestrator");
        self.config.validate()?;

        // Replay a fresh checkpoint before the listeners open, so clients
        // never observe a half-restored registry.
        if self.config.checkpoint.enabled {
            Checkpoint::maybe_restore(
                &self.config.checkpoint.path,
                self.config.checkpoint.max_age_secs,
                &self.scheduler,
            )
            .await?;
        }

        self.spawn_tick_loop();
        self.spawn_sweep_loop();
        if self.config.checkpoint.enabled {
            self.spawn_checkpoint_loop();
        }
        self.spawn_http_server()?;
        self.spawn_grpc_server()?;

        info!("orchestrator started");
        Ok(())
    }

    /// Stop all services, writing a final checkpoint first.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping orchestrator");

        if self.config.checkpoint.enabled {
            let checkpoint = Checkpoint::capture(&self.scheduler).await;
            if let Err(e) = checkpoint.save(&self.config.checkpoint.path) {
                warn!(error = %e, "writing final checkpoint");
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        for service in self.services.drain(..) {
            service.handle.abort();
            match service.handle.await {
                Ok(Ok(())) => info!(service = %service.name, "service stopped"),
                Ok(Err(e)) => error!(service = %service.name, error = %e, "service stopped with error"),
                Err(e) if e.is_cancelled() => info!(service = %service.name, "service cancelled"),
                Err(e) => error!(service = %service.name, error = %e, "failed to stop service"),
            }
        }

        info!("orchestrator stopped");
        Ok(())
    }

    /// Run until a shutdown signal is received.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        tokio::select! {
            _ = shutdown_rx => {
                info!("received shutdown request");
            }
            _ = signal::ctrl_c() => {
                info!("received interrupt");
            }
            _ = Self::wait_for_termination() => {
                info!("received termination signal");
            }
        }

        self.stop().await
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    // -- background services -------------------------------------------------

    fn spawn_tick_loop(&mut self) {
        let scheduler = self.scheduler.clone();
        let interval = Duration::from_millis(self.config.scheduler.tick_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.tick().await;
            }
        });
        self.services.push(ServiceHandle { name: "scheduler-tick".to_string(), handle });
    }

    fn spawn_sweep_loop(&mut self) {
        let scheduler = self.scheduler.clone();
        let interval = Duration::from_millis(self.config.scheduler.sweep_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.sweep().await;
            }
        });
        self.services.push(ServiceHandle { name: "health-sweeper".to_string(), handle });
    }

    fn spawn_checkpoint_loop(&mut self) {
        let scheduler = self.scheduler.clone();
        let path = self.config.checkpoint.path.clone();
        let interval = Duration::from_secs(self.config.checkpoint.interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let checkpoint = Checkpoint::capture(&scheduler).await;
                if let Err(e) = checkpoint.save(&path) {
                    warn!(error = %e, path = %path.display(), "writing checkpoint");
                }
            }
        });
        self.services.push(ServiceHandle { name: "checkpointer".to_string(), handle });
    }

    fn spawn_http_server(&mut self) -> Result<()> {
        let addr = self.config.http_addr()?;
        let state = AppState::new(self.scheduler.clone());
        let handle = tokio::spawn(async move {
            orch_api::serve_http(addr, state)
                .await
                .map_err(|e| DaemonError::Service(format!("HTTP server: {}", e)))
        });
        self.services.push(ServiceHandle { name: "http".to_string(), handle });
        Ok(())
    }

    fn spawn_grpc_server(&mut self) -> Result<()> {
        let addr = self.config.grpc_addr()?;
        let service = OrchestratorService::new(self.scheduler.clone());
        let handle = tokio::spawn(async move {
            info!("gRPC server listening on {}", addr);
            tonic::transport::Server::builder()
                .add_service(service.into_server())
                .serve(addr)
                .await
                .map_err(DaemonError::Transport)
        });
        self.services.push(ServiceHandle { name: "grpc".to_string(), handle });
        Ok(())
    }

    /// Wait for termination signals (SIGTERM, SIGINT)
    #[cfg(unix)]
    async fn wait_for_termination() {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "installing SIGTERM handler");
                std::future::pending::<()>().await;
                return;
            }
        };
        sigterm.recv().await;
    }

    #[cfg(not(unix))]
    async fn wait_for_termination() {
        // Only Ctrl+C is handled elsewhere on non-unix platforms
        std::future::pending::<()>().await;
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        for service in &self.services {
            service.handle.abort();
        }
    }
}

/// Builder for the daemon
pub struct DaemonBuilder {
    config: DaemonConfig,
    policy: Arc<dyn PolicyEvaluator>,
    audit_sink: Arc<dyn AuditSink>,
}

impl DaemonBuilder {
    pub fn new() -> Self {
        Self {
            config: DaemonConfig::default(),
            policy: Arc::new(AllowAll),
            audit_sink: Arc::new(TracingAuditSink),
        }
    }

    /// Set the daemon configuration
    pub fn with_config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a policy evaluator; defaults to allow-all
    pub fn with_policy(mut self, policy: Arc<dyn PolicyEvaluator>) -> Self {
        self.policy = policy;
        self
    }

    /// Inject an audit sink; defaults to the tracing log
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    /// Build the daemon
    pub fn build(self) -> Result<Daemon> {
        self.config.validate()?;

        let audit = AuditStream::new(self.audit_sink);
        let allocator = Arc::new(Allocator::new(audit.clone()));
        let scheduler = Arc::new(Scheduler::new(
            allocator,
            self.policy,
            audit,
            self.config.scheduler_config(),
        ));

        Ok(Daemon {
            config: self.config,
            scheduler,
            services: Vec::new(),
            shutdown_tx: None,
        })
    }
}

impl Default for DaemonBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_core::{JobSpec, JobType, ResourceRequest};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builder_wires_config_through() {
        let mut config = DaemonConfig::default();
        config.scheduler.reap_after_secs = 120;

        let daemon = DaemonBuilder::new().with_config(config).build().unwrap();
        assert_eq!(daemon.scheduler().config().reap_after_secs, 120);
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let mut config = DaemonConfig::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(DaemonBuilder::new().with_config(config).build().is_err());
    }

    #[tokio::test]
    async fn test_stop_writes_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = DaemonConfig::default();
        config.checkpoint.enabled = true;
        config.checkpoint.path = temp_dir.path().join("checkpoint.json");
        // Ports irrelevant: start() is never called, only stop()
        let mut daemon = DaemonBuilder::new().with_config(config).build().unwrap();

        daemon
            .scheduler()
            .submit(JobSpec {
                name: "j".to_string(),
                tenant: "t1".to_string(),
                kind: JobType::Eval,
                priority: 0,
                request: ResourceRequest { gpus: 1, ..Default::default() },
                config: serde_json::Value::Null,
                max_retries: 0,
            })
            .await
            .unwrap();

        daemon.stop().await.unwrap();

        let checkpoint = Checkpoint::load(&daemon.config().checkpoint.path)
            .unwrap()
            .unwrap();
        assert_eq!(checkpoint.jobs.len(), 1);
    }
}
