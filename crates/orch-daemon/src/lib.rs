//! # orch-daemon
//!
//! The orchestrator daemon (`orchd`): configuration loading with environment
//! overrides, the checkpoint hook, and the process lifecycle that wires the
//! allocator, scheduler, and both control surfaces together.

pub mod checkpoint;
pub mod config;
pub mod daemon;

pub use checkpoint::Checkpoint;
pub use config::DaemonConfig;
pub use daemon::{Daemon, DaemonBuilder};

/// Error handling for the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] orch_core::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Initialize logging and tracing from the daemon configuration
pub fn init_logging(config: &config::LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.format.as_str() {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }

    Ok(())
}
