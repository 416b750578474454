//! Configuration management for the orchestrator daemon
//!
//! Configuration comes from three layers, later ones winning: built-in
//! defaults, an optional YAML file, and the environment variables the
//! deployment recognizes (`HTTP_PORT`, `GRPC_PORT`, `TICK_INTERVAL_MS`,
//! `HEARTBEAT_TIMEOUT_S`, `REAP_AFTER_S`).

use orch_sched::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::warn;

/// Complete configuration for the orchestrator daemon
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Network configuration
    pub network: NetworkConfig,

    /// Scheduler timing and policy
    pub scheduler: SchedulerSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Checkpoint hook configuration
    pub checkpoint: CheckpointConfig,
}

/// Listener addresses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host both listeners bind to
    pub bind_host: String,

    /// HTTP listen port
    pub http_port: u16,

    /// gRPC listen port
    pub grpc_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            http_port: 8081,
            grpc_port: 50051,
        }
    }
}

/// Scheduler timing and policy knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Scheduling tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// Health sweep interval in milliseconds
    pub sweep_interval_ms: u64,

    /// Heartbeat age after which a node is marked unhealthy, in seconds
    pub heartbeat_timeout_secs: i64,

    /// Unhealthy age after which stranded jobs are reaped, in seconds
    pub reap_after_secs: i64,

    /// Allow submissions through when the policy evaluator is unreachable
    pub policy_fail_open: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            sweep_interval_ms: 5000,
            heartbeat_timeout_secs: 30,
            reap_after_secs: 600,
            policy_fail_open: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Checkpoint hook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Enable the checkpoint hook
    pub enabled: bool,

    /// Checkpoint file location
    pub path: PathBuf,

    /// How often to write a checkpoint, in seconds
    pub interval_secs: u64,

    /// Only replay a checkpoint younger than this on boot, in seconds
    pub max_age_secs: i64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("/var/lib/openlora/orchestrator.checkpoint.json"),
            interval_secs: 15,
            max_age_secs: 60,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::DaemonError::Config(format!("Failed to read config file: {}", e)))?;

        let config: DaemonConfig = serde_yaml::from_str(&content)
            .map_err(|e| crate::DaemonError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> crate::Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| crate::DaemonError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::DaemonError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Overlay the recognized environment variables onto this configuration
    pub fn apply_env(&mut self) {
        if let Some(port) = env_parse::<u16>("HTTP_PORT") {
            self.network.http_port = port;
        }
        if let Some(port) = env_parse::<u16>("GRPC_PORT") {
            self.network.grpc_port = port;
        }
        if let Some(ms) = env_parse::<u64>("TICK_INTERVAL_MS") {
            self.scheduler.tick_interval_ms = ms;
        }
        if let Some(secs) = env_parse::<i64>("HEARTBEAT_TIMEOUT_S") {
            self.scheduler.heartbeat_timeout_secs = secs;
        }
        if let Some(secs) = env_parse::<i64>("REAP_AFTER_S") {
            self.scheduler.reap_after_secs = secs;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(crate::DaemonError::Config(
                "tick interval must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.heartbeat_timeout_secs <= 0 {
            return Err(crate::DaemonError::Config(
                "heartbeat timeout must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.reap_after_secs <= 0 {
            return Err(crate::DaemonError::Config(
                "reap window must be greater than 0".to_string(),
            ));
        }
        if self.network.http_port == self.network.grpc_port {
            return Err(crate::DaemonError::Config(
                "HTTP and gRPC ports must differ".to_string(),
            ));
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(crate::DaemonError::Config(format!(
                    "Invalid log level: {}",
                    other
                )))
            }
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(crate::DaemonError::Config(format!(
                    "Invalid log format: {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// The scheduler configuration slice
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_ms: self.scheduler.tick_interval_ms,
            heartbeat_timeout_secs: self.scheduler.heartbeat_timeout_secs,
            reap_after_secs: self.scheduler.reap_after_secs,
            policy_fail_open: self.scheduler.policy_fail_open,
        }
    }

    /// HTTP listener address
    pub fn http_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.network.bind_host, self.network.http_port)
            .parse()
            .map_err(|e| crate::DaemonError::Config(format!("Invalid HTTP bind address: {}", e)))
    }

    /// gRPC listener address
    pub fn grpc_addr(&self) -> crate::Result<SocketAddr> {
        format!("{}:{}", self.network.bind_host, self.network.grpc_port)
            .parse()
            .map_err(|e| crate::DaemonError::Config(format!("Invalid gRPC bind address: {}", e)))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(var = name, value = %raw, "ignoring unparseable environment override");
                None
            }
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.http_port, 8081);
        assert_eq!(config.network.grpc_port, 50051);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.scheduler.heartbeat_timeout_secs, 30);
        assert_eq!(config.scheduler.reap_after_secs, 600);
        assert!(!config.scheduler.policy_fail_open);
        assert!(!config.checkpoint.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation() {
        let mut config = DaemonConfig::default();
        config.scheduler.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.network.grpc_port = config.network.http_port;
        assert!(config.validate().is_err());

        let mut config = DaemonConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");

        let mut config = DaemonConfig::default();
        config.network.http_port = 9191;
        config.scheduler.reap_after_secs = 120;
        config.to_file(&path).unwrap();

        let loaded = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(loaded.network.http_port, 9191);
        assert_eq!(loaded.scheduler.reap_after_secs, 120);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "network:\n  http_port: 9000\n").unwrap();

        let loaded = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(loaded.network.http_port, 9000);
        assert_eq!(loaded.network.grpc_port, 50051);
        assert_eq!(loaded.scheduler.tick_interval_ms, 1000);
    }

    #[test]
    fn test_addresses() {
        let config = DaemonConfig::default();
        assert_eq!(config.http_addr().unwrap().port(), 8081);
        assert_eq!(config.grpc_addr().unwrap().port(), 50051);
    }
}
