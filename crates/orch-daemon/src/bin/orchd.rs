//! Main binary for the orchestrator daemon (orchd)

use clap::{Parser, Subcommand};
use orch_daemon::{init_logging, DaemonBuilder, DaemonConfig, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "orchd")]
#[command(about = "OpenLoRA resource orchestrator daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator
    Start {
        /// Override configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate default configuration
    Config {
        /// Output file path; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Start { ref config }) => {
            let config_path = config.clone().or(cli.config.clone());
            start(config_path, &cli).await
        }
        Some(Commands::Config { output }) => generate_config(output),
        Some(Commands::Validate { config }) => validate_config(config),
        None => {
            let config_path = cli.config.clone();
            start(config_path, &cli).await
        }
    }
}

async fn start(config_path: Option<PathBuf>, cli: &Cli) -> Result<()> {
    let mut config = match config_path {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };

    // Environment overrides, then CLI overrides
    config.apply_env();
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;

    init_logging(&config.logging)?;
    info!(
        http_port = config.network.http_port,
        grpc_port = config.network.grpc_port,
        "orchd starting"
    );

    let mut daemon = DaemonBuilder::new().with_config(config).build()?;
    daemon.run().await
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let config = DaemonConfig::default();
    match output {
        Some(path) => {
            config.to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        None => {
            let yaml = serde_yaml::to_string(&config)
                .map_err(|e| orch_daemon::DaemonError::Config(e.to_string()))?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

fn validate_config(path: PathBuf) -> Result<()> {
    let mut config = DaemonConfig::from_file(&path)?;
    config.apply_env();
    config.validate()?;
    println!("Configuration {} is valid", path.display());
    Ok(())
}
