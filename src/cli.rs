use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sandbox-controller")]
#[command(about = "Sandbox orchestration controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// Run the reconciliation loop (the main operator entrypoint)
    Run {
        #[arg(long, default_value_t = true)]
        enable_leader_election: bool,

        #[arg(long, default_value_t = 4)]
        workers: usize,

        #[arg(long, default_value = "default")]
        namespace: String,

        /// Optional YAML file overriding the defaults above
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 30)]
        shutdown_timeout_seconds: u64,

        #[arg(long, default_value = "0.0.0.0:8080")]
        metrics_addr: String,
    },

    /// Manage the Sandbox/WarmPool/WarmPod/RuntimeEnvironment/SandboxProfile CRDs
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML for all five resource kinds to stdout
    Generate,

    /// Install the CRDs into the connected cluster
    Install,
}
