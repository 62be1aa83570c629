use clap::Parser;
use tracing_subscriber::EnvFilter;

use sandbox_controller::cli::{Cli, CrdAction, Commands};
use sandbox_controller::config::{load_file_config, Config};
use sandbox_controller::{commands, controller};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => commands::version::run()?,
        Commands::Check => commands::check::run().await?,
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
        Commands::Run { enable_leader_election, workers, namespace, config, shutdown_timeout_seconds, metrics_addr } => {
            let mut effective = Config { enable_leader_election, workers, namespace, shutdown_timeout_seconds, metrics_addr, ..Config::default() };
            if let Some(path) = config {
                effective = effective.merge_file(load_file_config(&path)?);
            }
            controller::run(effective).await?;
        }
    }

    Ok(())
}
