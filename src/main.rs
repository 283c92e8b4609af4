use anyhow::Result;
use clap::Parser;

use tackle::cli::commands::agent::AgentEventCommand;
use tackle::cli::commands::cleanup::CleanupCommand;
use tackle::cli::commands::status::{HealthCommand, StatusCommand};
use tackle::cli::commands::sync::{
    AutoSyncCommand, ConflictsCommand, DedupeCommand, ResolveCommand, SyncCommand,
};
use tackle::cli::commands::task::{ReviewCommand, ShipCommand, StartCommand};
use tackle::cli::commands::{show_how_to_get_work, with_service};
use tackle::cli::{Cli, Commands};
use tackle::config::TackleConfig;
use tackle::telemetry::init_telemetry;

fn main() -> Result<()> {
    let cli = Cli::parse();

    TackleConfig::load_env_file()?;
    let mut config = TackleConfig::load()?;
    if cli.json_logs {
        config.observability.json = true;
    }
    init_telemetry(&config.observability)?;

    let Some(command) = cli.command else {
        return show_how_to_get_work();
    };

    let sync_config = config.sync.clone();
    tokio::runtime::Runtime::new()?.block_on(async {
        with_service(&config, |service| async move {
            match command {
                Commands::Start { task } => StartCommand::new(task).execute(&service).await,
                Commands::Review { task } => ReviewCommand::new(task).execute(&service).await,
                Commands::Ship { task } => ShipCommand::new(task).execute(&service).await,
                Commands::Sync => SyncCommand.execute(&service).await,
                Commands::AutoSync => AutoSyncCommand::new(sync_config).execute(&service).await,
                Commands::Resolve { task, keep } => ResolveCommand::new(task, keep).execute(&service).await,
                Commands::Conflicts => ConflictsCommand.execute(&service),
                Commands::Dedupe { dry_run } => DedupeCommand::new(dry_run).execute(&service).await,
                Commands::Cleanup { dry_run, orphans } => {
                    CleanupCommand::new(dry_run, orphans).execute(&service).await
                }
                Commands::AgentEvent { kind, cwd } => {
                    AgentEventCommand::new(kind.into(), cwd).execute(&service).await
                }
                Commands::Status => StatusCommand.execute(&service).await,
                Commands::Health => HealthCommand.execute(&service),
            }
        })
        .await
    })
}
