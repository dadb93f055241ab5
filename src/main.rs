use clap::Parser;
use council::cli::output::OutputMode;
use council::cli::{commands, Cli, Commands};
use council::config::AppConfig;
use council::service::CouncilService;
use std::path::Path;
use tracing::info;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = if Path::new(&cli.config).exists() {
        AppConfig::load_file(&cli.config)?
    } else {
        eprintln!("Config file {} not found, loading from config/ and environment", cli.config);
        AppConfig::load()?
    };
    if let Some(dry_run) = cli.dry_run {
        config.dry_run.enabled = dry_run;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::from_json_flag(cli.json);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Weekly { .. } | Commands::Pitch { .. } | Commands::Checkpoint { .. } => {
            init_logging(&config.logging);
        }
        Commands::Show(_) | Commands::Accounts | Commands::Schedule => init_logging_simple(),
    }

    info!(dry_run = config.dry_run.enabled, "starting council");
    let mut service = CouncilService::from_config(config).await?;

    match &cli.command {
        Commands::Weekly {
            research,
            snapshot,
            seed,
        } => {
            if let Some(seed) = seed {
                service = service.with_label_seed(*seed);
            }
            commands::weekly(&service, research, snapshot.as_deref(), mode).await?;
        }
        Commands::Pitch {
            agent,
            research,
            snapshot,
        } => {
            commands::pitch(&service, agent, research, snapshot.as_deref(), mode).await?;
        }
        Commands::Checkpoint { force } => {
            commands::checkpoint(&service, *force, mode).await?;
        }
        Commands::Show(cmd) => commands::show(&service, cmd, mode).await?,
        Commands::Accounts => commands::accounts(&service, mode)?,
        Commands::Schedule => commands::schedule(&service, mode)?,
    }

    Ok(())
}
