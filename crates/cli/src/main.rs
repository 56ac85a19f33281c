use crate::{commands::Commands, env::Deployment, error::CliError};
use clap::Parser;
use connectors::{crm::RestCrmClient, store::fs::FsObjectStore, store::ObjectStore};
use engine_config::settings::SyncSettings;
use engine_core::state::StateStore;
use engine_runtime::invocation::SyncEngine;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;
mod output;

#[derive(Parser)]
#[command(name = "deltasync", version = "0.0.1", about = "Deadline-aware CSV to CRM synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync => {
            let deployment = Deployment::from_env()?;
            let settings = deployment.settings();
            let engine = build_engine(&deployment, settings)?;

            let summary = engine.run().await;
            output::print_summary(&summary);
            std::process::exit(output::exit_code(&summary.status));
        }
        Commands::Progress { file, json } => {
            let deployment = Deployment::from_env()?;
            let state = StateStore::new(state_bucket(&deployment));
            let checkpoint = state.load_checkpoint(&file).await?;

            match checkpoint {
                Some(checkpoint) if json => {
                    println!("{}", serde_json::to_string_pretty(&checkpoint).map_err(CliError::JsonSerialize)?);
                }
                Some(checkpoint) => output::print_progress_table(&checkpoint),
                None => println!("No checkpoint for '{file}'"),
            }
        }
        Commands::History => {
            let deployment = Deployment::from_env()?;
            let state = StateStore::new(state_bucket(&deployment));
            let history = state.load_history().await?;

            println!("{} file(s) processed", history.len());
            for key in history.iter() {
                println!("  {key}");
            }
        }
        Commands::TestConn => {
            let deployment = Deployment::from_env()?;

            let source = FsObjectStore::new(&deployment.source_bucket);
            source.list(&deployment.source_prefix).await?;
            println!("source bucket ok: {}", deployment.source_bucket.display());

            let state = StateStore::new(state_bucket(&deployment));
            state.probe().await?;
            println!("state bucket ok: {}", deployment.state_bucket.display());
        }
    }

    Ok(())
}

fn state_bucket(deployment: &Deployment) -> Arc<dyn ObjectStore> {
    Arc::new(FsObjectStore::new(&deployment.state_bucket))
}

fn build_engine(deployment: &Deployment, settings: SyncSettings) -> Result<SyncEngine, CliError> {
    let source = Arc::new(FsObjectStore::new(&deployment.source_bucket));
    let crm = RestCrmClient::new(
        &deployment.crm_base_url,
        &deployment.crm_token,
        settings.request_timeout,
    )
    .map_err(CliError::CrmClient)?;

    Ok(SyncEngine::new(
        source,
        state_bucket(deployment),
        Arc::new(crm),
        settings,
    ))
}
