//! Itinera CLI entry point.

use anyhow::Result;
use clap::Parser;
use itinera::cli::{commands, Cli, Commands};
use itinera::config::Settings;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("itinera={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;

    // Ensure data directory exists
    std::fs::create_dir_all(settings.data_dir())?;

    // Execute command
    match &cli.command {
        Commands::Plan {
            request,
            confirm,
            confirm_all,
            session,
            script,
            json,
        } => {
            commands::run_plan(
                request,
                confirm,
                *confirm_all,
                session.clone(),
                script.clone(),
                *json,
                settings,
            )
            .await?;
        }

        Commands::Chat { session, script } => {
            commands::run_chat(session.clone(), script.clone(), settings).await?;
        }

        Commands::Replay { session, history } => {
            commands::run_replay(session, *history, settings).await?;
        }

        Commands::Sessions { action } => {
            commands::run_sessions(action.as_ref(), settings).await?;
        }

        Commands::Tools => {
            commands::run_tools(settings)?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host, *port, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, config_path, settings)?;
        }
    }

    Ok(())
}
