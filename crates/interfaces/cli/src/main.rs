mod server;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::AppConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roleplay-server", version, about = "Conversational roleplay prompt-assembly backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP chat API (default).
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let Commands::Serve { config, bind } = cli.command.unwrap_or(Commands::Serve { config: None, bind: None });

    let config_path = config.unwrap_or_else(|| PathBuf::from("roleplay.toml"));
    let mut app_config = AppConfig::load_from(&config_path)?;
    if let Some(bind) = bind {
        app_config.server.bind_address = bind;
    }

    let state = runtime::AppState::init(app_config.clone()).await?;
    let router = server::build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&app_config.server.bind_address).await?;
    tracing::info!(address = %app_config.server.bind_address, "roleplay-server listening");

    let shutdown_state = state.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down, flushing vector store");
            if let Err(err) = shutdown_state.shutdown().await {
                tracing::error!(error = %err, "error flushing vector store on shutdown");
            }
        })
        .await?;

    Ok(())
}
