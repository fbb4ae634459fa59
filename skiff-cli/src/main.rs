//! CLI entry point for skiff

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use console::style;
use skiff_agent::AgentLoop;
use skiff_channels::{ChannelManager, ConsoleHandler};
use skiff_core::bus::MessageBus;
use skiff_core::config::{Config, ConfigLoader, LoggingConfig};
use skiff_core::logging::init_logging;
use skiff_core::utils::expand_tilde;
use skiff_providers::{LLMProvider, OpenAiClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "A message-driven AI assistant runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent gateway
    Gateway,
    /// Send a message to the agent
    Agent {
        /// Message to send
        #[arg(short, long)]
        message: Option<String>,
        /// Chat id for conversation continuity
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    match cli.command {
        Commands::Gateway => run_gateway(&loader).await?,
        Commands::Agent { message, session } => {
            if let Some(msg) = message {
                run_agent(&loader, &msg, session).await?;
            } else {
                println!("Use --message to provide a message");
                println!("Example: skiff agent --message 'Hello, world!'");
            }
        }
        Commands::Config => run_config(&loader)?,
    }

    Ok(())
}

/// Relative log directories live under the config directory
fn resolve_logging(loader: &ConfigLoader, config: &Config) -> LoggingConfig {
    let mut logging = config.logging.clone();
    let dir = expand_tilde(&logging.dir);
    let dir = if dir.is_absolute() {
        dir
    } else {
        loader.config_dir().join(dir)
    };
    logging.dir = dir.to_string_lossy().into_owned();
    logging
}

fn build_provider(config: &Config) -> Arc<dyn LLMProvider> {
    if config.provider.api_key.is_empty() {
        warn!("No provider api key configured; requests may be rejected");
    }
    Arc::new(OpenAiClient::from_config(config))
}

/// Run the gateway until Ctrl+C
async fn run_gateway(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    let _log_guard = init_logging(&resolve_logging(loader, &config));

    println!("{}", style("Starting skiff gateway...").bold().cyan());
    println!("Model: {}", config.agents.defaults.model);

    let bus = MessageBus::new(config.bus.capacity);
    let agent = AgentLoop::new(bus.clone(), build_provider(&config), &config);
    let channels = ChannelManager::new(&config.delivery);

    if config.channels.console.enabled {
        channels
            .register(Arc::new(RwLock::new(ConsoleHandler::new(
                &config.channels.console,
                bus.clone(),
            ))))
            .await;
    }
    if channels.list_channels().await.is_empty() {
        warn!("No channels enabled; replies will be dropped");
    }
    channels.start_all().await?;

    let outbound = bus
        .take_outbound_receiver()
        .ok_or_else(|| anyhow!("outbound receiver already taken"))?;
    let shutdown = CancellationToken::new();

    let router = {
        let channels = channels.clone();
        let cancel = shutdown.child_token();
        tokio::spawn(async move { channels.route_outbound(outbound, cancel).await })
    };
    let agent_handle = tokio::spawn(agent.clone().run(shutdown.child_token()));

    println!(
        "\n{}",
        style("Gateway is running. Press Ctrl+C to stop.").green()
    );
    tokio::signal::ctrl_c().await?;
    println!("\n{}", style("Shutting down...").yellow());

    // Closing the bus lets the loop finish and the router drain queued replies.
    bus.close();
    agent.shutdown();
    match tokio::time::timeout(SHUTDOWN_GRACE, agent_handle).await {
        Ok(Ok(Err(e))) => error!("Agent loop error: {}", e),
        Ok(Err(e)) => error!("Agent loop task failed: {}", e),
        Err(_) => warn!("Agent loop did not stop within {:?}", SHUTDOWN_GRACE),
        Ok(Ok(Ok(()))) => {}
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, router).await.is_err() {
        warn!("Outbound router did not drain within {:?}", SHUTDOWN_GRACE);
    }
    shutdown.cancel();

    if let Err(e) = channels.stop_all().await {
        error!("Failed to stop channels: {}", e);
    }
    info!("Gateway stopped");
    Ok(())
}

/// Process one message inline and print the reply
async fn run_agent(loader: &ConfigLoader, message: &str, session: Option<String>) -> Result<()> {
    let config = loader.load()?;
    let _log_guard = init_logging(&resolve_logging(loader, &config));

    let bus = MessageBus::new(config.bus.capacity);
    let agent = AgentLoop::new(bus, build_provider(&config), &config);
    let chat_id = session.unwrap_or_else(|| "direct".to_string());

    println!("{}", style("Processing...").cyan());
    let result = agent.process_direct(message, "cli", chat_id).await;
    agent.shutdown();

    match result {
        Ok(response) => {
            println!("\n{}", style("Response:").bold());
            println!("{}", response);
            Ok(())
        }
        Err(e) => {
            error!("Error processing message: {}", e);
            Err(anyhow!("Failed to process message: {}", e))
        }
    }
}

/// Print the effective configuration with secrets masked
fn run_config(loader: &ConfigLoader) -> Result<()> {
    let mut config = loader.load()?;
    if !config.provider.api_key.is_empty() {
        config.provider.api_key = mask_secret(&config.provider.api_key);
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}
