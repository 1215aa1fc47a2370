//! kobo-companion service binary.
//!
//! `serve` wires the components in dependency order: config, shared HTTP
//! client, generator, diagram pipeline, Telegram gateway with identity
//! fetch and webhook registration, conversation router, scheduler. It then
//! runs the axum server until interrupted, draining background tasks on
//! the way out. `check-config` validates the environment and prints a
//! redacted summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use kobo_companion::companion::diagram::DiagramPipeline;
use kobo_companion::companion::generator::TextGenerator;
use kobo_companion::config::CompanionConfig;
use kobo_companion::logging;
use kobo_companion::server::{build_router, AppState};
use kobo_companion::tasks::{TaskScheduler, DEFAULT_DRAIN_TIMEOUT};
use kobo_companion::telegram::gateway::TelegramGateway;
use kobo_companion::telegram::router::ConversationRouter;

/// Timeout applied to every outbound HTTP request.
const OUTBOUND_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "kobo-companion", version, about = "Kobo reading-companion backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (the default).
    Serve {
        /// Directory for rotated JSON log files; stderr-only when omitted.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Validate configuration and print a redacted summary.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve { log_dir: None }) {
        Command::Serve { log_dir } => serve(log_dir).await,
        Command::CheckConfig => {
            logging::init(None)?;
            check_config()
        }
    }
}

fn check_config() -> anyhow::Result<()> {
    let config = CompanionConfig::from_env().context("configuration invalid")?;
    println!("{config:#?}");
    println!();
    println!("text model:       {}", on_off(config.text_model.is_some()));
    println!("image model:      {}", on_off(config.image_model_id.is_some()));
    println!("diagram renderer: {}", on_off(config.renderer_base_url.is_some()));
    println!("messaging:        {}", on_off(config.messaging.is_some()));
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

async fn serve(log_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let _logging_guard = logging::init(log_dir.as_deref())?;

    let config = Arc::new(CompanionConfig::from_env().context("configuration invalid")?);
    info!(bind = %config.bind_addr, "kobo-companion starting");

    let http = reqwest::Client::builder()
        .timeout(OUTBOUND_HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")?;

    let generator = config
        .text_model
        .as_ref()
        .map(|text_model| TextGenerator::new(text_model, http.clone()));
    if generator.is_none() {
        warn!("text model not configured; device replies will be 503");
    }

    let diagrams = Arc::new(DiagramPipeline::new(&config, http, generator.clone()));
    let scheduler = Arc::new(TaskScheduler::with_defaults());

    let (gateway, conversation) = match config.messaging {
        Some(ref messaging) => {
            let gateway = Arc::new(TelegramGateway::new(messaging.bot_token.expose()));
            let identity = gateway
                .bot_identity()
                .await
                .context("failed to fetch bot identity")?
                .clone();
            gateway
                .register_webhook(messaging.webhook_url.clone())
                .await
                .context("failed to register webhook")?;
            info!(bot = %identity.username, chat_id = messaging.chat_id, "telegram gateway ready");

            let conversation = Arc::new(ConversationRouter::new(
                Arc::clone(&gateway),
                generator.clone(),
                Arc::clone(&diagrams),
                messaging.chat_id,
                identity,
            ));
            (Some(gateway), Some(conversation))
        }
        None => {
            info!("messaging not configured; running device endpoints only");
            (None, None)
        }
    };

    let state = AppState {
        config: Arc::clone(&config),
        generator,
        diagrams,
        gateway,
        conversation,
        scheduler: Arc::clone(&scheduler),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down; draining background tasks");
    scheduler.shutdown(DEFAULT_DRAIN_TIMEOUT).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}
