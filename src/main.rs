// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use datachat::config::{default_config_path, AppConfig};
use datachat::engine::llm::LlmEngine;
use datachat::{
    token, AnswerRenderer, Backends, QueryOrchestrator, SecurityPipeline, Server, SessionRegistry,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "datachat")]
#[command(version = VERSION)]
#[command(about = "Session-scoped, security-gated chat over tabular datasets.")]
#[command(long_about = "datachat - chat with your data\n\n\
    Start the server:    datachat (or: datachat serve)\n\
    Show config:         datachat config show\n\
    Generate a token:    datachat token")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to ~/.datachat/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind to. Use 0.0.0.0 for network access.
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },

    /// Print one freshly generated session-style token
    Token,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration (keys masked)
    Show,
    /// Print the default config file location
    Path,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_orchestrator(config: &AppConfig) -> Result<QueryOrchestrator> {
    let backends = Backends::new(
        Arc::new(LlmEngine::new(&config.engine.openai)?),
        Arc::new(LlmEngine::new(&config.engine.bamboo)?),
    );
    let registry = SessionRegistry::new(
        config.sessions.registry_config(),
        config.engine.session_settings(),
        backends,
    );
    let pipeline = SecurityPipeline::from_config(&config.security);
    tracing::info!(
        enabled = pipeline.is_enabled(),
        input = ?pipeline.input_names(),
        output = ?pipeline.output_names(),
        "Security pipeline configured"
    );

    let orchestrator = QueryOrchestrator::new(
        Arc::new(registry),
        Arc::new(pipeline),
        AnswerRenderer::new(config.server.render_config()),
    );
    Ok(match config.engine.query_timeout() {
        Some(timeout) => orchestrator.with_query_timeout(timeout),
        None => orchestrator,
    })
}

async fn serve(mut config: AppConfig, port: Option<u16>, bind: Option<String>) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }

    if config.engine.openai.api_key.is_none() {
        tracing::warn!("No OPENAI_API_KEY configured; queries will fail until one is set");
    }

    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let server = Server::new(config.server.port, orchestrator)
        .with_bind_address(config.server.bind_address.clone())
        .with_render_config(&config.server.render_config())
        .with_cleanup_interval(std::time::Duration::from_secs(config.sessions.cleanup_interval_secs))
        .with_request_timeout(config.engine.request_timeout());

    println!(
        "{} datachat v{} listening on {}",
        "[✓]".green(),
        VERSION,
        format!("http://{}:{}", config.server.bind_address, config.server.port).bold()
    );
    if config.security.enabled {
        println!("{} Content security enabled", "[✓]".green());
    } else {
        println!("{} Content security disabled (set DATACHAT_SECURITY=1 to enable)", "[!]".yellow());
    }

    server.start().await
}

fn show_config(config: &AppConfig, path: Option<&PathBuf>) -> Result<()> {
    let location = match path {
        Some(p) => p.clone(),
        None => default_config_path()?,
    };
    println!("{} {}", "Config file:".bold(), location.display());
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        None => serve(config, None, None).await,
        Some(Commands::Serve { port, bind }) => serve(config, port, bind).await,
        Some(Commands::Config { command }) => match command.unwrap_or(ConfigCommands::Show) {
            ConfigCommands::Show => show_config(&config, cli.config.as_ref()),
            ConfigCommands::Path => {
                println!("{}", default_config_path()?.display());
                Ok(())
            }
        },
        Some(Commands::Token) => {
            println!("{}", token::generate());
            Ok(())
        }
    }
}
