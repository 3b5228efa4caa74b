// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! qbot - terminal chat client for qbot conversational bots.
//!
//! This is the binary entry point.

mod chat;
mod render;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use qbot_config::QbotConfig;
use qbot_core::TransportKind;
use qbot_transport::TokenClient;

/// qbot - chat with a bot from the terminal.
#[derive(Parser, Debug)]
#[command(name = "qbot", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive chat session.
    Chat {
        /// Transport override: `ws` or `sse`.
        #[arg(long)]
        access: Option<TransportKind>,

        /// Initial bot metadata as a JSON object.
        #[arg(long)]
        bot: Option<String>,

        /// JSON file with earlier messages to show before the session starts.
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Fetch an access token from the token endpoint and print it.
    Token,
    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => qbot_config::load_and_validate_path(path),
        None => qbot_config::load_and_validate(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            qbot_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Chat {
            access,
            bot,
            history,
        }) => {
            if let Some(access) = access {
                config.client.access = access;
            }
            init_tracing(&config.client.log_level);
            chat::run_chat(config, bot, history).await
        }
        Some(Commands::Token) => {
            init_tracing(&config.client.log_level);
            print_token(&config).await
        }
        Some(Commands::Config) => print_config(&config),
        None => {
            println!("qbot: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {e}", "error".red());
        std::process::exit(1);
    }
}

/// Logs go to stderr so the transcript on stdout stays readable.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("qbot={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

async fn print_token(config: &QbotConfig) -> Result<(), qbot_core::QbotError> {
    let client = TokenClient::new(
        config.token.endpoint.clone(),
        Duration::from_secs(config.token.timeout_secs),
    )?;
    let issued = client.fetch().await?;
    println!("{}", issued.token);
    println!("{}", format!("expires at {}", issued.expire_time).dimmed());
    Ok(())
}

fn print_config(config: &QbotConfig) -> Result<(), qbot_core::QbotError> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| qbot_core::QbotError::Internal(format!("failed to render config: {e}")))?;
    print!("{rendered}");
    Ok(())
}
