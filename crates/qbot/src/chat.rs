// SPDX-FileCopyrightText: 2026 Qbot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `qbot chat` command implementation.
//!
//! Wires the configured transport, the session store and the client actor
//! together, then runs a readline loop. Transcript updates are rendered by a
//! separate task that follows the event bus.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use qbot_bus::EventBus;
use qbot_config::model::BotSeedConfig;
use qbot_config::QbotConfig;
use qbot_core::{Message, QbotError, TransportKind};
use qbot_engine::{
    ChatClient, ChatHandle, ClientOptions, FileSnapshot, Reconciler, ReconcilerOptions,
    SessionStore,
};
use qbot_transport::{TokenCell, TokenClient};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::render::Renderer;

/// Runs the `qbot chat` interactive loop until `/quit` or end of input.
pub async fn run_chat(
    config: QbotConfig,
    bot: Option<String>,
    history: Option<PathBuf>,
) -> Result<(), QbotError> {
    let bus = Arc::new(EventBus::new());
    let render_task = spawn_renderer(&bus);

    let token = TokenCell::new();
    if config.client.access == TransportKind::Socket {
        let client = TokenClient::new(
            config.token.endpoint.clone(),
            Duration::from_secs(config.token.timeout_secs),
        )?;
        let cell = token.clone();
        tokio::spawn(async move {
            // Failure is logged inside; the socket simply stays idle.
            let _ = client.bootstrap(&cell).await;
        });
    }
    let transport = qbot_transport::from_config(&config, token, Arc::clone(&bus))?;

    let injected = injected_bot(bot.as_deref(), config.bot.as_ref())?;
    let mut session = SessionStore::new(
        Box::new(FileSnapshot::new(&config.storage.snapshot_path)),
        Arc::clone(&bus),
    );
    session.initialize(injected.as_ref());
    info!(session_id = %session.session_id(), access = %config.client.access, "chat session starting");

    let reconciler = Reconciler::new(session, Arc::clone(&bus), ReconcilerOptions::from(&config.client));
    let (handle, task) = ChatClient::spawn(
        reconciler,
        transport,
        Arc::clone(&bus),
        ClientOptions {
            send_timeout: Duration::from_secs(config.client.send_timeout_secs),
        },
    );

    if let Some(path) = history {
        handle.load_history(load_history_file(&path)?)?;
    }

    let result = repl(&handle).await;

    if let Err(e) = handle.shutdown() {
        warn!(error = %e, "client already closed");
    }
    if let Err(e) = task.await {
        warn!(error = %e, "client task ended abnormally");
    }
    render_task.abort();
    println!("{}", "goodbye".dimmed());
    result
}

async fn repl(handle: &ChatHandle) -> Result<(), QbotError> {
    let mut rl = DefaultEditor::new()
        .map_err(|e| QbotError::Internal(format!("failed to initialize readline: {e}")))?;

    println!("{}", "qbot chat".bold().green());
    println!(
        "Type {} to stop a reply, {} to exit.\n",
        "/stop".yellow(),
        "/quit".yellow()
    );

    let prompt = format!("{}> ", "you".green());
    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);
                match trimmed {
                    "/quit" | "/exit" => break,
                    "/stop" => {
                        if handle.stop().await?.is_none() {
                            println!("{}", "nothing is streaming".dimmed());
                        }
                    }
                    "/dump" => {
                        let snapshot = handle.snapshot().await?;
                        let pretty = serde_json::to_string_pretty(&snapshot)
                            .map_err(|e| QbotError::Internal(format!("failed to render transcript: {e}")))?;
                        println!("{pretty}");
                    }
                    text => {
                        if let Err(e) = handle.send(text).await {
                            eprintln!("{}: {e}", "error".red());
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "error".red());
                break;
            }
        }
    }
    Ok(())
}

fn spawn_renderer(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut events = bus.stream();
    tokio::spawn(async move {
        let mut renderer = Renderer::new();
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    for line in renderer.render(&envelope.event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "renderer fell behind the bus"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Bot metadata from `--bot` if given, else from the `[bot]` config section.
fn injected_bot(arg: Option<&str>, seed: Option<&BotSeedConfig>) -> Result<Option<Value>, QbotError> {
    match arg {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| QbotError::Config(format!("--bot is not valid JSON: {e}"))),
        None => Ok(seed.map(BotSeedConfig::to_json)),
    }
}

fn load_history_file(path: &Path) -> Result<Vec<Message>, QbotError> {
    let raw = std::fs::read_to_string(path).map_err(|e| QbotError::Config(format!(
        "cannot read history file {}: {e}",
        path.display()
    )))?;
    serde_json::from_str(&raw).map_err(|e| QbotError::malformed("history", e))
}
