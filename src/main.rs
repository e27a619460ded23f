//! appointment-dialogue: voice-driven daemon for scheduling a meeting
//!
//! The daemon collects a person, a day, whether the meeting takes the whole
//! day and, if not, a time; then it asks for confirmation and starts over.
//!
//! - Dialogue state machine driving speak/listen turns
//! - Console speech adapter standing in for TTS/ASR
//! - IPC server for the UI start button and status inspection

mod adapter;
mod config;
mod dialogue;
mod events;
mod ipc;
mod lifecycle;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapter::ConsoleAdapter;
use crate::config::Config;
use crate::dialogue::{BroadcastObserver, DialogueInput, DialogueMachine, LogObserver, Vocabulary};
use crate::events::DialogueEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the console adapter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "appointment-dialogue starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, autostart = config.autostart, "configuration loaded");

    let vocabulary = match &config.vocabulary_path {
        Some(path) => Vocabulary::load(path)
            .with_context(|| format!("failed to load vocabulary from {}", path.display()))?,
        None => Vocabulary::builtin(),
    };
    info!(phrases = vocabulary.len(), "vocabulary ready");

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Adapter and UI -> dialogue machine
    let (input_tx, input_rx) = mpsc::channel::<DialogueInput>(32);
    // Dialogue machine -> adapter
    let (directive_tx, directive_rx) = mpsc::channel(32);
    // Dialogue machine -> observers (IPC, status)
    let (event_tx, _event_rx) = broadcast::channel::<DialogueEvent>(64);

    let mut machine = DialogueMachine::new(Arc::new(vocabulary))
        .with_observer(LogObserver)
        .with_observer(BroadcastObserver::new(event_tx.clone()));

    let adapter = ConsoleAdapter::new(config.adapter.clone(), input_tx.clone());
    let adapter_task = adapter.start(directive_rx)?;

    let server = Server::new(&config.socket_path, input_tx.clone(), event_tx.clone())?;

    let mut status_rx = event_tx.subscribe();
    let server_for_events = &server;
    let autostart = config.autostart;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = machine.run(input_rx, directive_tx) => {
            info!("dialogue machine exited");
        }

        // The adapter stops on end of input or an I/O error; nothing
        // else can drive the dialogue after that
        result = adapter_task => {
            match result {
                Ok(()) => info!("speech adapter exited"),
                Err(e) => error!(?e, "speech adapter task failed"),
            }
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror transitions into the IPC status and handle autostart
        _ = async {
            loop {
                match status_rx.recv().await {
                    Ok(DialogueEvent::Transition { to, session, .. }) => {
                        server_for_events.set_status(&to, &session).await;
                        if autostart && to == "WaitToStart" && input_tx.send(DialogueInput::Click).await.is_err() {
                            break;
                        }
                    }
                    Ok(event @ DialogueEvent::AppointmentCreated { .. }) => {
                        info!(%event, "appointment confirmed");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "dialogue event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("dialogue event handler exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!(
        state = %machine.state(),
        session = ?machine.session(),
        "shutting down..."
    );

    adapter.stop();
    server.shutdown().await;

    info!("appointment-dialogue stopped");

    Ok(())
}
