//! portfolio-voice-daemon: Voice command daemon for the portfolio site
//!
//! The site's front end connects over a Unix socket and provides:
//! - The speech recognizer (as a recognizer bridge pushing transcripts)
//! - Navigation, scrolling and the help toast, driven by pushed events
//!
//! The daemon owns the voice command engine:
//! - Idle / Listening / Error state machine with session tokens
//! - Static command table matched against live transcripts
//! - IPC for status queries, toggling and event notifications

mod capture;
mod commands;
mod config;
mod engine;
mod events;
mod ipc;
mod lifecycle;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::{RecognizerRegistry, RemoteCapture, SpeechCapture, UnavailableCapture};
use crate::commands::EventActions;
use crate::config::Config;
use crate::engine::VoiceEngine;
use crate::events::{EngineEvent, EVENT_BUS_CAPACITY};
use crate::ipc::{EngineLink, Server};
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "portfolio-voice-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        language = %config.capture.language,
        voice_enabled = config.voice_enabled,
        "configuration loaded"
    );

    let mut shutdown = ShutdownSignal::new()?;

    // IPC clients -> engine
    let (input_tx, input_rx) = mpsc::channel(32);
    // Engine -> IPC clients and status tracking
    let (event_tx, _event_rx) = broadcast::channel::<EngineEvent>(EVENT_BUS_CAPACITY);

    let recognizers = RecognizerRegistry::new();
    let capture: Box<dyn SpeechCapture> = if config.voice_enabled {
        Box::new(RemoteCapture::new(recognizers.clone()))
    } else {
        warn!("speech capture disabled, voice commands are unavailable");
        Box::new(UnavailableCapture)
    };

    let mut engine = VoiceEngine::new(
        capture,
        Box::new(EventActions::new(event_tx.clone())),
        config.capture.clone(),
        event_tx.clone(),
    );
    info!(supported = engine.is_supported(), "voice engine created");

    let link = EngineLink {
        input_tx,
        event_tx: event_tx.clone(),
        recognizers,
        commands: Arc::new(engine.table().entries().to_vec()),
    };
    let server = Server::new(&config.socket_path, link)?;

    // Subscribe before the engine publishes its initial snapshot
    let status_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the engine (processes client inputs and capture signals)
        _ = engine.run(input_rx) => {
            info!("voice engine exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror engine snapshots into the served status
        _ = server.sync_status(status_rx) => {
            info!("status tracking exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    engine.stop();
    info!(status = %engine.status(), "voice engine released");
    server.shutdown().await;

    info!("portfolio-voice-daemon stopped");

    Ok(())
}
