//! Engine transport seam.
//!
//! The engine host (a web view, a headless browser, a test double) provides a
//! way to push a command string to the engine and a stream of named messages
//! coming back. Nothing else reaches the engine.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use drawbridge_core::error::{DrawbridgeError, Result};

use crate::protocol::{BridgeCommand, BridgeEvent, EngineMessage};

/// Outbound half of the engine channel.
#[async_trait]
pub trait EngineTransport: Send + Sync + 'static {
    /// Deliver one encoded command to the engine.
    async fn send(&self, message: String) -> Result<()>;
}

/// Inbound half of the engine channel.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineMessage>;

/// In-process transport backed by channels.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl EngineTransport for ChannelTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| DrawbridgeError::Transport("engine endpoint closed".into()))
    }
}

/// The engine's side of a [`ChannelTransport`].
pub struct EngineEndpoint {
    commands: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<EngineMessage>,
}

impl EngineEndpoint {
    /// Next raw command string, `None` once the coordinator is gone.
    pub async fn next_raw(&mut self) -> Option<String> {
        self.commands.recv().await
    }

    /// Next decodable command, skipping anything that doesn't parse.
    pub async fn next_command(&mut self) -> Option<BridgeCommand> {
        while let Some(raw) = self.commands.recv().await {
            match BridgeCommand::decode(&raw) {
                Ok(cmd) => return Some(cmd),
                Err(e) => warn!(%e, "Engine endpoint skipped a command"),
            }
        }
        None
    }

    /// Send a raw named message, as a host relaying engine callbacks would.
    pub fn emit_message(&self, message: EngineMessage) -> Result<()> {
        self.events
            .send(message)
            .map_err(|_| DrawbridgeError::Transport("coordinator stopped listening".into()))
    }

    pub fn emit(&self, event: BridgeEvent) -> Result<()> {
        self.emit_message(event.encode()?)
    }
}

/// Build a connected transport, the coordinator's event stream, and the engine endpoint.
pub fn channel_transport() -> (ChannelTransport, EngineEvents, EngineEndpoint) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport { tx: cmd_tx },
        event_rx,
        EngineEndpoint {
            commands: cmd_rx,
            events: event_tx,
        },
    )
}
