//! Canvas bridge coordinator: owns one engine session.
//!
//! A background task holds the transport, the load lifecycle, the tool
//! debouncer and the export pipeline. [`CanvasCoordinator`] is the handle the
//! UI layer talks to; its async calls resolve when the matching engine event
//! arrives.
//!
//! Load lifecycle:
//!
//! ```text
//! Uninitialized ─load─▶ Loading(doc) ─sceneReady(doc)─▶ Ready(doc) ─load─▶ Loading(doc') …
//!        └──────────── transport failure from anywhere ────────────▶ Failed
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use drawbridge_core::config::Config;
use drawbridge_core::error::{DrawbridgeError, Result};
use drawbridge_core::scene::SceneDescriptor;
use drawbridge_core::types::Document;

use crate::debounce::Debouncer;
use crate::export::{self, ExportArtifact, ExportPipeline, ExportRequest};
use crate::protocol::{
    ArtifactKind, BridgeCommand, BridgeEvent, EngineMessage, ImageFormat, Token, Tool,
};
use crate::transport::{EngineEvents, EngineTransport};

/// The document the engine should be showing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveDocument {
    pub id: Uuid,
    pub name: String,
    pub scene: SceneDescriptor,
}

impl ActiveDocument {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let raw = doc
            .content
            .as_deref()
            .ok_or_else(|| DrawbridgeError::MalformedScene(format!("document {} has no content", doc.id)))?;
        let scene = SceneDescriptor::parse(raw)
            .ok_or_else(|| DrawbridgeError::MalformedScene(format!("document {} is not a scene", doc.id)))?;
        Ok(Self {
            id: doc.id,
            name: doc.name.clone(),
            scene,
        })
    }
}

/// Observable coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Loading { document_id: Uuid },
    Ready { document_id: Uuid },
    Failed { reason: String },
}

impl CoordinatorState {
    /// Whether the UI should show its loading indicator.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Loading { .. })
    }

    pub fn ready_document(&self) -> Option<Uuid> {
        match self {
            Self::Ready { document_id } => Some(*document_id),
            _ => None,
        }
    }
}

/// Elements reported by the engine for a document.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSnapshot {
    pub document_id: Uuid,
    pub elements: Vec<Value>,
}

/// Coordinator timing and output settings.
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub tool_debounce: Duration,
    pub load_timeout: Duration,
    pub export_timeout: Duration,
    pub export_dir: PathBuf,
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tool_debounce: config.tool_debounce(),
            load_timeout: config.load_timeout(),
            export_timeout: config.export_timeout(),
            export_dir: config.export_dir(),
        }
    }
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Request {
    Load {
        document: ActiveDocument,
        reply: oneshot::Sender<Result<()>>,
    },
    ToggleTool {
        key: String,
    },
    FlushTools,
    Export {
        token: Token,
        format: ImageFormat,
        embed_scene: bool,
        reply: oneshot::Sender<Result<ExportArtifact>>,
    },
    CancelExport {
        token: Option<Token>,
    },
    Shutdown,
}

const SCENE_CHANNEL_CAPACITY: usize = 64;

/// Handle to a running coordinator. Clones talk to the same engine session.
#[derive(Clone)]
pub struct CanvasCoordinator {
    tx: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<CoordinatorState>,
    scenes: broadcast::Sender<SceneSnapshot>,
    load_timeout: Duration,
    export_timeout: Duration,
}

fn session_gone() -> DrawbridgeError {
    DrawbridgeError::BridgeNotReady("no engine session".into())
}

impl CanvasCoordinator {
    /// Start a coordinator that owns `transport` and consumes `events`.
    pub fn spawn(
        transport: impl EngineTransport,
        events: EngineEvents,
        options: CoordinatorOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Uninitialized);
        let (scenes, _) = broadcast::channel(SCENE_CHANNEL_CAPACITY);

        let handle = Self {
            tx,
            state: state_rx,
            scenes: scenes.clone(),
            load_timeout: options.load_timeout,
            export_timeout: options.export_timeout,
        };

        let session = BridgeSession {
            transport: Box::new(transport),
            tools: Debouncer::new(options.tool_debounce),
            export_dir: options.export_dir,
            state_tx,
            scenes,
            active: None,
            pending_load: None,
            queued_tool: None,
            export: ExportPipeline::new(),
            export_reply: None,
            failure: None,
        };
        tokio::spawn(session.run(rx, events));
        handle
    }

    fn request(&self, request: Request) -> Result<()> {
        self.tx.send(request).map_err(|_| session_gone())
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.borrow().clone()
    }

    /// Watch state transitions (e.g. to drive a loading indicator).
    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.clone()
    }

    /// Scene edits reported by the engine.
    pub fn subscribe_scenes(&self) -> broadcast::Receiver<SceneSnapshot> {
        self.scenes.subscribe()
    }

    /// Make `document` the active document and wait until the engine shows it.
    ///
    /// Resolves with `Cancelled` if a newer load supersedes this one, and with
    /// `Timeout` if the engine stays silent; in that case the coordinator keeps
    /// waiting in `Loading`.
    pub async fn load_document(&self, document: ActiveDocument) -> Result<()> {
        let document_id = document.id;
        let (reply, rx) = oneshot::channel();
        self.request(Request::Load { document, reply })?;
        match tokio::time::timeout(self.load_timeout, rx).await {
            Ok(result) => result.map_err(|_| session_gone())?,
            Err(_) => {
                warn!(%document_id, "Scene load timed out");
                Err(DrawbridgeError::Timeout(format!(
                    "engine did not load document {document_id}"
                )))
            }
        }
    }

    /// Queue a toolbar key press. Rapid presses collapse into the last one.
    pub fn toggle_tool(&self, key: impl Into<String>) -> Result<()> {
        self.request(Request::ToggleTool { key: key.into() })
    }

    pub fn select_tool(&self, tool: Tool) -> Result<()> {
        self.toggle_tool(tool.key())
    }

    /// Forward a queued key press without waiting out the debounce window.
    pub fn flush_tools(&self) -> Result<()> {
        self.request(Request::FlushTools)
    }

    /// Export the active document and wait for the artifact.
    pub async fn export_image(
        &self,
        format: ImageFormat,
        embed_scene: bool,
    ) -> Result<ExportArtifact> {
        let token = Token::new();
        let (reply, rx) = oneshot::channel();
        self.request(Request::Export {
            token,
            format,
            embed_scene,
            reply,
        })?;
        match tokio::time::timeout(self.export_timeout, rx).await {
            Ok(result) => result.map_err(|_| session_gone())?,
            Err(_) => {
                warn!(%token, "Export timed out");
                let _ = self.request(Request::CancelExport { token: Some(token) });
                Err(DrawbridgeError::Timeout(format!("export {token}")))
            }
        }
    }

    /// Abandon whatever export is in flight; its caller gets `Cancelled`.
    pub fn cancel_export(&self) -> Result<()> {
        self.request(Request::CancelExport { token: None })
    }

    /// End the engine session. Outstanding calls resolve with `BridgeNotReady`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
    }
}

struct PendingLoad {
    document_id: Uuid,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

struct BridgeSession {
    transport: Box<dyn EngineTransport>,
    tools: Debouncer<String>,
    export_dir: PathBuf,
    state_tx: watch::Sender<CoordinatorState>,
    scenes: broadcast::Sender<SceneSnapshot>,
    /// Most recently requested document, with the latest elements the engine reported.
    active: Option<ActiveDocument>,
    pending_load: Option<PendingLoad>,
    /// Tool key that matured while the engine wasn't ready.
    queued_tool: Option<String>,
    export: ExportPipeline,
    export_reply: Option<(Token, oneshot::Sender<Result<ExportArtifact>>)>,
    failure: Option<String>,
}

impl BridgeSession {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut events: EngineEvents,
    ) {
        info!("Canvas coordinator started");
        loop {
            // Requests first: a caller's calls are applied before any engine event that follows them
            tokio::select! {
                biased;
                req = requests.recv() => match req {
                    Some(Request::Shutdown) | None => break,
                    Some(req) => self.handle_request(req).await,
                },
                msg = events.recv(), if self.failure.is_none() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => self.fail("engine event channel closed"),
                },
                key = self.tools.ready(), if self.failure.is_none() => {
                    self.forward_tool(key).await;
                }
            }
        }
        self.close();
        info!("Canvas coordinator stopped");
    }

    fn set_state(&self, state: CoordinatorState) {
        debug!(?state, "Coordinator state");
        self.state_tx.send_replace(state);
    }

    fn is_ready(&self) -> bool {
        matches!(*self.state_tx.borrow(), CoordinatorState::Ready { .. })
    }

    fn not_ready(&self) -> Option<DrawbridgeError> {
        self.failure
            .as_ref()
            .map(|reason| DrawbridgeError::BridgeNotReady(format!("engine session failed: {reason}")))
    }

    async fn send(&mut self, command: &BridgeCommand) -> Result<()> {
        let encoded = command.encode()?;
        if let Err(e) = self.transport.send(encoded).await {
            error!(%e, command = command.name(), "Engine transport failed");
            self.fail(&e.to_string());
            return Err(DrawbridgeError::Transport(e.to_string()));
        }
        debug!(command = command.name(), "Sent engine command");
        Ok(())
    }

    async fn handle_request(&mut self, req: Request) {
        match req {
            Request::Load { document, reply } => self.load(document, reply).await,
            Request::ToggleTool { key } => {
                if self.failure.is_some() {
                    debug!(%key, "Dropping tool key for failed session");
                } else {
                    // A newer key supersedes one parked for the next ready
                    self.queued_tool = None;
                    self.tools.push(key);
                }
            }
            Request::FlushTools => {
                if let Some(key) = self.tools.flush() {
                    self.forward_tool(key).await;
                }
            }
            Request::Export {
                token,
                format,
                embed_scene,
                reply,
            } => self.start_export(token, format, embed_scene, reply).await,
            Request::CancelExport { token } => self.cancel_export(token),
            // Handled by the run loop
            Request::Shutdown => {}
        }
    }

    async fn load(&mut self, document: ActiveDocument, reply: oneshot::Sender<Result<()>>) {
        if let Some(err) = self.not_ready() {
            let _ = reply.send(Err(err));
            return;
        }

        if let Some(pending) = self.pending_load.as_mut() {
            if pending.document_id == document.id {
                debug!(document_id = %document.id, "Joining in-flight load");
                pending.waiters.push(reply);
                return;
            }
        }

        if let Some(superseded) = self.pending_load.take() {
            info!(
                superseded = %superseded.document_id,
                document_id = %document.id,
                "Superseding in-flight load"
            );
            for waiter in superseded.waiters {
                let _ = waiter.send(Err(DrawbridgeError::Cancelled(format!(
                    "load of {} superseded by {}",
                    superseded.document_id, document.id
                ))));
            }
        }

        let scene = match document.scene.to_value() {
            Ok(scene) => scene,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let command = BridgeCommand::LoadScene {
            document_id: document.id,
            scene,
        };
        let document_id = document.id;
        self.active = Some(document);
        self.pending_load = Some(PendingLoad {
            document_id,
            waiters: vec![reply],
        });
        self.set_state(CoordinatorState::Loading { document_id });
        // A transport failure resolves the waiter through `fail`
        let _ = self.send(&command).await;
    }

    async fn forward_tool(&mut self, key: String) {
        if self.is_ready() {
            let _ = self.send(&BridgeCommand::ToggleTool { key }).await;
        } else {
            debug!(%key, "Engine not ready; holding tool key");
            self.queued_tool = Some(key);
        }
    }

    async fn start_export(
        &mut self,
        token: Token,
        format: ImageFormat,
        embed_scene: bool,
        reply: oneshot::Sender<Result<ExportArtifact>>,
    ) {
        if let Some(err) = self.not_ready() {
            let _ = reply.send(Err(err));
            return;
        }
        let Some(active) = self.active.as_ref() else {
            let _ = reply.send(Err(DrawbridgeError::BridgeNotReady(
                "no active document".into(),
            )));
            return;
        };

        let request = ExportRequest {
            token,
            kind: ArtifactKind::new(format, embed_scene),
            document_id: active.id,
            document_name: active.name.clone(),
        };
        // The elements are captured now, so switching documents later doesn't affect this export
        let command = BridgeCommand::ExportToImage {
            token,
            format,
            embed_scene,
            elements: active.scene.elements.clone(),
        };

        if let Err(e) = self.export.begin(request) {
            let _ = reply.send(Err(e));
            return;
        }
        self.export_reply = Some((token, reply));
        if self.send(&command).await.is_err() {
            self.resolve_export_failure(token, "engine transport failed");
        }
    }

    fn cancel_export(&mut self, token: Option<Token>) {
        let Some(current) = self.export.in_flight() else {
            return;
        };
        if token.is_some_and(|t| t != current) {
            return;
        }
        if self.export.fail(current, "cancelled") {
            self.reply_export(
                current,
                Err(DrawbridgeError::Cancelled(format!("export {current} cancelled"))),
            );
        }
    }

    fn reply_export(&mut self, token: Token, result: Result<ExportArtifact>) {
        match self.export_reply.take() {
            Some((pending, reply)) if pending == token => {
                let _ = reply.send(result);
            }
            other => self.export_reply = other,
        }
    }

    fn resolve_export_failure(&mut self, token: Token, reason: &str) {
        if self.export.fail(token, reason) {
            self.reply_export(token, Err(DrawbridgeError::ExportFailed(reason.to_string())));
        }
    }

    async fn handle_message(&mut self, msg: EngineMessage) {
        let event = match BridgeEvent::decode(&msg) {
            Ok(event) => event,
            Err(e) => {
                debug!(%e, name = %msg.name, "Discarding undecodable engine message");
                return;
            }
        };

        match event {
            BridgeEvent::SceneReady { document_id } => self.scene_ready(document_id).await,
            BridgeEvent::SceneChanged {
                document_id,
                elements,
            } => {
                if let Some(active) = self.active.as_mut().filter(|a| a.id == document_id) {
                    active.scene.elements = elements.clone();
                }
                // No subscribers is fine
                let _ = self.scenes.send(SceneSnapshot {
                    document_id,
                    elements,
                });
            }
            BridgeEvent::ExportDataReady {
                token,
                format,
                data,
            } => {
                if let Err(e) = self.export.on_data(token, format, data) {
                    warn!(%e, %token, "Rejecting export data");
                    if self.export.fail(token, e.to_string()) {
                        self.reply_export(token, Err(e));
                    }
                }
            }
            BridgeEvent::DownloadStarted { token, destination } => {
                self.export.on_download_started(token, destination);
            }
            BridgeEvent::DownloadFinished { token } => {
                let Some(done) = self.export.on_download_finished(token) else {
                    return;
                };
                match export::materialize(done, &self.export_dir).await {
                    Ok(artifact) => {
                        self.export.finish(token);
                        info!(%token, location = %artifact.location.display(), "Export artifact ready");
                        self.reply_export(token, Ok(artifact));
                    }
                    Err(e) => {
                        warn!(%e, %token, "Could not materialize export");
                        if self.export.fail(token, e.to_string()) {
                            self.reply_export(token, Err(e));
                        }
                    }
                }
            }
            BridgeEvent::ExportFailed { token, reason } => {
                self.resolve_export_failure(token, &reason);
            }
        }
    }

    async fn scene_ready(&mut self, document_id: Uuid) {
        let Some(pending) = self
            .pending_load
            .take_if(|pending| pending.document_id == document_id)
        else {
            debug!(%document_id, "Discarding stale sceneReady");
            return;
        };

        self.set_state(CoordinatorState::Ready { document_id });
        info!(%document_id, "Scene ready");
        for waiter in pending.waiters {
            let _ = waiter.send(Ok(()));
        }

        // A key still in the debounce window is newer and will be forwarded on its own
        if let Some(key) = self.queued_tool.take().filter(|_| !self.tools.is_pending()) {
            let _ = self.send(&BridgeCommand::ToggleTool { key }).await;
        }
    }

    /// Unrecoverable transport failure: everything waiting resolves with an error.
    fn fail(&mut self, reason: &str) {
        if self.failure.is_some() {
            return;
        }
        error!(%reason, "Canvas coordinator failed");
        self.failure = Some(reason.to_string());
        self.set_state(CoordinatorState::Failed {
            reason: reason.to_string(),
        });
        if let Some(pending) = self.pending_load.take() {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(DrawbridgeError::Transport(reason.to_string())));
            }
        }
        if let Some(token) = self.export.in_flight() {
            self.export.fail(token, reason);
            self.reply_export(token, Err(DrawbridgeError::Transport(reason.to_string())));
        }
        self.tools.flush();
        self.queued_tool = None;
    }

    fn close(&mut self) {
        if let Some(pending) = self.pending_load.take() {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(session_gone()));
            }
        }
        if let Some(token) = self.export.in_flight() {
            self.export.fail(token, "coordinator shut down");
            self.reply_export(token, Err(session_gone()));
        }
        debug!(phase = %self.export.phase(), "Closed engine session");
    }
}
