//! Bridge between the Drawbridge document store and the embedded drawing engine.
//!
//! The engine runs inside a host (web view, headless browser) that relays
//! string commands in and named messages out. [`CanvasCoordinator`] drives the
//! engine through an [`EngineTransport`]: it loads documents, debounces tool
//! shortcuts, and runs image exports to completion. Scene edits the engine
//! reports are written back to the store by [`spawn_scene_persister`].

pub mod coordinator;
pub mod debounce;
pub mod export;
pub mod persist;
pub mod protocol;
pub mod transport;

pub use coordinator::{
    ActiveDocument, CanvasCoordinator, CoordinatorOptions, CoordinatorState, SceneSnapshot,
};
pub use export::{ExportArtifact, ExportPhase};
pub use persist::spawn_scene_persister;
pub use protocol::{ArtifactKind, BridgeCommand, BridgeEvent, EngineMessage, ImageFormat, Token, Tool};
pub use transport::{ChannelTransport, EngineEndpoint, EngineTransport, channel_transport};
