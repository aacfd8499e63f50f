//! Core types, config, errors, and the workspace document store for Drawbridge.

pub mod config;
pub mod error;
pub mod handle;
pub mod scene;
pub mod store;
pub mod template;
pub mod types;

pub use error::{DrawbridgeError, Result};
pub use handle::StoreHandle;
pub use scene::SceneDescriptor;
pub use store::DocumentStore;
pub use template::TemplateSource;
pub use types::{Document, Folder, FolderKind};
