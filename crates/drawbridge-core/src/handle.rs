//! Single-owner store task.
//!
//! One task owns the [`DocumentStore`]; everything else talks to it through a
//! cloneable [`StoreHandle`]. Commands run one at a time in arrival order, so
//! create-if-absent checks like [`StoreHandle::bootstrap`] cannot race.
//!
//! A workspace directory is served by at most one task per process: opening a
//! directory that already has a running task returns a handle to that task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DrawbridgeError, Result};
use crate::store::DocumentStore;
use crate::template::TemplateSource;
use crate::types::{Document, Folder};

type StoreCall = Box<dyn FnOnce(&mut DocumentStore) + Send>;

enum StoreCommand {
    Call(StoreCall),
    Save {
        reply: oneshot::Sender<Result<bool>>,
    },
    Close {
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// Cloneable handle to the store task.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

fn stopped() -> DrawbridgeError {
    DrawbridgeError::StorageUnavailable("store task has stopped".into())
}

struct RunningStore {
    tx: mpsc::WeakUnboundedSender<StoreCommand>,
    task: JoinHandle<()>,
}

/// Running store tasks by canonical workspace directory.
///
/// The lock is held for the whole open so two openers can't both load and
/// bootstrap the same directory.
static OPEN_STORES: LazyLock<Mutex<HashMap<PathBuf, RunningStore>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

async fn workspace_key(base: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(base).await.map_err(|e| {
        DrawbridgeError::StorageUnavailable(format!("{}: {e}", base.display()))
    })?;
    tokio::fs::canonicalize(base)
        .await
        .map_err(|e| DrawbridgeError::StorageUnavailable(format!("{}: {e}", base.display())))
}

impl StoreHandle {
    /// Open the workspace at `base` and start its owning task.
    ///
    /// If this process already runs a task for `base`, returns a handle to it
    /// instead; `template` is then ignored. Closing any handle stops the shared task.
    pub async fn open(base: PathBuf, template: TemplateSource) -> Result<Self> {
        let key = workspace_key(&base).await?;
        let mut open_stores = OPEN_STORES.lock().await;

        if let Some(tx) = open_stores.get(&key).and_then(|running| running.tx.upgrade()) {
            if !tx.is_closed() {
                debug!(path = %key.display(), "Reusing running store task");
                return Ok(Self { tx });
            }
        }
        if let Some(previous) = open_stores.remove(&key) {
            // Let its final flush land before the workspace is read again
            if let Err(e) = previous.task.await {
                warn!(%e, path = %key.display(), "Previous store task ended abnormally");
            }
        }

        let store = DocumentStore::open(base, template).await?;
        let (handle, task) = Self::start(store);
        open_stores.insert(
            key,
            RunningStore {
                tx: handle.tx.downgrade(),
                task,
            },
        );
        Ok(handle)
    }

    /// Move `store` into a new task, bootstrapping its special folders first.
    pub fn spawn(store: DocumentStore) -> Self {
        Self::start(store).0
    }

    fn start(store: DocumentStore) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store, rx));
        (Self { tx }, task)
    }

    async fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DocumentStore) -> R + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Call(Box::new(move |store| {
                let _ = reply.send(f(store));
            })))
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Create the Default and Trash folders if missing. Safe to call concurrently.
    pub async fn bootstrap(&self) -> Result<bool> {
        self.call(DocumentStore::bootstrap).await
    }

    pub async fn list_folders(&self) -> Result<Vec<Folder>> {
        self.call(|store| store.list_folders()).await
    }

    pub async fn folder(&self, id: Uuid) -> Result<Folder> {
        self.call(move |store| store.folder(id).cloned()).await?
    }

    pub async fn create_folder(&self, name: impl Into<String>) -> Result<Folder> {
        let name = name.into();
        self.call(move |store| store.create_folder(&name)).await?
    }

    pub async fn rename_folder(&self, id: Uuid, name: impl Into<String>) -> Result<Folder> {
        let name = name.into();
        self.call(move |store| store.rename_folder(id, &name)).await?
    }

    pub async fn set_folder_icon(&self, id: Uuid, icon: Option<String>) -> Result<Folder> {
        self.call(move |store| store.set_folder_icon(id, icon)).await?
    }

    pub async fn delete_folder(&self, id: Uuid) -> Result<usize> {
        self.call(move |store| store.delete_folder(id)).await?
    }

    pub async fn empty_trash(&self) -> Result<usize> {
        self.call(DocumentStore::empty_trash).await
    }

    pub async fn list_documents(&self, folder_id: Uuid) -> Result<Vec<Document>> {
        self.call(move |store| store.list_documents(folder_id)).await?
    }

    pub async fn document(&self, id: Uuid) -> Result<Document> {
        self.call(move |store| store.document(id).cloned()).await?
    }

    pub async fn create_document(&self, folder_id: Uuid) -> Result<Document> {
        self.call(move |store| store.create_document(folder_id)).await?
    }

    pub async fn rename_document(&self, id: Uuid, name: impl Into<String>) -> Result<Document> {
        let name = name.into();
        self.call(move |store| store.rename_document(id, &name)).await?
    }

    pub async fn move_document(&self, id: Uuid, folder_id: Uuid) -> Result<Document> {
        self.call(move |store| store.move_document(id, folder_id)).await?
    }

    pub async fn trash_document(&self, id: Uuid) -> Result<Document> {
        self.call(move |store| store.trash_document(id)).await?
    }

    pub async fn restore_document(&self, id: Uuid) -> Result<Document> {
        self.call(move |store| store.restore_document(id)).await?
    }

    pub async fn delete_document(&self, id: Uuid) -> Result<()> {
        self.call(move |store| store.delete_document(id)).await?
    }

    pub async fn update_elements(&self, id: Uuid, elements: impl Into<String>) -> Result<bool> {
        let elements = elements.into();
        self.call(move |store| store.update_elements(id, &elements)).await?
    }

    /// Flush pending changes. `Ok(false)` when there was nothing to write.
    pub async fn save(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Save { reply })
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    /// Flush and stop the store task. Other handles fail with `StorageUnavailable` afterwards.
    pub async fn close(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Close { reply })
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }
}

async fn run(mut store: DocumentStore, mut rx: mpsc::UnboundedReceiver<StoreCommand>) {
    if store.bootstrap() {
        // A failed flush stays dirty and is retried by the next save
        if let Err(e) = store.save().await {
            warn!(%e, "Could not persist bootstrap folders yet");
        }
    }
    info!(path = %store.base().display(), "Store task started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::Call(f) => f(&mut store),
            StoreCommand::Save { reply } => {
                let _ = reply.send(store.save().await);
            }
            StoreCommand::Close { reply } => {
                // Refuse further commands before answering, so a reopen starts a fresh task
                rx.close();
                let _ = reply.send(store.save().await);
                debug!("Store closed");
                return;
            }
        }
    }

    // Every handle dropped without an explicit close
    if let Err(e) = store.save().await {
        warn!(%e, "Final flush failed");
    }
    debug!("Store task ended");
}
