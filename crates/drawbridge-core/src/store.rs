//! JSON-file workspace store: folders and documents in one atomically written file.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DrawbridgeError, Result};
use crate::template::TemplateSource;
use crate::types::{
    DEFAULT_FOLDER_NAME, Document, Folder, FolderKind, TRASH_FOLDER_NAME,
};

const WORKSPACE_VERSION: u32 = 1;

/// On-disk workspace layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Workspace {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    folders: Vec<Folder>,
    #[serde(default)]
    documents: Vec<Document>,
}

fn default_version() -> u32 {
    WORKSPACE_VERSION
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            version: WORKSPACE_VERSION,
            folders: Vec::new(),
            documents: Vec::new(),
        }
    }
}

/// File-based document store.
///
/// Layout:
/// - `<base>/workspace.json`: every folder and document, content included
///
/// Mutations apply in memory and mark the store dirty; [`DocumentStore::save`]
/// flushes them in one atomic write.
pub struct DocumentStore {
    base: PathBuf,
    template_source: TemplateSource,
    template: Option<String>,
    workspace: Workspace,
    dirty: bool,
}

impl DocumentStore {
    /// Open the workspace under `base`, creating nothing on disk yet.
    pub async fn open(base: PathBuf, template_source: TemplateSource) -> Result<Self> {
        let workspace = load_workspace(&base.join("workspace.json")).await?;

        let template = match template_source.resolve() {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!(%e, template = %template_source.describe(), "Template unavailable; new documents will fail");
                None
            }
        };

        info!(
            path = %base.display(),
            folders = workspace.folders.len(),
            documents = workspace.documents.len(),
            "Opened workspace"
        );

        Ok(Self {
            base,
            template_source,
            template,
            workspace,
            dirty: false,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn workspace_path(&self) -> PathBuf {
        self.base.join("workspace.json")
    }

    pub fn has_changes(&self) -> bool {
        self.dirty
    }

    /// Create the Default and Trash folders if they don't exist yet.
    ///
    /// Returns whether anything was created.
    pub fn bootstrap(&mut self) -> bool {
        let mut created = false;
        if self.folder_of_kind(FolderKind::Default).is_none() {
            let folder = Folder::new(DEFAULT_FOLDER_NAME, FolderKind::Default);
            info!(folder_id = %folder.id, "Created default folder");
            self.workspace.folders.push(folder);
            created = true;
        }
        if self.folder_of_kind(FolderKind::Trash).is_none() {
            let folder = Folder::new(TRASH_FOLDER_NAME, FolderKind::Trash);
            info!(folder_id = %folder.id, "Created trash folder");
            self.workspace.folders.push(folder);
            created = true;
        }
        self.dirty |= created;
        created
    }

    fn folder_of_kind(&self, kind: FolderKind) -> Option<&Folder> {
        self.workspace.folders.iter().find(|f| f.kind == kind)
    }

    fn special_folder_id(&mut self, kind: FolderKind) -> Uuid {
        if let Some(folder) = self.folder_of_kind(kind) {
            return folder.id;
        }
        self.bootstrap();
        self.workspace
            .folders
            .iter()
            .find(|f| f.kind == kind)
            .map(|f| f.id)
            .unwrap_or_default()
    }

    fn trash_id(&mut self) -> Uuid {
        self.special_folder_id(FolderKind::Trash)
    }

    fn default_id(&mut self) -> Uuid {
        self.special_folder_id(FolderKind::Default)
    }

    // --- Folders ---

    /// All folders, newest first.
    pub fn list_folders(&self) -> Vec<Folder> {
        let mut folders = self.workspace.folders.clone();
        folders.sort_by_key(|f| Reverse(f.created_at));
        folders
    }

    pub fn folder(&self, id: Uuid) -> Result<&Folder> {
        self.workspace
            .folders
            .iter()
            .find(|f| f.id == id)
            .ok_or_else(|| DrawbridgeError::NotFound(format!("folder {id}")))
    }

    fn folder_mut(&mut self, id: Uuid) -> Result<&mut Folder> {
        self.workspace
            .folders
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| DrawbridgeError::NotFound(format!("folder {id}")))
    }

    pub fn create_folder(&mut self, name: &str) -> Result<Folder> {
        let name = validate_name(name)?;
        let folder = Folder::new(name, FolderKind::Normal);
        debug!(folder_id = %folder.id, name = %folder.name, "Created folder");
        self.workspace.folders.push(folder.clone());
        self.dirty = true;
        Ok(folder)
    }

    pub fn rename_folder(&mut self, id: Uuid, name: &str) -> Result<Folder> {
        let name = validate_name(name)?;
        let folder = self.folder_mut(id)?;
        if folder.kind == FolderKind::Trash {
            return Err(DrawbridgeError::ProtectedFolder(
                "the trash cannot be renamed".into(),
            ));
        }
        folder.name = name;
        let folder = folder.clone();
        self.dirty = true;
        Ok(folder)
    }

    pub fn set_folder_icon(&mut self, id: Uuid, icon: Option<String>) -> Result<Folder> {
        let folder = self.folder_mut(id)?;
        if folder.kind != FolderKind::Normal {
            return Err(DrawbridgeError::ProtectedFolder(
                "only regular folders carry icons".into(),
            ));
        }
        folder.icon = icon;
        let folder = folder.clone();
        self.dirty = true;
        Ok(folder)
    }

    /// Delete a regular folder, moving its documents to the trash.
    ///
    /// Returns how many documents were moved.
    pub fn delete_folder(&mut self, id: Uuid) -> Result<usize> {
        match self.folder(id)?.kind {
            FolderKind::Normal => {}
            FolderKind::Default => {
                return Err(DrawbridgeError::ProtectedFolder(
                    "the default folder cannot be deleted".into(),
                ));
            }
            FolderKind::Trash => {
                return Err(DrawbridgeError::ProtectedFolder(
                    "the trash can only be emptied".into(),
                ));
            }
        }

        let trash = self.trash_id();
        let mut moved = 0;
        for doc in self.workspace.documents.iter_mut().filter(|d| d.folder_id == id) {
            // Origin is about to disappear; restore falls back to the default folder
            doc.restore_to = None;
            doc.folder_id = trash;
            moved += 1;
        }
        self.workspace.folders.retain(|f| f.id != id);
        self.dirty = true;
        info!(folder_id = %id, moved, "Deleted folder");
        Ok(moved)
    }

    /// Permanently remove every trashed document. Returns how many were removed.
    pub fn empty_trash(&mut self) -> usize {
        let trash = self.trash_id();
        let before = self.workspace.documents.len();
        self.workspace.documents.retain(|d| d.folder_id != trash);
        let removed = before - self.workspace.documents.len();
        if removed > 0 {
            self.dirty = true;
        }
        info!(removed, "Emptied trash");
        removed
    }

    // --- Documents ---

    /// Documents in a folder, most recently updated first.
    pub fn list_documents(&self, folder_id: Uuid) -> Result<Vec<Document>> {
        self.folder(folder_id)?;
        let mut docs: Vec<Document> = self
            .workspace
            .documents
            .iter()
            .filter(|d| d.folder_id == folder_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| (Reverse(d.updated_at), Reverse(d.created_at)));
        Ok(docs)
    }

    pub fn document(&self, id: Uuid) -> Result<&Document> {
        self.workspace
            .documents
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| DrawbridgeError::NotFound(format!("document {id}")))
    }

    fn document_mut(&mut self, id: Uuid) -> Result<&mut Document> {
        self.workspace
            .documents
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| DrawbridgeError::NotFound(format!("document {id}")))
    }

    fn is_trashed(&self, doc: &Document) -> bool {
        self.folder(doc.folder_id).is_ok_and(Folder::is_trash)
    }

    /// Create an "Untitled" document holding the template scene.
    pub fn create_document(&mut self, folder_id: Uuid) -> Result<Document> {
        let template = self.template.clone().ok_or_else(|| {
            DrawbridgeError::TemplateMissing(PathBuf::from(self.template_source.describe()))
        })?;
        if self.folder(folder_id)?.is_trash() {
            return Err(DrawbridgeError::ProtectedFolder(
                "documents cannot be created in the trash".into(),
            ));
        }

        let doc = Document::new(folder_id, template);
        debug!(document_id = %doc.id, folder_id = %folder_id, "Created document");
        self.workspace.documents.push(doc.clone());
        self.dirty = true;
        Ok(doc)
    }

    pub fn rename_document(&mut self, id: Uuid, name: &str) -> Result<Document> {
        let name = validate_name(name)?;
        let doc = self.document_mut(id)?;
        doc.name = name;
        let doc = doc.clone();
        self.dirty = true;
        Ok(doc)
    }

    /// Move a document between regular folders. Trashing goes through [`Self::trash_document`].
    pub fn move_document(&mut self, id: Uuid, folder_id: Uuid) -> Result<Document> {
        if self.folder(folder_id)?.is_trash() {
            return Err(DrawbridgeError::ProtectedFolder(
                "use trash to move documents into the trash".into(),
            ));
        }
        let doc = self.document_mut(id)?;
        doc.folder_id = folder_id;
        doc.restore_to = None;
        let doc = doc.clone();
        self.dirty = true;
        Ok(doc)
    }

    /// Relocate a document to the trash, remembering where it came from.
    pub fn trash_document(&mut self, id: Uuid) -> Result<Document> {
        let trash = self.trash_id();
        let doc = self.document_mut(id)?;
        if doc.folder_id != trash {
            doc.restore_to = Some(doc.folder_id);
            doc.folder_id = trash;
        }
        let doc = doc.clone();
        self.dirty = true;
        debug!(document_id = %id, "Moved document to trash");
        Ok(doc)
    }

    /// Bring a trashed document back to its origin folder, or the default folder.
    pub fn restore_document(&mut self, id: Uuid) -> Result<Document> {
        let doc = self.document(id)?;
        if !self.is_trashed(doc) {
            return Ok(doc.clone());
        }
        let origin = doc
            .restore_to
            .filter(|origin| self.folder(*origin).is_ok_and(|f| !f.is_trash()));
        let target = match origin {
            Some(origin) => origin,
            None => self.default_id(),
        };

        let doc = self.document_mut(id)?;
        doc.folder_id = target;
        doc.restore_to = None;
        let doc = doc.clone();
        self.dirty = true;
        debug!(document_id = %id, folder_id = %target, "Restored document");
        Ok(doc)
    }

    /// Permanently delete a document that is already in the trash.
    pub fn delete_document(&mut self, id: Uuid) -> Result<()> {
        let doc = self.document(id)?;
        if !self.is_trashed(doc) {
            return Err(DrawbridgeError::ProtectedFolder(
                "only trashed documents can be deleted permanently".into(),
            ));
        }
        self.workspace.documents.retain(|d| d.id != id);
        self.dirty = true;
        debug!(document_id = %id, "Deleted document");
        Ok(())
    }

    /// Merge a new elements payload into a document's scene.
    ///
    /// Returns whether the document changed.
    pub fn update_elements(&mut self, id: Uuid, elements: &str) -> Result<bool> {
        if self.is_trashed(self.document(id)?) {
            return Err(DrawbridgeError::ProtectedFolder(
                "recently deleted documents can't be edited".into(),
            ));
        }
        let changed = self.document_mut(id)?.update_elements(elements)?;
        if changed {
            self.dirty = true;
        } else {
            debug!(document_id = %id, "Document has no scene to merge into");
        }
        Ok(changed)
    }

    /// Flush pending changes to disk.
    ///
    /// A no-op returning `false` when nothing changed. On failure the in-memory
    /// state is kept as-is and stays dirty, so the next save retries.
    pub async fn save(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        match self.write_workspace().await {
            Ok(()) => {
                self.dirty = false;
                debug!(path = %self.workspace_path().display(), "Saved workspace");
                Ok(true)
            }
            Err(e) => {
                error!(%e, "Failed to persist workspace");
                Err(DrawbridgeError::PersistFailed(e.to_string()))
            }
        }
    }

    async fn write_workspace(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let data = serde_json::to_string_pretty(&self.workspace)?;
        let path = self.workspace_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

async fn load_workspace(path: &Path) -> Result<Workspace> {
    if !path.exists() {
        return Ok(Workspace::default());
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DrawbridgeError::StorageUnavailable(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&data)
        .map_err(|e| DrawbridgeError::StorageUnavailable(format!("corrupt workspace: {e}")))
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DrawbridgeError::InvalidName(name.to_string()));
    }
    Ok(trimmed.to_string())
}
