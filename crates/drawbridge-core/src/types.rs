use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::scene;

/// Name given to the bootstrap folder.
pub const DEFAULT_FOLDER_NAME: &str = "default";

/// Name given to the bootstrap trash folder.
pub const TRASH_FOLDER_NAME: &str = "Trash";

/// Name given to freshly created documents.
pub const UNTITLED: &str = "Untitled";

/// Folder classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderKind {
    Default,
    Normal,
    Trash,
}

/// A named container of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    pub kind: FolderKind,
    pub created_at: DateTime<Utc>,
    /// Symbolic icon name, only meaningful for `Normal` folders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Folder {
    pub fn new(name: impl Into<String>, kind: FolderKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            created_at: Utc::now(),
            icon: None,
        }
    }

    pub fn is_trash(&self) -> bool {
        self.kind == FolderKind::Trash
    }
}

/// A persisted drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    /// Raw scene JSON. Opaque apart from its `elements` key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub folder_id: Uuid,
    /// Folder the document lived in before it was trashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_to: Option<Uuid>,
}

impl Document {
    /// A new "Untitled" document holding `content` verbatim.
    ///
    /// `updated_at` starts equal to `created_at`.
    pub fn new(folder_id: Uuid, content: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: UNTITLED.to_string(),
            content: Some(content),
            created_at: now,
            updated_at: now,
            folder_id,
            restore_to: None,
        }
    }

    /// Merge a new elements payload into the content and bump `updated_at`.
    ///
    /// Returns `false` without touching anything when there is no scene to merge into.
    pub fn update_elements(&mut self, elements: &str) -> Result<bool> {
        match scene::merge_elements(self.content.as_deref(), elements)? {
            Some(merged) => {
                self.content = Some(merged);
                self.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_document_timestamps_match() {
        let doc = Document::new(Uuid::new_v4(), "{}".into());
        assert_eq!(doc.name, UNTITLED);
        assert_eq!(doc.created_at, doc.updated_at);
    }

    #[test]
    fn test_update_elements_bumps_updated_at() {
        let mut doc = Document::new(Uuid::new_v4(), r#"{"elements":[]}"#.into());
        let created = doc.created_at;
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(doc.update_elements(r#"[{"id":"a"}]"#).unwrap());
        assert!(doc.updated_at > created);
        assert_eq!(doc.created_at, created);
        assert!(doc.content.as_deref().unwrap().contains(r#""id":"a""#));
    }

    #[test]
    fn test_update_elements_without_content_is_untouched() {
        let mut doc = Document::new(Uuid::new_v4(), String::new());
        doc.content = None;
        let before = doc.clone();
        assert!(!doc.update_elements("[]").unwrap());
        assert_eq!(doc, before);
    }

    #[test]
    fn test_folder_kind_serde() {
        let folder = Folder::new("Trash", FolderKind::Trash);
        let json = serde_json::to_value(&folder).unwrap();
        assert_eq!(json["kind"], "trash");
        assert!(json.get("icon").is_none());
        assert!(folder.is_trash());
    }
}
