//! Writes engine scene edits back to the document store.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drawbridge_core::error::DrawbridgeError;
use drawbridge_core::handle::StoreHandle;

use crate::coordinator::SceneSnapshot;

/// Merge every [`SceneSnapshot`] into its document and flush the store.
///
/// Runs until `cancel` fires or the coordinator drops its scene channel.
/// Persistence failures are logged and left for the next snapshot to retry.
pub fn spawn_scene_persister(
    mut scenes: broadcast::Receiver<SceneSnapshot>,
    store: StoreHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = scenes.recv() => match msg {
                    Ok(snapshot) => snapshot,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Scene persister fell behind");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            persist(&store, snapshot).await;
        }
        // Anything merged but not yet written
        if let Err(e) = store.save().await {
            debug!(%e, "Final scene flush skipped");
        }
        info!("Scene persister stopped");
    })
}

async fn persist(store: &StoreHandle, snapshot: SceneSnapshot) {
    let document_id = snapshot.document_id;
    let elements = match serde_json::to_string(&snapshot.elements) {
        Ok(elements) => elements,
        Err(e) => {
            warn!(%e, %document_id, "Could not serialize scene elements");
            return;
        }
    };

    match store.update_elements(document_id, elements).await {
        Ok(true) => {}
        Ok(false) => return,
        Err(DrawbridgeError::NotFound(_)) => {
            debug!(%document_id, "Scene edit for a document that no longer exists");
            return;
        }
        Err(e) => {
            warn!(%e, %document_id, "Could not merge scene edit");
            return;
        }
    }

    match store.save().await {
        Ok(_) => debug!(%document_id, "Persisted scene edit"),
        Err(e @ DrawbridgeError::PersistFailed(_)) => {
            warn!(%e, %document_id, "Scene edit kept in memory; will retry on next save");
        }
        Err(e) => warn!(%e, %document_id, "Could not save scene edit"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawbridge_core::template::TemplateSource;
    use drawbridge_core::types::FolderKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshots_are_merged_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path().to_path_buf(), TemplateSource::Bundled)
            .await
            .unwrap();
        let folder = store
            .list_folders()
            .await
            .unwrap()
            .into_iter()
            .find(|f| f.kind == FolderKind::Default)
            .unwrap();
        let doc = store.create_document(folder.id).await.unwrap();

        let (tx, rx) = broadcast::channel(8);
        let cancel = CancellationToken::new();
        let task = spawn_scene_persister(rx, store.clone(), cancel.clone());

        tx.send(SceneSnapshot {
            document_id: doc.id,
            elements: vec![json!({"id": "rect-1", "type": "rectangle"})],
        })
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let saved = store.document(doc.id).await.unwrap();
        assert!(saved.content.unwrap().contains("rect-1"));
        let on_disk = std::fs::read_to_string(dir.path().join("workspace.json")).unwrap();
        assert!(on_disk.contains("rect-1"));
    }

    #[tokio::test]
    async fn test_unknown_document_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreHandle::open(dir.path().to_path_buf(), TemplateSource::Bundled)
            .await
            .unwrap();

        let (tx, rx) = broadcast::channel(8);
        let cancel = CancellationToken::new();
        let task = spawn_scene_persister(rx, store.clone(), cancel.clone());

        tx.send(SceneSnapshot {
            document_id: uuid::Uuid::new_v4(),
            elements: vec![],
        })
        .unwrap();
        cancel.cancel();
        task.await.unwrap();
        // Store still usable
        assert_eq!(store.list_folders().await.unwrap().len(), 2);
    }
}
