//! Export pipeline. Tracks one in-flight export and materializes its artifact.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use drawbridge_core::error::{DrawbridgeError, Result};
use drawbridge_core::types::UNTITLED;

use crate::protocol::{ArtifactKind, ImageFormat, Token};

/// What was asked for, captured when the export was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub token: Token,
    pub kind: ArtifactKind,
    pub document_id: Uuid,
    pub document_name: String,
}

impl ExportRequest {
    /// File name for the artifact: the document name plus the kind's extension.
    pub fn file_name(&self) -> String {
        let stem: String = self
            .document_name
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '\0' => '-',
                c => c,
            })
            .collect();
        let stem = if stem.is_empty() || stem.chars().all(|c| c == '.') {
            UNTITLED.to_string()
        } else {
            stem
        };
        format!("{stem}.{}", self.kind.extension())
    }
}

/// A finished export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub document_id: Uuid,
    pub bytes: Vec<u8>,
    pub location: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportPhase {
    NotRequested,
    Requested,
    DownloadStarted,
    Finished,
    Failed(String),
}

impl fmt::Display for ExportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRequested => f.write_str("not requested"),
            Self::Requested => f.write_str("requested"),
            Self::DownloadStarted => f.write_str("download started"),
            Self::Finished => f.write_str("finished"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Everything collected for an export whose download finished.
#[derive(Debug)]
pub struct CompletedDownload {
    pub request: ExportRequest,
    pub data: Option<Vec<u8>>,
    pub destination: Option<PathBuf>,
}

#[derive(Debug)]
struct InFlight {
    request: ExportRequest,
    data: Option<Vec<u8>>,
    destination: Option<PathBuf>,
}

/// State machine for a single coordinator's exports.
///
/// Events are matched by token; anything for another token is ignored.
#[derive(Debug)]
pub struct ExportPipeline {
    phase: ExportPhase,
    current: Option<InFlight>,
}

impl Default for ExportPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportPipeline {
    pub fn new() -> Self {
        Self {
            phase: ExportPhase::NotRequested,
            current: None,
        }
    }

    pub fn phase(&self) -> &ExportPhase {
        &self.phase
    }

    pub fn in_flight(&self) -> Option<Token> {
        self.current.as_ref().map(|c| c.request.token)
    }

    fn matching(&mut self, token: Token) -> Option<&mut InFlight> {
        match self.current.as_mut() {
            Some(current) if current.request.token == token => Some(current),
            _ => {
                debug!(%token, "Ignoring event for an unknown export token");
                None
            }
        }
    }

    /// Start tracking a new export. Rejected while another is in flight.
    pub fn begin(&mut self, request: ExportRequest) -> Result<()> {
        if self.current.is_some() {
            return Err(DrawbridgeError::ExportInProgress);
        }
        info!(token = %request.token, kind = ?request.kind, "Export requested");
        self.current = Some(InFlight {
            request,
            data: None,
            destination: None,
        });
        self.phase = ExportPhase::Requested;
        Ok(())
    }

    /// Record the image bytes for `token`.
    ///
    /// Bytes in a format other than the requested one are rejected with
    /// `ExportFailed`; the caller decides whether to fail the export.
    pub fn on_data(&mut self, token: Token, format: ImageFormat, data: Vec<u8>) -> Result<bool> {
        let Some(current) = self.matching(token) else {
            return Ok(false);
        };
        let expected = current.request.kind.format();
        if format != expected {
            return Err(DrawbridgeError::ExportFailed(format!(
                "engine returned {format:?} data for a {expected:?} export"
            )));
        }
        current.data = Some(data);
        Ok(true)
    }

    pub fn on_download_started(&mut self, token: Token, destination: Option<PathBuf>) -> bool {
        let Some(current) = self.matching(token) else {
            return false;
        };
        if destination.is_some() {
            current.destination = destination;
        }
        self.phase = ExportPhase::DownloadStarted;
        debug!(%token, "Export download started");
        true
    }

    /// Hand over what was collected once the download finished.
    ///
    /// The export stays in flight until [`Self::finish`] or [`Self::fail`].
    pub fn on_download_finished(&mut self, token: Token) -> Option<CompletedDownload> {
        let current = self.matching(token)?;
        Some(CompletedDownload {
            request: current.request.clone(),
            data: current.data.take(),
            destination: current.destination.clone(),
        })
    }

    pub fn finish(&mut self, token: Token) -> bool {
        if self.matching(token).is_none() {
            return false;
        }
        self.current = None;
        self.phase = ExportPhase::Finished;
        info!(%token, "Export finished");
        true
    }

    pub fn fail(&mut self, token: Token, reason: impl Into<String>) -> bool {
        if self.matching(token).is_none() {
            return false;
        }
        let reason = reason.into();
        info!(%token, %reason, "Export failed");
        self.current = None;
        self.phase = ExportPhase::Failed(reason);
        true
    }
}

/// Write the artifact into `export_dir` and return it.
///
/// Bytes come from the engine's data event; failing that, from the file the
/// download was saved to.
pub async fn materialize(done: CompletedDownload, export_dir: &Path) -> Result<ExportArtifact> {
    let bytes = match (done.data, &done.destination) {
        (Some(data), _) => data,
        (None, Some(destination)) => tokio::fs::read(destination).await.map_err(|e| {
            DrawbridgeError::ExportFailed(format!("{}: {e}", destination.display()))
        })?,
        (None, None) => {
            return Err(DrawbridgeError::ExportFailed(
                "engine delivered no image data".into(),
            ));
        }
    };

    let name = done.request.file_name();
    tokio::fs::create_dir_all(export_dir).await?;
    let location = export_dir.join(&name);
    tokio::fs::write(&location, &bytes).await?;

    Ok(ExportArtifact {
        name,
        kind: done.request.kind,
        document_id: done.request.document_id,
        bytes,
        location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, kind: ArtifactKind) -> ExportRequest {
        ExportRequest {
            token: Token::new(),
            kind,
            document_id: Uuid::new_v4(),
            document_name: name.into(),
        }
    }

    #[test]
    fn test_phases_follow_matching_events() {
        let mut pipeline = ExportPipeline::new();
        let req = request("Plan", ArtifactKind::Png);
        let token = req.token;
        pipeline.begin(req).unwrap();
        assert_eq!(pipeline.phase(), &ExportPhase::Requested);

        assert!(pipeline.on_data(token, ImageFormat::Png, vec![1, 2, 3]).unwrap());
        assert!(pipeline.on_download_started(token, None));
        assert_eq!(pipeline.phase(), &ExportPhase::DownloadStarted);

        let done = pipeline.on_download_finished(token).unwrap();
        assert_eq!(done.data, Some(vec![1, 2, 3]));
        assert!(pipeline.finish(token));
        assert_eq!(pipeline.phase(), &ExportPhase::Finished);
        assert!(pipeline.in_flight().is_none());
    }

    #[test]
    fn test_mismatched_tokens_are_ignored() {
        let mut pipeline = ExportPipeline::new();
        let req = request("Plan", ArtifactKind::Svg);
        pipeline.begin(req).unwrap();

        let stray = Token::new();
        assert!(!pipeline.on_data(stray, ImageFormat::Svg, vec![0]).unwrap());
        assert!(!pipeline.on_download_started(stray, None));
        assert!(pipeline.on_download_finished(stray).is_none());
        assert!(!pipeline.finish(stray));
        assert_eq!(pipeline.phase(), &ExportPhase::Requested);
    }

    #[test]
    fn test_data_in_wrong_format_is_rejected() {
        let mut pipeline = ExportPipeline::new();
        let req = request("Plan", ArtifactKind::ExcalidrawSvg);
        let token = req.token;
        pipeline.begin(req).unwrap();

        assert!(matches!(
            pipeline.on_data(token, ImageFormat::Png, vec![0x89]),
            Err(DrawbridgeError::ExportFailed(_))
        ));
        let done = pipeline.on_download_finished(token).unwrap();
        assert!(done.data.is_none());
        assert!(pipeline.on_data(token, ImageFormat::Svg, b"<svg/>".to_vec()).unwrap());
    }

    #[test]
    fn test_second_export_rejected_until_first_resolves() {
        let mut pipeline = ExportPipeline::new();
        let first = request("A", ArtifactKind::Png);
        let first_token = first.token;
        pipeline.begin(first).unwrap();

        assert!(matches!(
            pipeline.begin(request("B", ArtifactKind::Png)),
            Err(DrawbridgeError::ExportInProgress)
        ));

        assert!(pipeline.fail(first_token, "engine crashed"));
        assert_eq!(
            pipeline.phase(),
            &ExportPhase::Failed("engine crashed".into())
        );
        pipeline.begin(request("C", ArtifactKind::Png)).unwrap();
    }

    #[test]
    fn test_file_name_sanitized() {
        assert_eq!(
            request("Plan", ArtifactKind::ExcalidrawPng).file_name(),
            "Plan.excalidraw.png"
        );
        assert_eq!(request("a/b:c", ArtifactKind::Svg).file_name(), "a-b-c.svg");
        assert_eq!(request("  ", ArtifactKind::Png).file_name(), "Untitled.png");
        assert_eq!(request("..", ArtifactKind::Png).file_name(), "Untitled.png");
    }

    #[tokio::test]
    async fn test_materialize_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let req = request("Plan", ArtifactKind::ExcalidrawSvg);
        let done = CompletedDownload {
            request: req.clone(),
            data: Some(b"<svg/>".to_vec()),
            destination: None,
        };

        let artifact = materialize(done, dir.path()).await.unwrap();
        assert_eq!(artifact.name, "Plan.excalidraw.svg");
        assert_eq!(artifact.kind, ArtifactKind::ExcalidrawSvg);
        assert_eq!(std::fs::read(&artifact.location).unwrap(), b"<svg/>");
    }

    #[tokio::test]
    async fn test_materialize_reads_destination_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let downloaded = dir.path().join("download.png");
        std::fs::write(&downloaded, [9u8, 9, 9]).unwrap();

        let done = CompletedDownload {
            request: request("Plan", ArtifactKind::Png),
            data: None,
            destination: Some(downloaded),
        };
        let artifact = materialize(done, &dir.path().join("out")).await.unwrap();
        assert_eq!(artifact.bytes, vec![9, 9, 9]);
        assert!(artifact.location.ends_with("out/Plan.png"));
    }

    #[tokio::test]
    async fn test_materialize_without_any_data_fails() {
        let dir = tempfile::tempdir().unwrap();
        let done = CompletedDownload {
            request: request("Plan", ArtifactKind::Png),
            data: None,
            destination: None,
        };
        assert!(matches!(
            materialize(done, dir.path()).await,
            Err(DrawbridgeError::ExportFailed(_))
        ));
    }
}
