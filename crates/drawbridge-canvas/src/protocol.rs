//! Bridge commands, engine events, and correlation tokens.
//!
//! Commands travel to the engine as JSON objects tagged by `action`. The engine
//! answers with named messages carrying a JSON payload, decoded here into
//! [`BridgeEvent`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use drawbridge_core::error::{DrawbridgeError, Result};

/// Correlates an asynchronous request with the events answering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(Uuid);

impl Token {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Image container requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Png,
    Svg,
}

/// Format tag of an exported artifact.
///
/// The scene-embedded variants carry the full scene so the image can be
/// imported back as a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Png,
    ExcalidrawPng,
    Svg,
    ExcalidrawSvg,
}

impl ArtifactKind {
    pub fn new(format: ImageFormat, embed_scene: bool) -> Self {
        match (format, embed_scene) {
            (ImageFormat::Png, false) => Self::Png,
            (ImageFormat::Png, true) => Self::ExcalidrawPng,
            (ImageFormat::Svg, false) => Self::Svg,
            (ImageFormat::Svg, true) => Self::ExcalidrawSvg,
        }
    }

    pub fn format(self) -> ImageFormat {
        match self {
            Self::Png | Self::ExcalidrawPng => ImageFormat::Png,
            Self::Svg | Self::ExcalidrawSvg => ImageFormat::Svg,
        }
    }

    pub fn embeds_scene(self) -> bool {
        matches!(self, Self::ExcalidrawPng | Self::ExcalidrawSvg)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::ExcalidrawPng => "excalidraw.png",
            Self::Svg => "svg",
            Self::ExcalidrawSvg => "excalidraw.svg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self.format() {
            ImageFormat::Png => "image/png",
            ImageFormat::Svg => "image/svg+xml",
        }
    }
}

/// Toolbar tools and the engine shortcut that activates each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Selection,
    Rectangle,
    Diamond,
    Ellipse,
    Arrow,
    Line,
    Freedraw,
    Text,
    Image,
    Eraser,
    Laser,
    Hand,
}

/// Key that backs out of the current tool.
pub const ESCAPE_KEY: &str = "\u{1B}";

impl Tool {
    pub fn key(self) -> &'static str {
        match self {
            Self::Selection => "v",
            Self::Rectangle => "r",
            Self::Diamond => "d",
            Self::Ellipse => "o",
            Self::Arrow => "a",
            Self::Line => "l",
            Self::Freedraw => "p",
            Self::Text => "t",
            Self::Image => "9",
            Self::Eraser => "e",
            Self::Laser => "k",
            Self::Hand => "h",
        }
    }
}

/// Coordinator → engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BridgeCommand {
    /// Replace the engine scene with a document's scene.
    #[serde(rename_all = "camelCase")]
    LoadScene { document_id: Uuid, scene: Value },

    /// Press a toolbar shortcut.
    #[serde(rename_all = "camelCase")]
    ToggleTool { key: String },

    /// Render `elements` into an image and start a download tagged with `token`.
    #[serde(rename_all = "camelCase")]
    ExportToImage {
        token: Token,
        format: ImageFormat,
        embed_scene: bool,
        elements: Vec<Value>,
    },
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadScene { .. } => "loadScene",
            Self::ToggleTool { .. } => "toggleTool",
            Self::ExportToImage { .. } => "exportToImage",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| DrawbridgeError::Transport(format!("bad command: {e}")))
    }
}

/// A named message as delivered by the engine host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMessage {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

/// Engine → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BridgeEvent {
    #[serde(rename_all = "camelCase")]
    SceneReady { document_id: Uuid },

    #[serde(rename_all = "camelCase")]
    SceneChanged {
        document_id: Uuid,
        elements: Vec<Value>,
    },

    #[serde(rename_all = "camelCase")]
    ExportDataReady {
        token: Token,
        format: ImageFormat,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },

    #[serde(rename_all = "camelCase")]
    DownloadStarted {
        token: Token,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PathBuf>,
    },

    #[serde(rename_all = "camelCase")]
    DownloadFinished { token: Token },

    #[serde(rename_all = "camelCase")]
    ExportFailed { token: Token, reason: String },
}

impl BridgeEvent {
    /// Decode a named engine message.
    pub fn decode(message: &EngineMessage) -> Result<Self> {
        let mut fields = match &message.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(DrawbridgeError::Transport(format!(
                    "{} payload must be an object, got {other}",
                    message.name
                )));
            }
        };
        fields.insert("event".into(), Value::String(message.name.clone()));
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| DrawbridgeError::Transport(format!("bad {} event: {e}", message.name)))
    }

    /// Encode as a named engine message.
    pub fn encode(&self) -> Result<EngineMessage> {
        let mut value = serde_json::to_value(self)?;
        let name = value
            .as_object_mut()
            .and_then(|obj| obj.remove("event"))
            .and_then(|v| v.as_str().map(str::to_owned))
            .ok_or_else(|| DrawbridgeError::Transport("event without a name".into()))?;
        Ok(EngineMessage {
            name,
            payload: value,
        })
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape() {
        let token = Token::new();
        let cmd = BridgeCommand::ExportToImage {
            token,
            format: ImageFormat::Svg,
            embed_scene: true,
            elements: vec![json!({"id": "a"})],
        };
        let value: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(value["action"], "exportToImage");
        assert_eq!(value["embedScene"], true);
        assert_eq!(value["format"], "svg");
        assert_eq!(value["token"], token.to_string());
        assert_eq!(cmd.name(), "exportToImage");

        let toggle = BridgeCommand::ToggleTool { key: "r".into() }.encode().unwrap();
        assert_eq!(toggle, r#"{"action":"toggleTool","key":"r"}"#);
    }

    #[test]
    fn test_decode_named_events() {
        let doc = Uuid::new_v4();
        let ready = EngineMessage {
            name: "sceneReady".into(),
            payload: json!({ "documentId": doc }),
        };
        assert_eq!(
            BridgeEvent::decode(&ready).unwrap(),
            BridgeEvent::SceneReady { document_id: doc }
        );

        let token = Token::new();
        let data = EngineMessage {
            name: "exportDataReady".into(),
            payload: json!({ "token": token, "format": "png", "data": "iVBORw==" }),
        };
        match BridgeEvent::decode(&data).unwrap() {
            BridgeEvent::ExportDataReady { data, format, .. } => {
                assert_eq!(format, ImageFormat::Png);
                assert_eq!(data, vec![0x89, b'P', b'N', b'G']);
            }
            other => panic!("unexpected event {other:?}"),
        }

        let started = EngineMessage {
            name: "downloadStarted".into(),
            payload: json!({ "token": token }),
        };
        assert_eq!(
            BridgeEvent::decode(&started).unwrap(),
            BridgeEvent::DownloadStarted {
                token,
                destination: None
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_or_malformed() {
        let unknown = EngineMessage {
            name: "selectionChanged".into(),
            payload: json!({}),
        };
        assert!(BridgeEvent::decode(&unknown).is_err());

        let scalar = EngineMessage {
            name: "sceneReady".into(),
            payload: json!(5),
        };
        assert!(BridgeEvent::decode(&scalar).is_err());
    }

    #[test]
    fn test_event_encode_strips_tag() {
        let token = Token::new();
        let msg = BridgeEvent::DownloadFinished { token }.encode().unwrap();
        assert_eq!(msg.name, "downloadFinished");
        assert_eq!(msg.payload, json!({ "token": token }));
    }

    #[test]
    fn test_artifact_kinds() {
        assert_eq!(ArtifactKind::new(ImageFormat::Png, true), ArtifactKind::ExcalidrawPng);
        assert_eq!(ArtifactKind::new(ImageFormat::Png, false), ArtifactKind::Png);
        assert_eq!(ArtifactKind::ExcalidrawSvg.extension(), "excalidraw.svg");
        assert_eq!(ArtifactKind::ExcalidrawSvg.mime_type(), "image/svg+xml");
        assert!(!ArtifactKind::Svg.embeds_scene());
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(Token::new(), Token::new());
    }
}
