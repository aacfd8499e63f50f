//! Scene descriptors and the elements merge.
//!
//! A scene is the engine's JSON object. The native side only understands the
//! `elements` array; every other key belongs to the engine and is carried
//! through untouched in `extra`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{DrawbridgeError, Result};

/// A scene descriptor with typed access to `elements` and all other keys preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    /// A `null` elements key reads as an empty scene.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub elements: Vec<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SceneDescriptor {
    /// Parse stored scene text. `None` when the text is not a scene object.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| DrawbridgeError::MalformedScene(e.to_string()))
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Replace the elements, leaving engine-owned keys alone.
    pub fn with_elements(mut self, elements: Vec<Value>) -> Self {
        self.elements = elements;
        self
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<Value>, D::Error> {
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse an elements payload, rejecting anything that isn't a JSON array.
pub fn parse_elements(raw: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(DrawbridgeError::MalformedScene(format!(
            "elements must be an array, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(DrawbridgeError::MalformedScene(e.to_string())),
    }
}

/// Compute new scene text from existing scene text and a new elements payload.
///
/// Returns `Ok(None)` when there is no existing content or it is not a scene
/// object: there is nothing to merge into. Timestamps are the caller's job.
pub fn merge_elements(existing: Option<&str>, new_elements: &str) -> Result<Option<String>> {
    let Some(scene) = existing.and_then(SceneDescriptor::parse) else {
        return Ok(None);
    };
    let elements = parse_elements(new_elements)?;
    scene.with_elements(elements).to_json_string().map(Some)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn merged_value(existing: &str, elements: &str) -> Value {
        let out = merge_elements(Some(existing), elements).unwrap().unwrap();
        serde_json::from_str(&out).unwrap()
    }

    #[test]
    fn test_merge_replaces_elements_and_keeps_app_state() {
        let existing = r#"{"elements":[{"id":"a"}],"appState":{"zoom":2}}"#;
        let result = merged_value(existing, r#"[{"id":"b"}]"#);
        assert_eq!(
            result,
            json!({"elements": [{"id": "b"}], "appState": {"zoom": 2}})
        );
    }

    #[test]
    fn test_null_elements_still_merge() {
        let existing = r#"{"elements":null,"appState":{"zoom":3}}"#;
        let result = merged_value(existing, r#"[{"id":"c"}]"#);
        assert_eq!(
            result,
            json!({"elements": [{"id": "c"}], "appState": {"zoom": 3}})
        );
    }

    #[test]
    fn test_elements_of_wrong_type_is_not_a_scene() {
        let existing = r#"{"elements":{"id":"a"},"appState":{}}"#;
        assert!(merge_elements(Some(existing), "[]").unwrap().is_none());
    }

    #[test]
    fn test_merge_preserves_unknown_keys() {
        let existing = json!({
            "type": "excalidraw",
            "version": 2,
            "elements": [{"id": "a"}],
            "files": {"f1": {"mimeType": "image/png", "dataURL": "data:..."}},
            "appState": {"viewBackgroundColor": "#fff", "gridSize": null},
        });
        let result = merged_value(&existing.to_string(), "[]");

        assert_eq!(result["elements"], json!([]));
        for key in ["type", "version", "files", "appState"] {
            assert_eq!(result[key], existing[key], "key {key} changed");
        }
        assert_eq!(result.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let existing = r#"{"elements":[{"id":"a"}],"appState":{"zoom":2},"files":{}}"#;
        let elements = r#"[{"id":"b","x":10},{"id":"c"}]"#;

        let once = merge_elements(Some(existing), elements).unwrap().unwrap();
        let twice = merge_elements(Some(&once), elements).unwrap().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_adds_missing_elements_key() {
        let result = merged_value(r#"{"appState":{}}"#, r#"[{"id":"x"}]"#);
        assert_eq!(result, json!({"elements": [{"id": "x"}], "appState": {}}));
    }

    #[test]
    fn test_absent_content_is_noop() {
        assert!(merge_elements(None, "[]").unwrap().is_none());
    }

    #[test]
    fn test_unparsable_content_is_noop() {
        assert!(merge_elements(Some("not json"), "[]").unwrap().is_none());
        assert!(merge_elements(Some("[1,2]"), "[]").unwrap().is_none());
        assert!(merge_elements(Some(r#"{"elements": 5}"#), "[]").unwrap().is_none());
    }

    #[test]
    fn test_empty_content_is_not_absent() {
        // "{}" is a valid, empty scene: the merge applies
        let result = merged_value("{}", "[]");
        assert_eq!(result, json!({"elements": []}));
    }

    #[test]
    fn test_non_array_elements_is_malformed() {
        let existing = r#"{"elements":[]}"#;
        for bad in [r#"{"id":"a"}"#, "42", "\"x\"", "[1,", ""] {
            let err = merge_elements(Some(existing), bad).unwrap_err();
            assert!(
                matches!(err, DrawbridgeError::MalformedScene(_)),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_descriptor_keeps_key_order_of_extras() {
        let scene = SceneDescriptor::parse(r#"{"b":1,"elements":[],"a":2}"#).unwrap();
        let keys: Vec<_> = scene.extra.keys().cloned().collect();
        assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
    }
}
