//! Template scene for new documents.
//!
//! The default template is baked into the binary from `assets/`; a config
//! override points at a file on disk instead.

use std::path::{Path, PathBuf};

use rust_embed::Embed;

use crate::error::{DrawbridgeError, Result};

const BUNDLED_TEMPLATE: &str = "template.excalidraw";

#[derive(Embed)]
#[folder = "assets/"]
struct TemplateAssets;

/// Where the template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Bundled,
    File(PathBuf),
}

impl TemplateSource {
    pub fn from_override(path: Option<PathBuf>) -> Self {
        path.map(Self::File).unwrap_or(Self::Bundled)
    }

    /// Read the template text verbatim.
    pub fn resolve(&self) -> Result<String> {
        match self {
            Self::Bundled => {
                let asset = TemplateAssets::get(BUNDLED_TEMPLATE)
                    .ok_or_else(|| DrawbridgeError::TemplateMissing(PathBuf::from(BUNDLED_TEMPLATE)))?;
                String::from_utf8(asset.data.into_owned()).map_err(|_| {
                    DrawbridgeError::TemplateMissing(PathBuf::from(BUNDLED_TEMPLATE))
                })
            }
            Self::File(path) => read_template_file(path),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Bundled => format!("bundled:{BUNDLED_TEMPLATE}"),
            Self::File(path) => path.display().to_string(),
        }
    }
}

fn read_template_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|_| DrawbridgeError::TemplateMissing(path.to_path_buf()))
}
