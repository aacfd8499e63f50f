//! Configuration loading and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level Drawbridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Workspace directory holding `workspace.json` (default: `~/.drawbridge/workspace`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Override for the bundled template scene.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Quiescence window for coalescing tool switches.
    #[serde(default = "default_tool_debounce_ms")]
    pub tool_debounce_ms: u64,

    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,

    /// Where exported artifacts are written (default: `$TMPDIR/drawbridge-exports`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tool_debounce_ms: default_tool_debounce_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            export_timeout_ms: default_export_timeout_ms(),
            export_dir: None,
        }
    }
}

fn default_tool_debounce_ms() -> u64 {
    50
}

fn default_load_timeout_ms() -> u64 {
    10_000
}

fn default_export_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "drawbridge_canvas=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::DrawbridgeError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw)?;

        json5::from_str(&substituted)
            .map_err(|e| crate::error::DrawbridgeError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Resolve the workspace store directory.
    pub fn store_dir(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| data_dir().join("workspace"))
    }

    /// Template override path, if configured.
    pub fn template_path(&self) -> Option<PathBuf> {
        self.template
            .as_ref()
            .and_then(|t| t.path.as_deref())
            .map(expand_path)
    }

    pub fn tool_debounce(&self) -> Duration {
        Duration::from_millis(
            self.bridge
                .as_ref()
                .map(|b| b.tool_debounce_ms)
                .unwrap_or_else(default_tool_debounce_ms),
        )
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(
            self.bridge
                .as_ref()
                .map(|b| b.load_timeout_ms)
                .unwrap_or_else(default_load_timeout_ms),
        )
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(
            self.bridge
                .as_ref()
                .map(|b| b.export_timeout_ms)
                .unwrap_or_else(default_export_timeout_ms),
        )
    }

    /// Directory exported artifacts are materialized into.
    pub fn export_dir(&self) -> PathBuf {
        self.bridge
            .as_ref()
            .and_then(|b| b.export_dir.as_deref())
            .map(expand_path)
            .unwrap_or_else(|| std::env::temp_dir().join("drawbridge-exports"))
    }
}

/// Base data directory: `~/.drawbridge`.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".drawbridge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_DB_STORE_DIR", "/tmp/drawings") };
        let input = r#"{"store": {"dir": "${TEST_DB_STORE_DIR}"}, "other": "plain"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("/tmp/drawings"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_DB_STORE_DIR") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_DB_TEST}"}"#;
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tool_debounce(), Duration::from_millis(50));
        assert_eq!(config.load_timeout(), Duration::from_secs(10));
        assert_eq!(config.export_timeout(), Duration::from_secs(30));
        assert!(config.template_path().is_none());
        assert!(config.store_dir().ends_with("workspace"));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert!(config.store.is_none());
    }

    #[test]
    fn test_load_json5_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // trailing commas and comments are fine
                store: { dir: "/var/drawbridge" },
                bridge: { tool_debounce_ms: 20, },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.store_dir(), PathBuf::from("/var/drawbridge"));
        assert_eq!(config.tool_debounce(), Duration::from_millis(20));
        // Unset bridge fields fall back to serde defaults
        assert_eq!(config.export_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ store: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, crate::error::DrawbridgeError::Config(_)));
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_logging_default_matches_serde_defaults() {
        let built = LoggingConfig::default();
        let parsed: LoggingConfig = json5::from_str("{}").unwrap();
        assert_eq!(built.format, parsed.format);
        assert_eq!(built.output, parsed.output);
        assert_eq!(built.format, "plain");
        assert_eq!(built.output, "stderr");
    }
}
