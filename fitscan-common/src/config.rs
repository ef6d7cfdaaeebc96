//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration is a single TOML file. Settings resolve in this
//! order:
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: the service logs a warning and starts
//! with compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "FITSCAN_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "fitscan.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the local database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP port (default 5731)
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub commit: CommitConfig,

    #[serde(default)]
    pub matching: MatchingConfig,

    /// Optional tag → index overrides for semantic index derivation
    #[serde(default)]
    pub semantic_indices: SemanticIndexConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: default_port(),
            logging: LoggingConfig::default(),
            backend: BackendConfig::default(),
            commit: CommitConfig::default(),
            matching: MatchingConfig::default(),
            semantic_indices: SemanticIndexConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Remote backend (function host) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the function host, e.g. `https://project.example.co/functions/v1`
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key sent as bearer token; database and ENV take priority
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub functions: FunctionNames,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            functions: FunctionNames::default(),
        }
    }
}

/// Remote function names, one per pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionNames {
    pub estimate: String,
    pub semantic: String,
    #[serde(rename = "match")]
    pub matching: String,
    pub refine: String,
    pub commit: String,
}

impl Default for FunctionNames {
    fn default() -> Self {
        Self {
            estimate: "scan-estimate".to_string(),
            semantic: "scan-semantic".to_string(),
            matching: "scan-match".to_string(),
            refine: "scan-refine".to_string(),
            commit: "scan-commit".to_string(),
        }
    }
}

/// Where committed scans are written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitTarget {
    /// Remote commit function on the backend
    #[default]
    Remote,
    /// Local SQLite scan store
    Local,
}

/// Commit retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default)]
    pub target: CommitTarget,

    #[serde(default = "default_commit_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_commit_delay_ms")]
    pub retry_delay_ms: u64,

    /// Optional limit on one commit attempt; unset waits for the backend
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            target: CommitTarget::default(),
            max_attempts: default_commit_attempts(),
            retry_delay_ms: default_commit_delay_ms(),
            attempt_timeout_ms: None,
        }
    }
}

/// Archetype matching request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Maximum number of archetypes requested from the matcher
    #[serde(default = "default_match_limit")]
    pub limit: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            limit: default_match_limit(),
        }
    }
}

/// Tag → scalar overrides, merged over the built-in tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticIndexConfig {
    #[serde(default)]
    pub morphotype: BTreeMap<String, f64>,
    #[serde(default)]
    pub muscularity: BTreeMap<String, f64>,
}

fn default_port() -> u16 {
    5731
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_commit_attempts() -> u32 {
    3
}

fn default_commit_delay_ms() -> u64 {
    2000
}

fn default_match_limit() -> u32 {
    5
}

/// Parse a TOML configuration file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load configuration, falling back to defaults when the file is absent
///
/// A file that exists but does not parse is still an error.
pub fn load_or_default(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found at {}, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let config = load_toml_config(path)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Default TOML location: `<config dir>/fitscan/fitscan-bodyscan.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("fitscan").join("fitscan-bodyscan.toml"))
        .unwrap_or_else(|| PathBuf::from("fitscan-bodyscan.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fitscan"))
        .unwrap_or_else(|| PathBuf::from("./fitscan_data"))
}

/// Root folder resolution
pub struct RootFolderResolver<'a> {
    cli_arg: Option<&'a Path>,
    toml: Option<&'a TomlConfig>,
}

impl<'a> RootFolderResolver<'a> {
    pub fn new(cli_arg: Option<&'a Path>, toml: Option<&'a TomlConfig>) -> Self {
        Self { cli_arg, toml }
    }

    /// Resolve using CLI → ENV → TOML → compiled default
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = self.cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml.and_then(|c| c.root_folder.clone()) {
            return path;
        }

        default_root_folder()
    }
}

/// Create the root folder if missing and return the database path inside it
pub fn ensure_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.join(DATABASE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 5731);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.commit.max_attempts, 3);
        assert_eq!(config.commit.retry_delay_ms, 2000);
        assert_eq!(config.commit.target, CommitTarget::Remote);
        assert_eq!(config.matching.limit, 5);
        assert_eq!(config.backend.functions.matching, "scan-match");
        assert!(config.backend.base_url.is_none());
    }

    #[test]
    fn test_function_names_use_match_key() {
        let config: TomlConfig = toml::from_str(
            r#"
            [backend.functions]
            estimate = "a"
            semantic = "b"
            match = "c"
            refine = "d"
            commit = "e"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.functions.matching, "c");
        assert_eq!(config.backend.functions.commit, "e");
    }

    #[test]
    fn test_semantic_index_overrides_parse() {
        let config: TomlConfig = toml::from_str(
            r#"
            [semantic_indices.morphotype]
            "pear" = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.semantic_indices.morphotype.get("pear"), Some(&0.8));
        assert!(config.semantic_indices.muscularity.is_empty());
    }
}
