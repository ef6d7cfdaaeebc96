//! Configuration resolution for fitscan-bodyscan
//!
//! The backend API key resolves Database → ENV → TOML. Other settings come
//! from the bootstrap TOML only.

use fitscan_common::config::TomlConfig;
use fitscan_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Environment variable holding the backend API key
pub const API_KEY_ENV: &str = "FITSCAN_BACKEND_API_KEY";

/// Resolve the backend API key from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_backend_api_key(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<String> {
    let db_key = crate::db::settings::get_backend_api_key(db).await?;
    let env_key = std::env::var(API_KEY_ENV).ok();
    let toml_key = toml_config.backend.api_key.clone();

    resolve_from_sources(db_key, env_key, toml_key)
}

/// Pick the highest-priority valid key
pub fn resolve_from_sources(
    db_key: Option<String>,
    env_key: Option<String>,
    toml_key: Option<String>,
) -> Result<String> {
    let candidates = [
        ("database", db_key),
        ("environment", env_key),
        ("TOML", toml_key),
    ];

    let valid: Vec<(&str, String)> = candidates
        .into_iter()
        .filter_map(|(source, key)| key.filter(|k| is_valid_key(k)).map(|k| (source, k)))
        .collect();

    if valid.len() > 1 {
        let sources: Vec<&str> = valid.iter().map(|(s, _)| *s).collect();
        warn!(
            "Backend API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    match valid.into_iter().next() {
        Some((source, key)) => {
            info!("Backend API key loaded from {}", source);
            Ok(key)
        }
        None => Err(Error::Config(format!(
            "Backend API key not configured. Please configure using one of:\n\
             1. Database: settings.backend_api_key\n\
             2. Environment: {}=your-key-here\n\
             3. TOML config: [backend] api_key = \"your-key\"",
            API_KEY_ENV
        ))),
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
