use std::path::Path;

use crate::error::ConfigError;
use crate::models::Config;

/// Load a configuration from a JSON file.
///
/// A missing file is not an error: it yields the typed defaults, which is
/// what a fresh deployment wants.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file absent, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io { path: path.to_path_buf(), source: e })?;
    parse_config(&raw).map_err(|e| ConfigError::Parse { path: path.to_path_buf(), source: e })
}

/// Parse a configuration from a JSON string.
pub fn parse_config(raw: &str) -> Result<Config, serde_json::Error> {
    serde_json::from_str(raw)
}
