use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::Result;

/// Configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Script to start automatically (CLI positional argument wins).
    pub script_path: Option<String>,
    /// Directory searched for the engine settings file.
    pub setting_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads `.env` if present. Everything is optional with sane defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        Config {
            script_path: std::env::var("SCRIPT_PATH").ok(),
            setting_dir: std::env::var("SETTING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Load a JSON settings file if it exists. The schema is owned by the host;
/// the engine passes the value through to `connect` untouched.
pub fn load_setting(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}
