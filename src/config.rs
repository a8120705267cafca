use std::path::PathBuf;

use crate::api::ClientConfig;

pub const STATE_PATH_ENV: &str = "PERISCOPE_STATE_PATH";
pub const TEMP_DIR_ENV: &str = "PERISCOPE_TEMP_DIR";

/// Configuration for a [`Periscope`](crate::Periscope)
#[derive(Debug, Clone)]
pub struct PeriscopeConfig {
    /// Where the in-progress source is recorded between runs.
    pub state_path: PathBuf,
    /// Staging area for transfers that have no destination.
    pub temp_dir: PathBuf,
    pub client: ClientConfig,
}

impl Default for PeriscopeConfig {
    fn default() -> Self {
        let state_root = home::home_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            state_path: state_root.join(".periscope").join("state.json"),
            temp_dir: std::env::temp_dir(),
            client: ClientConfig::default(),
        }
    }
}

impl PeriscopeConfig {
    /// Defaults, overridden by `PERISCOPE_STATE_PATH` and `PERISCOPE_TEMP_DIR`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(path) = std::env::var_os(STATE_PATH_ENV).filter(|v| !v.is_empty()) {
            config.state_path = PathBuf::from(path);
        }
        if let Some(dir) = std::env::var_os(TEMP_DIR_ENV).filter(|v| !v.is_empty()) {
            config.temp_dir = PathBuf::from(dir);
        }
        config
    }
}
