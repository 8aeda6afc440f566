//! User configuration loading for stockbridge.
//!
//! User config location: $XDG_CONFIG_HOME/stockbridge/stockbridge.toml
//! Fallback: the platform config directory from `dirs::config_dir()`.

use std::path::PathBuf;

use super::settings::SettingsLayer;
use crate::error::ConfigError;

const APP_DIR: &str = "stockbridge";
const FILE_NAME: &str = "stockbridge.toml";

/// Returns the path to the user configuration file, if a config directory
/// can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg_config).join(APP_DIR).join(FILE_NAME));
    }
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
}

/// Load the user config layer. A missing file is not an error.
pub fn load_user_config() -> Result<Option<SettingsLayer>, ConfigError> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    let layer = SettingsLayer::from_file(&path)?;
    log::info!(
        target: "stockbridge::config",
        "Loaded user config from {}",
        path.display()
    );
    Ok(Some(layer))
}
