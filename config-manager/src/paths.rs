use std::path::PathBuf;

use crate::error::ConfigError;

/// Get XDG config directory for the bridge
/// Returns ~/.config/rtsp-overlay or $XDG_CONFIG_HOME/rtsp-overlay
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|p| p.join("rtsp-overlay"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Get default config file path for the bridge server
/// Returns ~/.config/rtsp-overlay/bridge.toml
pub fn bridge_config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("bridge.toml"))
}

/// Ensure config directory exists, creating it if necessary.
/// On Unix, sets directory permissions to 0700 (owner only).
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&dir, perms)?;
        }
    }
    Ok(dir)
}
