use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::client::{OverlayConfig, PlaybackConfig};
use crate::error::ConfigError;
use crate::paths;
use crate::stream::{EncodingConfig, StreamConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Directory served under /static; HLS output lives in a sub-directory
    pub static_dir: PathBuf,
    /// Allowed CORS origin, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5000".to_string(),
            static_dir: PathBuf::from("static"),
            cors_origin: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub encoding: EncodingConfig,
    pub playback: PlaybackConfig,
    pub overlay: OverlayConfig,
}

impl BridgeConfig {
    /// Check if config exists at default location
    pub fn exists() -> bool {
        paths::bridge_config_path()
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Get default config path
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        paths::bridge_config_path()
    }

    /// Load config from default XDG location
    pub fn load() -> Result<Self, ConfigError> {
        let path = paths::bridge_config_path()?;
        Self::load_from(&path)
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config or return defaults if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save config to default XDG location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = paths::bridge_config_path()?;
        paths::ensure_config_dir()?;
        self.save_to(&path)
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `BRIDGE_*` environment overrides on top of the file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("BRIDGE_BIND") {
            self.server.bind_address = bind;
        }
        if let Some(dir) = lookup("BRIDGE_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(dir);
        }
        if let Some(origin) = lookup("BRIDGE_CORS_ORIGIN") {
            self.server.cors_origin = Some(origin).filter(|o| !o.is_empty());
        }
        if let Some(ffmpeg) = lookup("BRIDGE_FFMPEG") {
            self.stream.ffmpeg_path = ffmpeg;
        }
    }

    /// Reject values that would make the lifecycle manager misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("stream.poll_interval_ms must be > 0".into()));
        }
        if self.stream.max_url_length == 0 {
            return Err(ConfigError::Invalid("stream.max_url_length must be > 0".into()));
        }
        let plain_name = |name: &str| {
            !name.is_empty() && !name.contains('/') && !name.contains('\\') && name != ".."
        };
        if !plain_name(&self.stream.hls_subdir) || !plain_name(&self.stream.manifest_name) {
            return Err(ConfigError::Invalid(
                "stream.hls_subdir and stream.manifest_name must be plain names".into(),
            ));
        }
        if self.encoding.segment_seconds == 0 || self.encoding.list_size == 0 {
            return Err(ConfigError::Invalid(
                "encoding.segment_seconds and encoding.list_size must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Directory the transcoder writes segments and the manifest into
    pub fn hls_dir(&self) -> PathBuf {
        self.server.static_dir.join(&self.stream.hls_subdir)
    }

    /// Public URL path of the manifest, as served by the segment server
    pub fn delivery_path(&self) -> String {
        format!("/static/{}/{}", self.stream.hls_subdir, self.stream.manifest_name)
    }
}
