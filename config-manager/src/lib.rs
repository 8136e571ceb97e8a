mod client;
mod config;
mod error;
mod paths;
mod stream;

pub use client::{OverlayConfig, PlaybackConfig};
pub use config::{BridgeConfig, ServerConfig};
pub use error::ConfigError;
pub use paths::{bridge_config_path, config_dir, ensure_config_dir};
pub use stream::{EncodingConfig, Readiness, StreamConfig};
