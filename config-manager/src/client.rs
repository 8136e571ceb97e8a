use serde::{Deserialize, Serialize};

/// Playback recovery tuning for the client-side controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Non-fatal network faults tolerated inside the window before escalating
    pub max_network_retries: u32,
    /// Non-fatal decode faults tolerated inside the window before escalating
    pub max_media_recoveries: u32,
    /// Sliding window length in seconds
    pub fault_window_secs: u64,
    /// Cap for the manifest fetch backoff in seconds
    pub max_backoff_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_network_retries: 3,
            max_media_recoveries: 2,
            fault_window_secs: 30,
            max_backoff_secs: 8,
        }
    }
}

/// Overlay persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Quiet interval before a gesture is persisted, in milliseconds
    pub debounce_ms: u64,
    /// Base URL of the overlay API
    pub api_base: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            api_base: "http://127.0.0.1:5000".to_string(),
        }
    }
}
