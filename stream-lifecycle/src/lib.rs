//! Stream lifecycle for the RTSP to HLS bridge
//!
//! Turns an RTSP source address into a live HLS playlist by supervising a
//! single ffmpeg subprocess.
//!
//! # Features
//! - Source URL validation before anything touches the OS
//! - At most one transcoder at any instant; switching sources reaps the old
//!   process before the new one is spawned
//! - Graceful SIGTERM with SIGKILL escalation
//! - Readiness detection on the first manifest, plus stall detection
//! - One observable state (`idle`, `connecting`, `live`, `error`)
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use config_manager::BridgeConfig;
//! use stream_lifecycle::{FfmpegSpawner, LifecycleManager};
//!
//! let config = BridgeConfig::load_or_default();
//! let manager = LifecycleManager::new(&config, Arc::new(FfmpegSpawner));
//!
//! let report = manager.start("rtsp://camera.local:554/stream1").await?;
//! println!("playlist at {}", report.delivery_path);
//!
//! manager.stop().await?;
//! ```

pub mod command;
pub mod error;
pub mod manager;
pub mod output;
pub mod process;
pub mod state;
pub mod validate;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{build_hls_command, CommandSpec, SEGMENT_PATTERN};
pub use error::{LifecycleError, SpawnError, ValidationError};
pub use manager::{LifecycleManager, StartReport};
pub use output::OutputDir;
pub use process::{ExitInfo, FfmpegSpawner, ProcessHandle, Spawner};
pub use state::{StateWatcher, StreamState, StreamStateStore, StreamStatus};
pub use validate::{redact_credentials, validate_source_url, MAX_URL_LENGTH};

/// First line of `<program> -version`, or `None` if the transcoder cannot run
pub async fn ffmpeg_version(program: &str) -> Option<String> {
    let output = tokio::process::Command::new(program)
        .arg("-version")
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .ok()?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout.lines().next().map(|s| s.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_transcoder_has_no_version() {
        assert!(ffmpeg_version("definitely-not-a-real-transcoder-binary").await.is_none());
    }
}
