//! HTTP surface of the RTSP to HLS bridge.
//!
//! Two concerns live here:
//!
//! - **Stream control**: connect, disconnect and status endpoints backed by
//!   the [`stream_lifecycle::LifecycleManager`]
//! - **Segment serving**: the manifest and MPEG-TS segments the transcoder
//!   writes, served as static content
//!
//! # Architecture
//!
//! ```text
//! Browser <--HLS/JSON--> hls-server --spawns--> ffmpeg <--RTSP--> camera
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use hls_server::{routes::router, HlsState};
//! use std::sync::Arc;
//!
//! let manager = Arc::new(LifecycleManager::new(&config, Arc::new(FfmpegSpawner)));
//! let state = Arc::new(HlsState::new(&config, manager));
//! let app = router(state);
//! ```
//!
//! # Endpoints
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `POST /api/rtsp/connect` | Start (or switch) the stream |
//! | `POST /api/rtsp/disconnect` | Stop the stream |
//! | `GET /api/rtsp/status` | Current lifecycle state |
//! | `GET /static/hls/stream.m3u8` | Live HLS playlist |
//! | `GET /static/hls/<segment>.ts` | Live segment |

pub mod error;
pub mod routes;
mod state;

pub use error::HlsError;
pub use state::HlsState;

/// Check that the transcoder can be run, returning its version line.
pub async fn check_dependencies(ffmpeg_path: &str) -> Result<String, HlsError> {
    stream_lifecycle::ffmpeg_version(ffmpeg_path)
        .await
        .ok_or_else(|| HlsError::TranscoderUnavailable(ffmpeg_path.to_string()))
}
