use serde::{Deserialize, Serialize};

/// When the lifecycle manager reports a freshly spawned transcoder as live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// Wait until the transcoder has written a non-empty manifest
    #[default]
    Manifest,
    /// Report live as soon as the subprocess is spawned
    Immediate,
}

/// Transcoder supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Transcoder executable (default: "ffmpeg")
    pub ffmpeg_path: String,
    /// Sub-directory of the static dir the transcoder writes into
    pub hls_subdir: String,
    /// Manifest file name inside the output directory
    pub manifest_name: String,
    /// Maximum accepted source URL length in bytes
    pub max_url_length: usize,
    pub readiness: Readiness,
    /// Seconds to wait for the first manifest before giving up
    pub playlist_timeout_secs: u64,
    /// Milliseconds between manifest polls
    pub poll_interval_ms: u64,
    /// Seconds without manifest updates before a live stream counts as stalled (0 disables)
    pub stall_timeout_secs: u64,
    /// Seconds to wait after SIGTERM before escalating to SIGKILL
    pub graceful_shutdown_secs: u64,
    /// Seconds to wait for the process to be reaped after SIGKILL
    pub kill_timeout_secs: u64,
    /// Remove stream files when the server shuts down
    pub cleanup_on_shutdown: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            hls_subdir: "hls".to_string(),
            manifest_name: "stream.m3u8".to_string(),
            max_url_length: 2048,
            readiness: Readiness::Manifest,
            playlist_timeout_secs: 45,
            poll_interval_ms: 500,
            stall_timeout_secs: 20,
            graceful_shutdown_secs: 5,
            kill_timeout_secs: 2,
            cleanup_on_shutdown: true,
        }
    }
}

/// Encoding profile handed to the transcoder.
///
/// Defaults produce browser-compatible H.264/AAC in MPEG-TS segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub rtsp_transport: String,
    /// Socket timeout in microseconds
    pub socket_timeout_us: u64,
    pub buffer_size: u64,
    /// Max demux delay in microseconds
    pub max_delay_us: u64,
    pub reorder_queue_size: u32,
    pub analyze_duration_us: u64,
    pub probe_size: u64,
    pub video_preset: String,
    pub video_bitrate: String,
    pub video_maxrate: String,
    pub video_bufsize: String,
    pub keyframe_interval: u32,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u8,
    /// Target segment duration in seconds
    pub segment_seconds: u32,
    /// Number of segments kept in the live playlist
    pub list_size: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            rtsp_transport: "tcp".to_string(),
            socket_timeout_us: 15_000_000,
            buffer_size: 4_194_304,
            max_delay_us: 1_000_000,
            reorder_queue_size: 4000,
            analyze_duration_us: 3_000_000,
            probe_size: 5_000_000,
            video_preset: "veryfast".to_string(),
            video_bitrate: "1500k".to_string(),
            video_maxrate: "2000k".to_string(),
            video_bufsize: "4000k".to_string(),
            keyframe_interval: 30,
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 44100,
            audio_channels: 2,
            segment_seconds: 4,
            list_size: 6,
        }
    }
}
