use std::fmt;
use std::path::Path;

use config_manager::EncodingConfig;

use crate::validate::redact_credentials;

/// File name pattern of the media segments, relative to the manifest
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// Program plus argument vector for one transcoder invocation.
///
/// Arguments are passed to the OS verbatim; no shell ever sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    fn opt(&mut self, flag: &str, value: impl ToString) -> &mut Self {
        self.arg(flag).arg(value.to_string())
    }

    /// Value following `flag`, if present
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    /// Loggable form with credentials in any URL argument redacted
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains("://") {
                write!(f, " {}", redact_credentials(arg))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Build the ffmpeg invocation that pulls `source_url` over RTSP and writes
/// a live HLS playlist at `manifest_path` with segments beside it.
///
/// Video is re-encoded to H.264 main profile so every browser can decode it;
/// audio is optional in the source and mapped only when present.
pub fn build_hls_command(
    program: &str,
    source_url: &str,
    manifest_path: &Path,
    encoding: &EncodingConfig,
) -> CommandSpec {
    let output_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let segment_pattern = output_dir.join(SEGMENT_PATTERN);

    let mut cmd = CommandSpec::new(program);
    cmd.arg("-hide_banner")
        .arg("-y")
        .opt("-loglevel", "error")
        .opt("-err_detect", "ignore_err")
        .opt("-fflags", "+genpts+discardcorrupt+nobuffer")
        .opt("-flags", "+low_delay")
        .opt("-flags2", "+fast")
        // Input settings
        .opt("-rtsp_transport", &encoding.rtsp_transport)
        .opt("-rtsp_flags", "prefer_tcp")
        .opt("-timeout", encoding.socket_timeout_us)
        .opt("-buffer_size", encoding.buffer_size)
        .opt("-max_delay", encoding.max_delay_us)
        .opt("-reorder_queue_size", encoding.reorder_queue_size)
        .opt("-analyzeduration", encoding.analyze_duration_us)
        .opt("-probesize", encoding.probe_size)
        .opt("-i", source_url)
        // Stream selection
        .opt("-map", "0:v:0")
        .opt("-map", "0:a:0?")
        // Video
        .opt("-c:v", "libx264")
        .opt("-preset", &encoding.video_preset)
        .opt("-tune", "zerolatency")
        .opt("-profile:v", "main")
        .opt("-level", "4.0")
        .opt("-b:v", &encoding.video_bitrate)
        .opt("-maxrate", &encoding.video_maxrate)
        .opt("-bufsize", &encoding.video_bufsize)
        .opt("-g", encoding.keyframe_interval)
        .opt("-keyint_min", encoding.keyframe_interval)
        .opt("-sc_threshold", 0)
        .opt("-pix_fmt", "yuv420p")
        .opt("-avoid_negative_ts", "make_zero")
        .opt("-vsync", "cfr")
        // Audio
        .opt("-c:a", "aac")
        .opt("-b:a", &encoding.audio_bitrate)
        .opt("-ar", encoding.audio_sample_rate)
        .opt("-ac", encoding.audio_channels)
        // HLS output
        .opt("-f", "hls")
        .opt("-hls_time", encoding.segment_seconds)
        .opt("-hls_list_size", encoding.list_size)
        .opt("-hls_flags", "delete_segments+omit_endlist")
        .opt("-hls_segment_type", "mpegts")
        .opt("-hls_segment_filename", segment_pattern.to_string_lossy())
        .opt("-start_number", 1)
        .arg(manifest_path.to_string_lossy());
    cmd
}
