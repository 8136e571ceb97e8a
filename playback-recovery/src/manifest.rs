//! HLS media playlist parsing.

use std::time::Duration;

use hls_m3u8::MediaPlaylist as HlsMediaPlaylist;

use crate::error::ManifestError;

/// One entry of a media playlist
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence: u64,
    pub uri: String,
    pub duration: Duration,
}

/// Parsed media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: Duration,
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    /// `#EXT-X-ENDLIST` seen; a live transcoder never writes it
    pub end_list: bool,
}

impl MediaPlaylist {
    /// Parse a media playlist.
    ///
    /// A playlist without segments is [`ManifestError::Empty`] rather than
    /// malformed: a freshly started transcoder writes its header before the
    /// first segment is complete.
    pub fn parse(input: &str) -> Result<Self, ManifestError> {
        let input = input.trim_start_matches('\u{feff}');
        if !input.trim_start().starts_with("#EXTM3U") {
            return Err(ManifestError::Malformed("missing #EXTM3U header".to_string()));
        }
        if !input.lines().any(|l| l.trim_start().starts_with("#EXTINF")) {
            return Err(ManifestError::Empty);
        }

        let hls_media = HlsMediaPlaylist::try_from(input)
            .map_err(|e| ManifestError::Malformed(e.to_string()))?;

        let media_sequence = hls_media.media_sequence as u64;
        let segments: Vec<Segment> = hls_media
            .segments
            .iter()
            .enumerate()
            .map(|(index, (_idx, seg))| Segment {
                sequence: media_sequence + index as u64,
                uri: seg.uri().to_string(),
                duration: seg.duration.duration(),
            })
            .collect();

        if segments.is_empty() {
            return Err(ManifestError::Empty);
        }

        Ok(Self {
            target_duration: hls_media.target_duration,
            media_sequence,
            segments,
            // Only reliable end-of-stream marker
            end_list: input.contains("#EXT-X-ENDLIST"),
        })
    }

    /// First position playback can start from
    pub fn first_playable(&self) -> Option<&Segment> {
        self.segments.first()
    }

    pub fn is_live(&self) -> bool {
        !self.end_list
    }

    /// Total duration of the listed segments
    pub fn duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }
}
