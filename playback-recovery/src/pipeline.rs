//! The media pipeline the controller drives.
//!
//! In a browser this is the HLS player; here it is whatever implements
//! [`MediaPipeline`]. All calls are synchronous so that teardown never waits
//! on network I/O.

use std::fmt;

use url::Url;

use crate::manifest::MediaPlaylist;

/// Automatic playback was refused (autoplay policy, muted tab, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRejected(pub String);

impl fmt::Display for PlayRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback rejected: {}", self.0)
    }
}

pub trait MediaPipeline: Send {
    /// Point the pipeline at a parsed manifest
    fn load_source(&mut self, manifest_url: &Url, playlist: &MediaPlaylist);

    /// (Re)start segment loading from the current position
    fn start_load(&mut self);

    /// Re-initialize the decode path without a full teardown
    fn recover_media_error(&mut self);

    fn play(&mut self) -> Result<(), PlayRejected>;

    /// Release every resource held by the pipeline
    fn destroy(&mut self);
}

/// Creates one pipeline per playback session
pub trait PipelineFactory: Send + Sync {
    fn create(&self) -> Box<dyn MediaPipeline>;
}

impl<F> PipelineFactory for F
where
    F: Fn() -> Box<dyn MediaPipeline> + Send + Sync,
{
    fn create(&self) -> Box<dyn MediaPipeline> {
        self()
    }
}
