use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// A syntactically valid playlist with nothing to play yet. The
    /// transcoder may simply not have finished its first segment.
    #[error("playlist has no segments")]
    Empty,

    #[error("malformed playlist: {0}")]
    Malformed(String),
}

impl ManifestError {
    /// Whether fetching the playlist again could fix this
    pub fn is_transient(&self) -> bool {
        matches!(self, ManifestError::Empty)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("invalid manifest URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to fetch manifest: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("too many {0} faults")]
    Escalated(&'static str),

    #[error("{0}")]
    Fatal(String),
}
