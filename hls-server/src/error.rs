use stream_lifecycle::LifecycleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HlsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Transcoder not available: {0}")]
    TranscoderUnavailable(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
