use thiserror::Error;

/// Why a source URL was refused before any subprocess was touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL is required")]
    Empty,

    #[error("URL exceeds {max} characters")]
    TooLong { max: usize },

    #[error("URL contains forbidden character {0:?}")]
    ForbiddenCharacter(char),

    #[error("URL contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("URL must start with rtsp:// or rtsps://")]
    Scheme,

    #[error("URL could not be parsed: {0}")]
    Malformed(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("URL port must be between 1 and 65535")]
    InvalidPort,
}

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("transcoder executable not found: {0}")]
    NotFound(String),

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn transcoder: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Invalid RTSP URL: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to start stream: {0}")]
    Spawn(#[from] SpawnError),

    #[error("No active stream")]
    NoActiveStream,

    #[error("Transcoder (pid {}) could not be terminated", .pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".into()))]
    TerminationFailed { pid: Option<u32> },
}
