use thiserror::Error;

use crate::model::PatchError;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Overlay not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Invalid(#[from] PatchError),

    #[error("Overlay API rejected the update ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid overlay API address: {0}")]
    InvalidBase(String),
}
