//! Overlay records and debounced persistence of drag/resize gestures.
//!
//! [`OverlaySyncEngine`] sits between a view's gesture callbacks and an
//! [`OverlayPersistence`] backend. Gesture updates are cheap and synchronous;
//! the backend sees one write per settled gesture.

mod error;
mod model;
mod persist;
mod sync;

pub use error::PersistError;
pub use model::{
    Overlay, OverlayDraft, OverlayKind, OverlayPatch, PatchError, MAX_CONTENT_LENGTH,
    MAX_COORDINATE, MAX_DIMENSION, MAX_Z_INDEX, MIN_COORDINATE, MIN_DIMENSION, MIN_Z_INDEX,
};
pub use persist::{HttpOverlayStore, InMemoryOverlayStore, OverlayPersistence};
pub use sync::{OverlaySyncEngine, SyncStatus};
