//! Client-side playback supervision for the bridge's HLS stream
//!
//! The [`RecoveryController`] attaches a media pipeline to a manifest and
//! keeps it alive through transient trouble:
//!
//! - Non-fatal network faults restart the load loop
//! - Non-fatal decode faults re-initialize the decoder
//! - Fatal faults, and non-fatal faults that keep coming, tear the session
//!   down and raise `has_error` until the user retries
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use playback_recovery::{HttpManifestSource, RecoveryController, RecoveryPolicy};
//!
//! let source = Arc::new(HttpManifestSource::new(Duration::from_secs(10))?);
//! let mut controller = RecoveryController::new(source, factory, RecoveryPolicy::default());
//!
//! let flags = controller.attach("http://localhost:5000/static/hls/stream.m3u8").await;
//! if flags.has_error {
//!     // show the retry control, then on click:
//!     controller.retry().await;
//! }
//! ```

pub mod controller;
pub mod error;
pub mod fault;
pub mod manifest;
pub mod pipeline;
pub mod source;

pub use controller::{PlaybackFlags, RecoveryAction, RecoveryController, RecoveryPolicy};
pub use error::{FetchError, ManifestError, PlaybackError};
pub use fault::{Fault, FaultBudget, FaultClass, MediaFault, NetworkFault};
pub use manifest::{MediaPlaylist, Segment};
pub use pipeline::{MediaPipeline, PipelineFactory, PlayRejected};
pub use source::{HttpManifestSource, ManifestSource};
