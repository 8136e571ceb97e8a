//! Stream State Store: the one place lifecycle status is read from.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Idle,
    Connecting,
    Live,
    Error,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Idle => "idle",
            StreamStatus::Connecting => "connecting",
            StreamStatus::Live => "live",
            StreamStatus::Error => "error",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the stream lifecycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    pub status: StreamStatus,
    pub source_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            status: StreamStatus::Idle,
            source_url: None,
            started_at: None,
            last_error: None,
        }
    }
}

/// State tagged with the stream generation that produced it. Writers from a
/// superseded generation are ignored so a slow watcher can never overwrite
/// the state of its successor.
#[derive(Debug, Clone, Default)]
struct Versioned {
    generation: u64,
    state: StreamState,
}

/// Process-wide stream state handle.
///
/// Cheap to clone; every clone observes the same state. All transitions are
/// applied atomically through one `watch` channel, so readers see either the
/// previous or the next state and never a mix of the two.
#[derive(Debug, Clone, Default)]
pub struct StreamStateStore {
    tx: Arc<watch::Sender<Versioned>>,
}

impl StreamStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state. Never blocks on subprocess I/O.
    pub fn snapshot(&self) -> StreamState {
        self.tx.borrow().state.clone()
    }

    /// Watch for state changes
    pub fn subscribe(&self) -> StateWatcher {
        StateWatcher {
            rx: self.tx.subscribe(),
        }
    }

    /// Open a new generation in `connecting`, clearing the previous error.
    pub(crate) fn begin(&self, source_url: &str) -> u64 {
        let mut generation = 0;
        self.tx.send_modify(|v| {
            v.generation += 1;
            generation = v.generation;
            v.state = StreamState {
                status: StreamStatus::Connecting,
                source_url: Some(source_url.to_string()),
                started_at: None,
                last_error: None,
            };
        });
        generation
    }

    /// `connecting -> live` for the given generation
    pub(crate) fn mark_live(&self, generation: u64) -> bool {
        self.tx.send_if_modified(|v| {
            if v.generation != generation || v.state.status != StreamStatus::Connecting {
                return false;
            }
            v.state.status = StreamStatus::Live;
            v.state.started_at = Some(Utc::now());
            true
        })
    }

    /// Move the given generation to `error`
    pub(crate) fn mark_error(&self, generation: u64, message: impl Into<String>) -> bool {
        let message = message.into();
        self.tx.send_if_modified(|v| {
            if v.generation != generation {
                return false;
            }
            v.state.status = StreamStatus::Error;
            v.state.last_error = Some(message);
            true
        })
    }

    /// Explicit stop: back to `idle` with the source cleared. The last error
    /// is kept for diagnostics; only a new start clears it.
    pub(crate) fn mark_idle(&self) {
        self.tx.send_modify(|v| {
            v.generation += 1;
            v.state.status = StreamStatus::Idle;
            v.state.source_url = None;
            v.state.started_at = None;
        });
    }
}

/// Receiving side of [`StreamStateStore::subscribe`].
#[derive(Debug, Clone)]
pub struct StateWatcher {
    rx: watch::Receiver<Versioned>,
}

impl StateWatcher {
    /// Wait for the next transition. Returns `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<StreamState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().state.clone())
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&StreamState) -> bool) -> Option<StreamState> {
        self.rx
            .wait_for(|v| predicate(&v.state))
            .await
            .ok()
            .map(|v| v.state.clone())
    }
}
