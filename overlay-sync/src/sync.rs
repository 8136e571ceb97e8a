//! Debounced persistence of overlay gestures.
//!
//! Every gesture update replaces the local draft immediately and re-arms a
//! quiet timer. Only when the timer elapses without another update is the
//! draft written, so a drag of any length produces one write carrying the
//! final position.

use std::sync::Arc;
use std::time::Duration;

use config_manager::OverlayConfig;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::OverlayDraft;
use crate::persist::OverlayPersistence;

/// Persistence progress of the most recent gesture
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    /// Waiting for the gesture to settle
    Pending,
    Saving,
    Saved,
    Failed(String),
}

pub struct OverlaySyncEngine {
    id: Arc<str>,
    store: Arc<dyn OverlayPersistence>,
    quiet: Duration,
    draft: Option<OverlayDraft>,
    pending: Option<CancellationToken>,
    status: Arc<watch::Sender<SyncStatus>>,
    // Writes land in gesture order even if one is slow
    write_lock: Arc<Mutex<()>>,
}

impl OverlaySyncEngine {
    pub fn new(id: impl Into<String>, store: Arc<dyn OverlayPersistence>, quiet: Duration) -> Self {
        let id: String = id.into();
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            id: Arc::from(id),
            store,
            quiet,
            draft: None,
            pending: None,
            status: Arc::new(status),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(
        id: impl Into<String>,
        store: Arc<dyn OverlayPersistence>,
        config: &OverlayConfig,
    ) -> Self {
        Self::new(id, store, Duration::from_millis(config.debounce_ms))
    }

    pub fn overlay_id(&self) -> &str {
        &self.id
    }

    /// Latest local position, ahead of whatever has been persisted
    pub fn draft(&self) -> Option<OverlayDraft> {
        self.draft
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Record a new candidate position and re-arm the quiet timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_gesture_update(&mut self, candidate: OverlayDraft) {
        let draft = candidate.clamped();
        self.draft = Some(draft);

        let token = CancellationToken::new();
        if let Some(previous) = self.pending.replace(token.clone()) {
            previous.cancel();
        }
        self.status.send_replace(SyncStatus::Pending);

        let deadline = Instant::now() + self.quiet;
        let id = Arc::clone(&self.id);
        let store = Arc::clone(&self.store);
        let status = Arc::clone(&self.status);
        let write_lock = Arc::clone(&self.write_lock);

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep_until(deadline) => {}
            }

            let _guard = write_lock.lock().await;
            if token.is_cancelled() {
                return;
            }
            status.send_replace(SyncStatus::Saving);
            debug!("Persisting overlay {} at ({}, {})", id, draft.x, draft.y);

            let result = store.persist(&id, &draft.into_patch()).await;
            // A newer gesture owns the status now
            if token.is_cancelled() {
                return;
            }
            match result {
                Ok(_) => {
                    status.send_replace(SyncStatus::Saved);
                }
                Err(e) => {
                    warn!("Failed to persist overlay {}: {}", id, e);
                    status.send_replace(SyncStatus::Failed(e.to_string()));
                }
            }
        });
    }

    /// Drop any scheduled write; the owning view is going away.
    pub fn on_unmount(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        if *self.status.borrow() == SyncStatus::Pending {
            self.status.send_replace(SyncStatus::Idle);
        }
    }
}

impl Drop for OverlaySyncEngine {
    fn drop(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }
}
