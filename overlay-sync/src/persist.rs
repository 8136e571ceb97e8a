//! Where overlay updates end up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::PersistError;
use crate::model::{Overlay, OverlayPatch};

/// Applies a partial update to a stored overlay and returns the new record.
#[async_trait]
pub trait OverlayPersistence: Send + Sync {
    async fn persist(&self, id: &str, patch: &OverlayPatch) -> Result<Overlay, PersistError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to the overlay REST API.
#[derive(Clone, Debug)]
pub struct HttpOverlayStore {
    inner: Client,
    base: Url,
    request_timeout: Duration,
}

impl HttpOverlayStore {
    pub fn new(api_base: &str, request_timeout: Duration) -> Result<Self, PersistError> {
        let base = Url::parse(api_base).map_err(|e| PersistError::InvalidBase(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(PersistError::InvalidBase(api_base.to_string()));
        }
        let inner = Client::builder().build()?;
        Ok(Self {
            inner,
            base,
            request_timeout,
        })
    }

    /// `{base}/api/overlays/{id}`, with the id percent-encoded as one segment
    pub fn endpoint(&self, id: &str) -> Result<Url, PersistError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PersistError::InvalidBase(self.base.to_string()))?
            .pop_if_empty()
            .extend(["api", "overlays", id]);
        Ok(url)
    }
}

#[async_trait]
impl OverlayPersistence for HttpOverlayStore {
    async fn persist(&self, id: &str, patch: &OverlayPatch) -> Result<Overlay, PersistError> {
        let url = self.endpoint(id)?;
        debug!("PATCH {}", url);

        let resp = self
            .inner
            .patch(url)
            .json(patch)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Err(PersistError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let message = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string(),
            };
            return Err(PersistError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json::<Overlay>().await?)
    }
}

/// Process-local store used by tests and demos.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOverlayStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    overlays: HashMap<String, Overlay>,
    writes: Vec<(String, OverlayPatch)>,
}

impl InMemoryOverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned store is still consistent: every write is a single insert
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, overlay: Overlay) {
        self.lock().overlays.insert(overlay.id.clone(), overlay);
    }

    pub fn get(&self, id: &str) -> Option<Overlay> {
        self.lock().overlays.get(id).cloned()
    }

    /// Every accepted patch, in order
    pub fn writes(&self) -> Vec<(String, OverlayPatch)> {
        self.lock().writes.clone()
    }
}

#[async_trait]
impl OverlayPersistence for InMemoryOverlayStore {
    async fn persist(&self, id: &str, patch: &OverlayPatch) -> Result<Overlay, PersistError> {
        patch.validate()?;

        let mut inner = self.lock();
        let overlay = inner
            .overlays
            .get_mut(id)
            .ok_or_else(|| PersistError::NotFound(id.to_string()))?;
        overlay.apply(patch);
        overlay.updated_at = Some(Utc::now());
        let updated = overlay.clone();

        inner.writes.push((id.to_string(), patch.clone()));
        Ok(updated)
    }
}
