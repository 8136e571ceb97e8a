use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::FetchError;

/// Where manifests come from
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// Fetches manifests over HTTP.
#[derive(Clone, Debug)]
pub struct HttpManifestSource {
    inner: Client,
    request_timeout: Duration,
}

impl HttpManifestSource {
    pub fn new(request_timeout: Duration) -> Result<Self, FetchError> {
        let inner = Client::builder().build()?;
        Ok(Self {
            inner,
            request_timeout,
        })
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let resp = self
            .inner
            .get(url.clone())
            // Live playlists change every segment
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(resp.text().await?)
    }
}
