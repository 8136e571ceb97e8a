use std::path::Path;
use std::sync::Arc;

use config_manager::BridgeConfig;
use stream_lifecycle::{LifecycleManager, OutputDir};

/// Shared state for the HTTP handlers.
///
/// Where the transcoder writes is owned by the lifecycle manager; the
/// segment server reads the same [`OutputDir`].
pub struct HlsState {
    pub manager: Arc<LifecycleManager>,

    /// Origin allowed to call the API from a browser, if any
    pub cors_origin: Option<String>,
}

impl HlsState {
    pub fn new(config: &BridgeConfig, manager: Arc<LifecycleManager>) -> Self {
        Self {
            manager,
            cors_origin: config.server.cors_origin.clone(),
        }
    }

    pub fn output(&self) -> &OutputDir {
        self.manager.output()
    }

    /// Directory the transcoder writes into
    pub fn hls_dir(&self) -> &Path {
        self.output().dir()
    }

    /// Stop the transcoder and clean up its output.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
