//! Playback Recovery Controller state machine
//!
//! Owns at most one playback session, classifies pipeline faults and applies
//! the matching recovery. Only fatal faults ever reach the user, and only an
//! explicit [`RecoveryController::retry`] brings playback back afterwards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use config_manager::PlaybackConfig;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::PlaybackError;
use crate::fault::{Fault, FaultBudget, FaultClass};
use crate::manifest::MediaPlaylist;
use crate::pipeline::{MediaPipeline, PipelineFactory};
use crate::source::ManifestSource;

/// What the view layer renders from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackFlags {
    pub is_loading: bool,
    pub is_playing: bool,
    pub has_error: bool,
}

/// What the controller did about a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Load loop restarted, pipeline kept
    RestartLoad,
    /// Decode path re-initialized, pipeline kept
    RecoverMedia,
    /// Session torn down; waiting for the user
    TearDown,
    /// No session to apply it to
    Ignored,
}

/// Escalation bounds
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Non-fatal network faults tolerated inside `window`
    pub network_limit: u32,
    /// Non-fatal decode faults tolerated inside `window`
    pub media_limit: u32,
    pub window: Duration,
    /// Cap on the manifest fetch backoff
    pub max_backoff: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from(&PlaybackConfig::default())
    }
}

impl From<&PlaybackConfig> for RecoveryPolicy {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            network_limit: config.max_network_retries,
            media_limit: config.max_media_recoveries,
            window: Duration::from_secs(config.fault_window_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

impl RecoveryPolicy {
    /// 1s, 2s, 4s ... capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_backoff)
    }
}

/// One attached pipeline and its fault history
struct PlaybackSession {
    pipeline: Box<dyn MediaPipeline>,
    manifest_url: Url,
    network: FaultBudget,
    media: FaultBudget,
}

pub struct RecoveryController {
    source: Arc<dyn ManifestSource>,
    factory: Arc<dyn PipelineFactory>,
    policy: RecoveryPolicy,
    session: Option<PlaybackSession>,
    /// Manifest of the most recent attach, kept for `retry`
    last_url: Option<Url>,
    last_error: Option<String>,
    flags: watch::Sender<PlaybackFlags>,
}

impl RecoveryController {
    pub fn new(
        source: Arc<dyn ManifestSource>,
        factory: Arc<dyn PipelineFactory>,
        policy: RecoveryPolicy,
    ) -> Self {
        let (flags, _) = watch::channel(PlaybackFlags::default());
        Self {
            source,
            factory,
            policy,
            session: None,
            last_url: None,
            last_error: None,
            flags,
        }
    }

    pub fn flags(&self) -> PlaybackFlags {
        *self.flags.borrow()
    }

    /// Follow flag changes
    pub fn subscribe(&self) -> watch::Receiver<PlaybackFlags> {
        self.flags.subscribe()
    }

    /// Reason for the last fatal fault
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    /// Manifest URL of the active session
    pub fn manifest_url(&self) -> Option<&Url> {
        self.session.as_ref().map(|s| &s.manifest_url)
    }

    /// Start a playback session for `manifest_url`, tearing down any current
    /// one first.
    ///
    /// Suspends while the manifest is fetched; fetch failures and empty
    /// playlists are retried with backoff against the network budget. Never
    /// fails: the outcome is reported through the returned flags.
    pub async fn attach(&mut self, manifest_url: &str) -> PlaybackFlags {
        self.detach();

        let url = match Url::parse(manifest_url) {
            Ok(url) => url,
            Err(e) => {
                self.fail(PlaybackError::from(e));
                return self.flags();
            }
        };
        self.last_url = Some(url.clone());
        self.last_error = None;
        self.publish(PlaybackFlags {
            is_loading: true,
            ..PlaybackFlags::default()
        });

        let mut network = FaultBudget::new(self.policy.network_limit, self.policy.window);
        let source = Arc::clone(&self.source);
        let policy = self.policy.clone();
        let playlist = match load_manifest(source.as_ref(), &policy, &url, &mut network).await {
            Ok(playlist) => playlist,
            Err(e) => {
                self.fail(e);
                return self.flags();
            }
        };

        let mut pipeline = self.factory.create();
        pipeline.load_source(&url, &playlist);
        pipeline.start_load();
        let is_playing = match pipeline.play() {
            Ok(()) => true,
            // Not a fault: the user can still press play
            Err(rejected) => {
                info!("Automatic playback refused: {}", rejected);
                false
            }
        };

        info!(
            "Attached to {} ({} segments, first {:?})",
            url,
            playlist.segments.len(),
            playlist.first_playable().map(|s| s.uri.as_str())
        );
        self.session = Some(PlaybackSession {
            pipeline,
            manifest_url: url,
            network,
            media: FaultBudget::new(self.policy.media_limit, self.policy.window),
        });
        self.publish(PlaybackFlags {
            is_loading: false,
            is_playing,
            has_error: false,
        });
        self.flags()
    }

    /// Apply the recovery strategy for `fault`.
    ///
    /// Called from pipeline callbacks; never blocks.
    pub fn handle_fault(&mut self, fault: Fault) -> RecoveryAction {
        let Some(session) = self.session.as_mut() else {
            debug!("Ignoring {} with no active session", fault);
            return RecoveryAction::Ignored;
        };
        let now = Instant::now();

        let escalated = match fault.class() {
            FaultClass::Network => {
                if session.network.record(now) {
                    debug!("Recovering from {}: restarting load", fault);
                    session.pipeline.start_load();
                    return RecoveryAction::RestartLoad;
                }
                PlaybackError::Escalated("network")
            }
            FaultClass::Media => {
                if session.media.record(now) {
                    debug!("Recovering from {}: re-initializing decoder", fault);
                    session.pipeline.recover_media_error();
                    return RecoveryAction::RecoverMedia;
                }
                PlaybackError::Escalated("media")
            }
            FaultClass::Fatal => PlaybackError::Fatal(fault.to_string()),
        };

        self.fail(escalated);
        RecoveryAction::TearDown
    }

    /// A segment was loaded; the pipeline is healthy again
    pub fn note_progress(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.network.clear();
        session.media.clear();
        self.publish_with(|f| f.is_loading = false);
    }

    /// The pipeline started or paused playback on its own (e.g. after the
    /// user pressed play following an autoplay refusal)
    pub fn note_playing(&mut self, playing: bool) {
        if self.session.is_some() {
            self.publish_with(|f| f.is_playing = playing);
        }
    }

    /// Re-attach to the last manifest. The only way out of a fatal fault.
    pub async fn retry(&mut self) -> PlaybackFlags {
        let Some(url) = self.last_url.clone() else {
            return self.flags();
        };
        info!("Retrying playback of {}", url);
        self.attach(url.as_str()).await
    }

    /// Tear the session down now. Synchronous and unconditional.
    pub fn detach(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Detaching from {}", session.manifest_url);
            session.pipeline.destroy();
        }
        self.publish(PlaybackFlags::default());
    }

    fn fail(&mut self, reason: impl fmt::Display) {
        if let Some(mut session) = self.session.take() {
            session.pipeline.destroy();
        }
        warn!("Playback failed: {}", reason);
        self.last_error = Some(reason.to_string());
        self.publish(PlaybackFlags {
            is_loading: false,
            is_playing: false,
            has_error: true,
        });
    }

    fn publish(&self, flags: PlaybackFlags) {
        self.publish_with(|f| *f = flags);
    }

    fn publish_with(&self, update: impl FnOnce(&mut PlaybackFlags)) {
        self.flags.send_if_modified(|current| {
            let before = *current;
            update(current);
            *current != before
        });
    }
}

/// Fetch and parse the manifest, retrying transient failures with backoff
/// until `budget` is exhausted.
async fn load_manifest(
    source: &dyn ManifestSource,
    policy: &RecoveryPolicy,
    url: &Url,
    budget: &mut FaultBudget,
) -> Result<MediaPlaylist, PlaybackError> {
    let mut attempt = 0;
    loop {
        let failure = match source.fetch(url).await {
            Ok(body) => match MediaPlaylist::parse(&body) {
                Ok(playlist) => return Ok(playlist),
                Err(e) if e.is_transient() => PlaybackError::from(e),
                Err(e) => return Err(e.into()),
            },
            Err(e) => PlaybackError::from(e),
        };

        if !budget.record(Instant::now()) {
            return Err(failure);
        }
        let delay = policy.backoff(attempt);
        debug!("Manifest not available ({}), retrying in {:?}", failure, delay);
        sleep(delay).await;
        attempt += 1;
    }
}

impl Drop for RecoveryController {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fault::{MediaFault, NetworkFault};
    use crate::pipeline::PlayRejected;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const MANIFEST_URL: &str = "http://localhost:5000/static/hls/stream.m3u8";

    const PLAYLIST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
#EXT-X-MEDIA-SEQUENCE:1
#EXTINF:4.000000,
segment_001.ts
#EXTINF:4.000000,
segment_002.ts
";

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        LoadSource(String),
        StartLoad,
        RecoverMedia,
        Play,
        Destroy,
    }

    type CallLog = Arc<Mutex<Vec<(usize, Call)>>>;

    struct FakePipeline {
        id: usize,
        log: CallLog,
        reject_play: bool,
    }

    impl FakePipeline {
        fn record(&self, call: Call) {
            self.log.lock().unwrap().push((self.id, call));
        }
    }

    impl MediaPipeline for FakePipeline {
        fn load_source(&mut self, manifest_url: &Url, playlist: &MediaPlaylist) {
            assert!(!playlist.segments.is_empty());
            self.record(Call::LoadSource(manifest_url.to_string()));
        }

        fn start_load(&mut self) {
            self.record(Call::StartLoad);
        }

        fn recover_media_error(&mut self) {
            self.record(Call::RecoverMedia);
        }

        fn play(&mut self) -> Result<(), PlayRejected> {
            self.record(Call::Play);
            if self.reject_play {
                Err(PlayRejected("autoplay blocked".into()))
            } else {
                Ok(())
            }
        }

        fn destroy(&mut self) {
            self.record(Call::Destroy);
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        log: CallLog,
        created: AtomicUsize,
        reject_play: AtomicBool,
    }

    impl FakeFactory {
        fn calls(&self) -> Vec<(usize, Call)> {
            self.log.lock().unwrap().clone()
        }

        fn count(&self, call: &Call) -> usize {
            self.calls().iter().filter(|(_, c)| c == call).count()
        }
    }

    impl PipelineFactory for FakeFactory {
        fn create(&self) -> Box<dyn MediaPipeline> {
            let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Box::new(FakePipeline {
                id,
                log: self.log.clone(),
                reject_play: self.reject_play.load(Ordering::SeqCst),
            })
        }
    }

    /// Serves scripted responses, then the last one forever
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<String, u16>>>,
        fetches: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<&str, u16>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ManifestSource for ScriptedSource {
        async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            };
            match next.unwrap_or(Err(404)) {
                Ok(body) => Ok(body),
                Err(status) => Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                }),
            }
        }
    }

    fn controller(source: Arc<ScriptedSource>, factory: Arc<FakeFactory>) -> RecoveryController {
        RecoveryController::new(source, factory, RecoveryPolicy::default())
    }

    fn healthy() -> (Arc<ScriptedSource>, Arc<FakeFactory>) {
        (
            Arc::new(ScriptedSource::new(vec![Ok(PLAYLIST)])),
            Arc::new(FakeFactory::default()),
        )
    }

    #[tokio::test]
    async fn test_attach_starts_playback() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());

        let flags = controller.attach(MANIFEST_URL).await;

        assert_eq!(
            flags,
            PlaybackFlags {
                is_loading: false,
                is_playing: true,
                has_error: false
            }
        );
        assert_eq!(
            factory.calls(),
            vec![
                (1, Call::LoadSource(MANIFEST_URL.to_string())),
                (1, Call::StartLoad),
                (1, Call::Play),
            ]
        );
        assert_eq!(controller.manifest_url().unwrap().as_str(), MANIFEST_URL);
    }

    #[tokio::test]
    async fn test_autoplay_refusal_is_not_a_fault() {
        let (source, factory) = healthy();
        factory.reject_play.store(true, Ordering::SeqCst);
        let mut controller = controller(source, factory);

        let flags = controller.attach(MANIFEST_URL).await;
        assert!(!flags.is_playing);
        assert!(!flags.has_error);
        assert!(controller.is_attached());

        controller.note_playing(true);
        assert!(controller.flags().is_playing);
    }

    #[tokio::test]
    async fn test_network_fault_restarts_load_silently() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());
        controller.attach(MANIFEST_URL).await;

        let mut flags = controller.subscribe();
        flags.borrow_and_update();

        let action = controller.handle_fault(Fault::network(NetworkFault::SegmentLoad));

        assert_eq!(action, RecoveryAction::RestartLoad);
        assert!(!flags.has_changed().unwrap());
        assert_eq!(factory.count(&Call::StartLoad), 2);
        assert_eq!(factory.count(&Call::Destroy), 0);
    }

    #[tokio::test]
    async fn test_media_fault_recovers_decoder() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());
        controller.attach(MANIFEST_URL).await;

        let action = controller.handle_fault(Fault::media(MediaFault::Decode));

        assert_eq!(action, RecoveryAction::RecoverMedia);
        assert_eq!(factory.count(&Call::RecoverMedia), 1);
        assert!(!controller.flags().has_error);
    }

    #[tokio::test]
    async fn test_fatal_fault_tears_down_exactly_once() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());
        controller.attach(MANIFEST_URL).await;

        let action = controller.handle_fault(Fault::Other {
            detail: "demuxer crashed".into(),
        });

        assert_eq!(action, RecoveryAction::TearDown);
        let flags = controller.flags();
        assert!(flags.has_error);
        assert!(!flags.is_playing);
        assert!(!controller.is_attached());
        assert!(controller.last_error().unwrap().contains("demuxer crashed"));

        // Later callbacks and an unmount do not tear down again
        assert_eq!(
            controller.handle_fault(Fault::network(NetworkFault::SegmentLoad)),
            RecoveryAction::Ignored
        );
        drop(controller);
        assert_eq!(factory.count(&Call::Destroy), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_network_faults_escalate() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());
        controller.attach(MANIFEST_URL).await;

        for _ in 0..3 {
            assert_eq!(
                controller.handle_fault(Fault::network(NetworkFault::SegmentTimeout)),
                RecoveryAction::RestartLoad
            );
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert_eq!(
            controller.handle_fault(Fault::network(NetworkFault::SegmentTimeout)),
            RecoveryAction::TearDown
        );
        assert!(controller.flags().has_error);
        assert_eq!(controller.last_error(), Some("too many network faults"));
        assert_eq!(factory.count(&Call::Destroy), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_media_faults_escalate() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory);
        controller.attach(MANIFEST_URL).await;

        assert_eq!(
            controller.handle_fault(Fault::media(MediaFault::BufferAppend)),
            RecoveryAction::RecoverMedia
        );
        assert_eq!(
            controller.handle_fault(Fault::media(MediaFault::Decode)),
            RecoveryAction::RecoverMedia
        );
        assert_eq!(
            controller.handle_fault(Fault::media(MediaFault::Decode)),
            RecoveryAction::TearDown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_faults_outside_window_do_not_escalate() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory);
        controller.attach(MANIFEST_URL).await;

        for _ in 0..10 {
            assert_eq!(
                controller.handle_fault(Fault::network(NetworkFault::SegmentLoad)),
                RecoveryAction::RestartLoad
            );
            tokio::time::advance(Duration::from_secs(11)).await;
        }
        assert!(!controller.flags().has_error);
    }

    #[tokio::test]
    async fn test_progress_clears_fault_history() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory);
        controller.attach(MANIFEST_URL).await;

        for _ in 0..3 {
            controller.handle_fault(Fault::network(NetworkFault::SegmentLoad));
        }
        controller.note_progress();
        for _ in 0..3 {
            assert_eq!(
                controller.handle_fault(Fault::network(NetworkFault::SegmentLoad)),
                RecoveryAction::RestartLoad
            );
        }
        assert!(!controller.flags().has_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manifest_fetch_retries_with_backoff() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(503),
            Ok("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n"),
            Ok(PLAYLIST),
        ]));
        let factory = Arc::new(FakeFactory::default());
        let mut controller = controller(source.clone(), factory);

        let started = Instant::now();
        let flags = controller.attach(MANIFEST_URL).await;

        assert!(flags.is_playing);
        assert_eq!(source.fetches(), 3);
        // 1s then 2s of backoff
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_manifest_becomes_fatal() {
        let source = Arc::new(ScriptedSource::new(vec![Err(404)]));
        let factory = Arc::new(FakeFactory::default());
        let mut controller = controller(source.clone(), factory.clone());

        let flags = controller.attach(MANIFEST_URL).await;

        assert!(flags.has_error);
        assert!(!flags.is_loading);
        assert_eq!(source.fetches(), 4);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert!(controller.last_error().unwrap().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_fatal_without_retry() {
        let source = Arc::new(ScriptedSource::new(vec![Ok("<html>oops</html>")]));
        let factory = Arc::new(FakeFactory::default());
        let mut controller = controller(source.clone(), factory);

        let flags = controller.attach(MANIFEST_URL).await;

        assert!(flags.has_error);
        assert_eq!(source.fetches(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_is_fatal() {
        let (source, factory) = healthy();
        let mut controller = controller(source.clone(), factory);

        let flags = controller.attach("not a url").await;
        assert!(flags.has_error);
        assert_eq!(source.fetches(), 0);
    }

    #[tokio::test]
    async fn test_reattach_tears_down_previous_session_first() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());

        controller.attach(MANIFEST_URL).await;
        controller.attach(MANIFEST_URL).await;

        let calls = factory.calls();
        let destroyed = calls.iter().position(|c| *c == (1, Call::Destroy)).unwrap();
        let second = calls
            .iter()
            .position(|(id, c)| *id == 2 && matches!(c, Call::LoadSource(_)))
            .unwrap();
        assert!(destroyed < second);
        assert_eq!(factory.count(&Call::Destroy), 1);
    }

    #[tokio::test]
    async fn test_retry_after_fatal_reattaches() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());

        // Nothing to retry yet
        assert_eq!(controller.retry().await, PlaybackFlags::default());

        controller.attach(MANIFEST_URL).await;
        controller.handle_fault(Fault::Media {
            kind: MediaFault::Decode,
            fatal: true,
        });
        assert!(controller.flags().has_error);

        let flags = controller.retry().await;
        assert!(flags.is_playing);
        assert!(!flags.has_error);
        assert!(controller.last_error().is_none());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_detach_is_unconditional() {
        let (source, factory) = healthy();
        let mut controller = controller(source, factory.clone());
        controller.attach(MANIFEST_URL).await;

        controller.detach();
        controller.detach();

        assert_eq!(controller.flags(), PlaybackFlags::default());
        assert_eq!(factory.count(&Call::Destroy), 1);
        assert_eq!(
            controller.handle_fault(Fault::media(MediaFault::Decode)),
            RecoveryAction::Ignored
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RecoveryPolicy::default();
        let delays: Vec<u64> = (0..6).map(|a| policy.backoff(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
        assert_eq!(policy.backoff(200), Duration::from_secs(8));
    }
}
