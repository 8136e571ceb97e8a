use std::sync::Arc;
use std::time::Duration;

use config_manager::{BridgeConfig, EncodingConfig, Readiness, StreamConfig};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::command::build_hls_command;
use crate::error::{LifecycleError, SpawnError};
use crate::output::OutputDir;
use crate::process::{ExitInfo, ProcessHandle, Spawner};
use crate::state::{StreamState, StreamStateStore, StreamStatus};
use crate::validate::{redact_credentials, validate_source_url};

type StopReply = oneshot::Sender<Result<(), LifecycleError>>;

/// Answer to a successful start request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub status: StreamStatus,
    pub source_url: String,
    pub delivery_path: String,
}

/// Owns the single transcoder subprocess.
///
/// Every start and stop is serialized through one async mutex, and a new
/// transcoder is only spawned after the previous one has been reaped. At any
/// instant there is therefore at most one transcoder writing to the output
/// directory.
pub struct LifecycleManager {
    spawner: Arc<dyn Spawner>,
    store: StreamStateStore,
    output: OutputDir,
    stream: StreamConfig,
    encoding: EncodingConfig,
    delivery_path: String,
    active: Mutex<Option<ActiveStream>>,
}

/// Handle on the supervisor task of the running transcoder
struct ActiveStream {
    generation: u64,
    pid: Option<u32>,
    control: mpsc::Sender<StopReply>,
    task: JoinHandle<()>,
}

impl LifecycleManager {
    pub fn new(config: &BridgeConfig, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            spawner,
            store: StreamStateStore::new(),
            output: OutputDir::new(config.hls_dir(), config.stream.manifest_name.clone()),
            stream: config.stream.clone(),
            encoding: config.encoding.clone(),
            delivery_path: config.delivery_path(),
            active: Mutex::new(None),
        }
    }

    /// Validate `source_url`, stop whatever is running, and spawn a fresh
    /// transcoder for the new source.
    ///
    /// Returns once the subprocess is spawned. With manifest readiness the
    /// state stays `connecting` until the first playlist appears; watch the
    /// store to learn when it goes live.
    pub async fn start(&self, source_url: &str) -> Result<StartReport, LifecycleError> {
        let url = validate_source_url(source_url.trim(), self.stream.max_url_length)?;

        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            info!("Stopping current stream before switching source");
            if let Err((previous, e)) = stop_active(previous).await {
                self.store.mark_error(previous.generation, e.to_string());
                *active = Some(previous);
                return Err(e);
            }
        }

        let generation = self.store.begin(url);

        match self.output.prepare().await {
            Ok(0) => {}
            Ok(removed) => debug!("Removed {} stale stream files", removed),
            Err(source) => {
                let e = SpawnError::OutputDir {
                    path: self.output.dir().display().to_string(),
                    source,
                };
                error!("{}", e);
                self.store.mark_error(generation, e.to_string());
                return Err(e.into());
            }
        }

        let command = build_hls_command(
            &self.stream.ffmpeg_path,
            url,
            &self.output.manifest_path(),
            &self.encoding,
        );
        info!("Starting transcoder: {}", command);

        let process = match self.spawner.spawn(&command).await {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to start transcoder: {}", e);
                self.store.mark_error(generation, e.to_string());
                return Err(e.into());
            }
        };
        let pid = process.id();
        info!(
            "Transcoder started (pid {:?}) for {}",
            pid,
            redact_credentials(url)
        );

        if self.stream.readiness == Readiness::Immediate {
            self.store.mark_live(generation);
        }

        let (control, requests) = mpsc::channel(1);
        let supervisor = Supervisor {
            process,
            requests,
            watchdog: Watchdog {
                generation,
                store: self.store.clone(),
                output: self.output.clone(),
                timing: Timing::from(&self.stream),
                started: Instant::now(),
                manifest_seen: false,
            },
        };
        let task = tokio::spawn(supervisor.run());

        *active = Some(ActiveStream {
            generation,
            pid,
            control,
            task,
        });

        Ok(StartReport {
            status: self.store.snapshot().status,
            source_url: url.to_string(),
            delivery_path: self.delivery_path.clone(),
        })
    }

    /// Terminate the running transcoder and return to `idle`.
    ///
    /// Fails with [`LifecycleError::NoActiveStream`], leaving the state
    /// untouched, when no transcoder is running.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut active = self.active.lock().await;

        let Some(current) = active.take() else {
            return Err(LifecycleError::NoActiveStream);
        };
        if current.task.is_finished() {
            // Exited on its own; the supervisor already recorded why
            return Err(LifecycleError::NoActiveStream);
        }

        let pid = current.pid;
        match stop_active(current).await {
            Ok(()) => {
                self.store.mark_idle();
                info!("Stream stopped (pid {:?})", pid);
                Ok(())
            }
            Err((current, e)) => {
                self.store.mark_error(current.generation, e.to_string());
                *active = Some(current);
                Err(e)
            }
        }
    }

    /// Stop any running transcoder and remove its output. Used on server exit.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(()) | Err(LifecycleError::NoActiveStream) => {}
            Err(e) => error!("Failed to stop transcoder during shutdown: {}", e),
        }

        if self.stream.cleanup_on_shutdown {
            if let Err(e) = self.output.cleanup().await {
                warn!("Failed to clean up {}: {}", self.output.dir().display(), e);
            }
        }
    }

    /// Current lifecycle state
    pub fn status(&self) -> StreamState {
        self.store.snapshot()
    }

    pub fn store(&self) -> &StreamStateStore {
        &self.store
    }

    pub fn delivery_path(&self) -> &str {
        &self.delivery_path
    }

    pub fn output(&self) -> &OutputDir {
        &self.output
    }

    /// Whether a transcoder subprocess is currently alive
    pub async fn is_running(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }
}

/// Ask the supervisor to terminate its process and wait for it to finish.
/// On failure the stream is handed back so the caller can keep tracking it.
async fn stop_active(mut stream: ActiveStream) -> Result<(), (ActiveStream, LifecycleError)> {
    let (reply, response) = oneshot::channel();
    if stream.control.send(reply).await.is_ok() {
        if let Ok(Err(e)) = response.await {
            return Err((stream, e));
        }
    }
    // Either stopped, or the process exited before the request was seen
    if let Err(e) = (&mut stream.task).await {
        warn!("Transcoder supervisor ended abnormally: {}", e);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    poll: Duration,
    playlist_timeout: Duration,
    stall_timeout: Option<Duration>,
    grace: Duration,
    kill_wait: Duration,
}

impl From<&StreamConfig> for Timing {
    fn from(config: &StreamConfig) -> Self {
        Self {
            poll: Duration::from_millis(config.poll_interval_ms.max(1)),
            playlist_timeout: Duration::from_secs(config.playlist_timeout_secs),
            stall_timeout: (config.stall_timeout_secs > 0)
                .then(|| Duration::from_secs(config.stall_timeout_secs)),
            grace: Duration::from_secs(config.graceful_shutdown_secs),
            kill_wait: Duration::from_secs(config.kill_timeout_secs),
        }
    }
}

/// Watches one transcoder from spawn to exit.
struct Supervisor {
    process: Box<dyn ProcessHandle>,
    requests: mpsc::Receiver<StopReply>,
    watchdog: Watchdog,
}

enum Event {
    Exited(std::io::Result<ExitInfo>),
    Stop(Option<StopReply>),
    Tick,
}

impl Supervisor {
    async fn run(mut self) {
        let timing = self.watchdog.timing;
        let mut ticker = interval(timing.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Set once a watchdog termination failed; only stop requests and
        // the exit itself matter after that
        let mut condemned = false;

        loop {
            let event = tokio::select! {
                exit = self.process.wait() => Event::Exited(exit),
                request = self.requests.recv() => Event::Stop(request),
                _ = ticker.tick(), if !condemned => Event::Tick,
            };

            match event {
                Event::Exited(exit) => {
                    self.on_unexpected_exit(exit);
                    return;
                }
                Event::Stop(Some(reply)) => match terminate(self.process.as_mut(), &timing).await {
                    Ok(_) => {
                        let _ = reply.send(Ok(()));
                        return;
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        condemned = true;
                    }
                },
                Event::Stop(None) => {
                    // Manager dropped
                    let _ = terminate(self.process.as_mut(), &timing).await;
                    return;
                }
                Event::Tick => {
                    let Some(fault) = self.watchdog.check().await else {
                        continue;
                    };
                    warn!("{}", fault);
                    self.watchdog.store.mark_error(self.watchdog.generation, fault);
                    match terminate(self.process.as_mut(), &timing).await {
                        Ok(_) => return,
                        Err(_) => condemned = true,
                    }
                }
            }
        }
    }

    fn on_unexpected_exit(&self, exit: std::io::Result<ExitInfo>) {
        let detail = match exit {
            Ok(info) => info.to_string(),
            Err(e) => format!("wait failed: {}", e),
        };
        let mut message = format!("Transcoder exited unexpectedly ({})", detail);
        if let Some(last) = self.process.last_error() {
            message.push_str(": ");
            message.push_str(&last);
        }
        warn!("{}", message);
        self.watchdog.store.mark_error(self.watchdog.generation, message);
    }
}

/// Readiness and stall detection for one generation
struct Watchdog {
    generation: u64,
    store: StreamStateStore,
    output: OutputDir,
    timing: Timing,
    started: Instant,
    manifest_seen: bool,
}

impl Watchdog {
    /// Returns a fault message when the transcoder should be taken down.
    async fn check(&mut self) -> Option<String> {
        if !self.manifest_seen {
            if self.output.manifest_ready().await {
                self.manifest_seen = true;
                if self.store.mark_live(self.generation) {
                    info!("Stream is live");
                }
                return None;
            }
            if self.started.elapsed() >= self.timing.playlist_timeout {
                return Some(format!(
                    "Playlist not created after {}s",
                    self.timing.playlist_timeout.as_secs()
                ));
            }
            return None;
        }

        let stall = self.timing.stall_timeout?;
        match self.output.manifest_age().await {
            Some(age) if age > stall => Some(format!(
                "Stream stalled: playlist not updated for {}s",
                age.as_secs()
            )),
            _ => None,
        }
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL. The process is only
/// considered gone once it has been reaped.
async fn terminate(process: &mut dyn ProcessHandle, timing: &Timing) -> Result<ExitInfo, LifecycleError> {
    let pid = process.id();

    if let Err(e) = process.terminate() {
        warn!("Failed to signal transcoder (pid {:?}): {}", pid, e);
    }
    match timeout(timing.grace, process.wait()).await {
        Ok(Ok(exit)) => {
            info!("Transcoder (pid {:?}) stopped: {}", pid, exit);
            return Ok(exit);
        }
        Ok(Err(e)) => warn!("Waiting for transcoder (pid {:?}) failed: {}", pid, e),
        Err(_) => warn!(
            "Transcoder (pid {:?}) still running {}s after SIGTERM, killing",
            pid,
            timing.grace.as_secs()
        ),
    }

    if let Err(e) = process.kill() {
        warn!("Failed to kill transcoder (pid {:?}): {}", pid, e);
    }
    match timeout(timing.kill_wait, process.wait()).await {
        Ok(Ok(exit)) => {
            info!("Transcoder (pid {:?}) killed: {}", pid, exit);
            Ok(exit)
        }
        _ => {
            error!(
                "Transcoder (pid {:?}) survived SIGKILL; single-process invariant violated, refusing to start another one",
                pid
            );
            Err(LifecycleError::TerminationFailed { pid })
        }
    }
}
