//! Process Handle: the narrow seam between the lifecycle manager and the OS.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::command::CommandSpec;
use crate::error::SpawnError;

/// How a subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// One live transcoding subprocess.
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id, `None` once the process has been reaped
    fn id(&self) -> Option<u32>;

    /// Ask the process to exit (SIGTERM on Unix)
    fn terminate(&mut self) -> io::Result<()>;

    /// Force the process to exit (SIGKILL on Unix)
    fn kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit and reap it. Must be cancel safe.
    async fn wait(&mut self) -> io::Result<ExitInfo>;

    /// Last error line the process reported, if any
    fn last_error(&self) -> Option<String> {
        None
    }
}

/// Creates subprocesses from a [`CommandSpec`].
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

/// Spawns real ffmpeg processes via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct FfmpegSpawner;

#[async_trait]
impl Spawner for FfmpegSpawner {
    async fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    SpawnError::NotFound(command.program.clone())
                } else {
                    SpawnError::Io(e)
                }
            })?;

        let last_error = Arc::new(Mutex::new(None));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(consume_stderr(stderr, last_error.clone()));
        }

        tracing::debug!("Spawned transcoder pid {:?}", child.id());
        Ok(Box::new(FfmpegProcess { child, last_error }))
    }
}

/// A running ffmpeg child. Dropping it kills the process.
pub struct FfmpegProcess {
    child: Child,
    last_error: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl ProcessHandle for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) -> io::Result<()> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = i32::try_from(pid)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
            kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            self.child.start_kill()
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.child.id().is_none() {
            return Ok(());
        }
        self.child.start_kill()
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        self.child.wait().await.map(ExitInfo::from)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }
}

/// Drain ffmpeg's stderr so the pipe never fills, logging each line at a
/// level matching its content and remembering the most recent error.
async fn consume_stderr(stderr: ChildStderr, last_error: Arc<Mutex<Option<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match classify_stderr_line(line) {
                    StderrLevel::Error => {
                        tracing::error!(target: "ffmpeg", "{}", line);
                        if let Ok(mut slot) = last_error.lock() {
                            *slot = Some(line.to_string());
                        }
                    }
                    StderrLevel::Warning => tracing::warn!(target: "ffmpeg", "{}", line),
                    StderrLevel::Other => tracing::debug!(target: "ffmpeg", "{}", line),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error reading ffmpeg stderr: {}", e);
                break;
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StderrLevel {
    Error,
    Warning,
    Other,
}

fn classify_stderr_line(line: &str) -> StderrLevel {
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("failed") {
        StderrLevel::Error
    } else if lower.contains("warning") {
        StderrLevel::Warning
    } else {
        StderrLevel::Other
    }
}
