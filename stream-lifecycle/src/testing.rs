//! In-memory transcoder used by tests here and in dependent crates.
//!
//! Enabled with the `testing` feature.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::command::CommandSpec;
use crate::error::SpawnError;
use crate::process::{ExitInfo, ProcessHandle, Spawner};

const SIGTERM: i32 = 15;
const SIGKILL: i32 = 9;

/// Something that happened to a fake process, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Spawned(u32),
    Terminated(u32),
    Killed(u32),
    Reaped(u32),
}

struct Entry {
    exit: Arc<watch::Sender<Option<ExitInfo>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

#[derive(Default)]
struct Shared {
    commands: Vec<CommandSpec>,
    events: Vec<FakeEvent>,
    processes: HashMap<u32, Entry>,
    next_pid: u32,
    live: usize,
    max_live: usize,
    fail_next: bool,
    ignore_sigterm: bool,
    unkillable: bool,
    write_manifest: bool,
}

/// Spawner that hands out [`FakeProcess`]es and records what was asked of them.
#[derive(Clone, Default)]
pub struct FakeSpawner {
    shared: Arc<Mutex<Shared>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a one-line manifest at the command's output path on spawn
    pub fn writing_manifest(self) -> Self {
        self.lock().write_manifest = true;
        self
    }

    /// Fail the next spawn with `NotFound`
    pub fn fail_next_spawn(&self) {
        self.lock().fail_next = true;
    }

    /// Processes ignore SIGTERM and only die on SIGKILL
    pub fn ignore_sigterm(&self, ignore: bool) {
        self.lock().ignore_sigterm = ignore;
    }

    /// Processes ignore SIGKILL too
    pub fn unkillable(&self, unkillable: bool) {
        self.lock().unkillable = unkillable;
    }

    /// Make a process exit on its own, optionally leaving an error line behind
    pub fn crash(&self, pid: u32, exit: ExitInfo, last_error: Option<&str>) -> bool {
        let shared = self.lock();
        let Some(entry) = shared.processes.get(&pid) else {
            return false;
        };
        if let Ok(mut slot) = entry.last_error.lock() {
            *slot = last_error.map(str::to_string);
        }
        entry.exit.send_replace(Some(exit));
        true
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.lock().commands.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.lock().commands.len()
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.lock().events.clone()
    }

    /// Processes spawned and not yet reaped or dropped
    pub fn live_count(&self) -> usize {
        self.lock().live
    }

    /// Highest number of simultaneously live processes seen
    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    pub fn last_pid(&self) -> Option<u32> {
        self.lock().events.iter().rev().find_map(|e| match e {
            FakeEvent::Spawned(pid) => Some(*pid),
            _ => None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Spawner for FakeSpawner {
    async fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let write_manifest = {
            let mut shared = self.lock();
            if shared.fail_next {
                shared.fail_next = false;
                return Err(SpawnError::NotFound(command.program.clone()));
            }
            shared.write_manifest
        };

        if write_manifest {
            if let Some(manifest) = command.args.last().map(PathBuf::from) {
                tokio::fs::write(&manifest, "#EXTM3U\n").await?;
            }
        }

        let mut shared = self.lock();
        shared.next_pid += 1;
        let pid = 1000 + shared.next_pid;

        let (exit, exit_rx) = watch::channel(None);
        let exit = Arc::new(exit);
        let last_error = Arc::new(Mutex::new(None));
        shared.processes.insert(
            pid,
            Entry {
                exit: exit.clone(),
                last_error: last_error.clone(),
            },
        );
        shared.commands.push(command.clone());
        shared.events.push(FakeEvent::Spawned(pid));
        shared.live += 1;
        shared.max_live = shared.max_live.max(shared.live);

        Ok(Box::new(FakeProcess {
            pid,
            exit,
            exit_rx,
            last_error,
            reaped: false,
            shared: self.shared.clone(),
        }))
    }
}

/// A process that exits when told to, or when [`FakeSpawner::crash`] says so.
pub struct FakeProcess {
    pid: u32,
    exit: Arc<watch::Sender<Option<ExitInfo>>>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    last_error: Arc<Mutex<Option<String>>>,
    reaped: bool,
    shared: Arc<Mutex<Shared>>,
}

impl FakeProcess {
    fn reap(&mut self) {
        if self.reaped {
            return;
        }
        self.reaped = true;
        let mut shared = lock(&self.shared);
        shared.live -= 1;
        shared.events.push(FakeEvent::Reaped(self.pid));
    }
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        (!self.reaped).then_some(self.pid)
    }

    fn terminate(&mut self) -> io::Result<()> {
        let ignore = {
            let mut shared = lock(&self.shared);
            shared.events.push(FakeEvent::Terminated(self.pid));
            shared.ignore_sigterm
        };
        if !ignore {
            self.exit.send_if_modified(|exit| {
                exit.get_or_insert(ExitInfo::signal(SIGTERM));
                true
            });
        }
        Ok(())
    }

    fn kill(&mut self) -> io::Result<()> {
        let unkillable = {
            let mut shared = lock(&self.shared);
            shared.events.push(FakeEvent::Killed(self.pid));
            shared.unkillable
        };
        if !unkillable {
            self.exit.send_if_modified(|exit| {
                exit.get_or_insert(ExitInfo::signal(SIGKILL));
                true
            });
        }
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<ExitInfo> {
        let exit = *self
            .exit_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| io::Error::other("fake process channel closed"))?;
        let exit = exit.ok_or_else(|| io::Error::other("fake process has no exit status"))?;
        self.reap();
        Ok(exit)
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        let unkillable = lock(&self.shared).unkillable;
        if !unkillable {
            self.reap();
        }
    }
}
