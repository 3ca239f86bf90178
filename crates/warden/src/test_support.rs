//! Shared fakes for exercising the daemon without real child processes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::daemon::SupervisorDaemon;
use warden_core::{
    DaemonConfig, ProcessError, ProcessHandle, ProcessId, ProcessSpawner, SpawnSpec,
    TerminationResult,
};

/// Observable lifecycle events, in the order the daemon caused them.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Terminated { kind: &'static str, pid: ProcessId },
    Signalled { pid: ProcessId },
}

pub struct RecordingHandle {
    pid: ProcessId,
    kind: &'static str,
    alive: bool,
    events: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl ProcessHandle for RecordingHandle {
    fn pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    fn command(&self) -> &str {
        self.kind
    }

    async fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn terminate(&mut self, _grace: Duration) -> TerminationResult {
        self.alive = false;
        self.events.lock().unwrap().push(Event::Terminated {
            kind: self.kind,
            pid: self.pid,
        });
        TerminationResult::Success
    }

    async fn kill(&mut self) -> anyhow::Result<()> {
        self.alive = false;
        Ok(())
    }
}

/// Spawner that hands out fake handles and records every spec and signal.
pub struct RecordingSpawner {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub specs: Arc<Mutex<Vec<SpawnSpec>>>,
    next_pid: AtomicU32,
    worker_command: String,
}

impl RecordingSpawner {
    pub fn new(worker_command: impl Into<String>) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            specs: Arc::new(Mutex::new(Vec::new())),
            next_pid: AtomicU32::new(100),
            worker_command: worker_command.into(),
        }
    }
}

#[async_trait]
impl ProcessSpawner for RecordingSpawner {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let kind = if spec.command == self.worker_command {
            "worker"
        } else {
            "relay"
        };
        self.specs.lock().unwrap().push(spec.clone());
        Ok(Box::new(RecordingHandle {
            pid,
            kind,
            alive: true,
            events: self.events.clone(),
        }))
    }

    fn signal_untracked(&self, pid: ProcessId) -> bool {
        self.events.lock().unwrap().push(Event::Signalled { pid });
        false
    }
}

/// Daemon over a recording spawner, rooted in a scratch projects dir.
pub fn recording_daemon() -> (Arc<SupervisorDaemon>, Arc<RecordingSpawner>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let spawner = Arc::new(RecordingSpawner::new("fake-worker"));
    let config = DaemonConfig::builder()
        .worker_command("fake-worker")
        .relay_command("fake-relay")
        .projects_dir(dir.path())
        .port(0u16)
        .build()
        .unwrap();
    let daemon = Arc::new(SupervisorDaemon::with_spawner(config, spawner.clone()).unwrap());
    (daemon, spawner, dir)
}

/// Liveness probe by pid; false once the process is gone or reaped.
pub fn pid_alive(pid: ProcessId) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}
