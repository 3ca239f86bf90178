use anyhow::Result;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use warden_core::{
    ProcessError, ProcessHandle, ProcessId, ProcessSpawner, SpawnSpec, StdioPolicy,
    TerminationResult,
};

/// How long a forcefully killed process gets to disappear before the
/// escalation reports a timeout
const KILL_REAP_WAIT: Duration = Duration::from_millis(500);

/// Unix process handle backed by a tokio child.
///
/// Detached children live in their own process group (pgid == spawn pid),
/// so signals sent through this handle reach any descendants the child
/// forked, not just the child itself.
pub struct UnixProcessHandle {
    child: Child,
    pid: ProcessId,
    command: String,
    detached: bool,
}

impl UnixProcessHandle {
    /// Wrap an already spawned child. `detached` must match whether the
    /// child was placed in its own process group at spawn time.
    pub fn new(child: Child, command: String, detached: bool) -> Result<Self, ProcessError> {
        let pid = child
            .id()
            .ok_or_else(|| ProcessError::SpawnFailed(format!("{command}: exited before pid was known")))?;
        Ok(Self {
            child,
            pid,
            command,
            detached,
        })
    }

    /// Send `sig` to the process group when detached, falling back to the
    /// pid alone if group signalling fails.
    fn signal(&self, sig: Signal) -> nix::Result<()> {
        let nix_pid = NixPid::from_raw(self.pid as i32);
        if self.detached {
            match signal::killpg(nix_pid, sig) {
                Ok(()) => Ok(()),
                Err(_) => signal::kill(nix_pid, sig),
            }
        } else {
            signal::kill(nix_pid, sig)
        }
    }
}

#[async_trait]
impl ProcessHandle for UnixProcessHandle {
    fn pid(&self) -> Option<ProcessId> {
        Some(self.pid)
    }

    fn command(&self) -> &str {
        &self.command
    }

    async fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self, grace: Duration) -> TerminationResult {
        if !self.is_alive().await {
            debug!("Process {} already exited before terminate", self.pid);
            return TerminationResult::ProcessNotFound;
        }

        match self.signal(Signal::SIGTERM) {
            Ok(()) => {
                info!("Sent SIGTERM to process {}", self.pid);
            }
            Err(nix::errno::Errno::ESRCH) => {
                info!("Process {} not found (already terminated)", self.pid);
                let _ = self.child.try_wait();
                return TerminationResult::ProcessNotFound;
            }
            Err(nix::errno::Errno::EPERM) => {
                warn!("Permission denied to terminate process {}", self.pid);
                return TerminationResult::AccessDenied;
            }
            Err(e) => {
                warn!("Failed to send SIGTERM to process {}: {}", self.pid, e);
                return TerminationResult::Failed(format!("SIGTERM failed: {e}"));
            }
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_status)) => {
                info!("Process {} exited within grace period", self.pid);
                return TerminationResult::Success;
            }
            Ok(Err(e)) => {
                return TerminationResult::Failed(format!("wait failed: {e}"));
            }
            Err(_) => {
                info!(
                    "Process {} still alive after {:?}, escalating to SIGKILL",
                    self.pid, grace
                );
            }
        }

        match self.signal(Signal::SIGKILL) {
            Ok(()) => {
                info!("Sent SIGKILL to process {}", self.pid);
            }
            Err(nix::errno::Errno::ESRCH) => {
                let _ = self.child.try_wait();
                return TerminationResult::Success;
            }
            Err(e) => {
                warn!("Failed to send SIGKILL to process {}: {}", self.pid, e);
                return TerminationResult::Failed(format!("SIGKILL failed: {e}"));
            }
        }

        match tokio::time::timeout(KILL_REAP_WAIT, self.child.wait()).await {
            Ok(Ok(_status)) => TerminationResult::Success,
            Ok(Err(e)) => TerminationResult::Failed(format!("wait failed: {e}")),
            Err(_) => TerminationResult::Timeout,
        }
    }

    async fn kill(&mut self) -> Result<()> {
        // For detached children the group gets the kill too, so nothing the
        // child forked outlives it.
        if self.detached {
            let _ = self.signal(Signal::SIGKILL);
        }
        self.child
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill process {}: {e}", self.pid))
    }
}

/// Spawner producing `UnixProcessHandle`s.
#[derive(Debug, Default, Clone)]
pub struct UnixProcessSpawner;

impl UnixProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSpawner for UnixProcessSpawner {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        match &spec.stdio {
            StdioPolicy::Inherit => {}
            StdioPolicy::Null => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
            StdioPolicy::LogFile(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let log = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                let log_err = log.try_clone()?;
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::from(log))
                    .stderr(Stdio::from(log_err));
            }
        }

        if spec.detach {
            // New process group: the child survives us and can be signalled
            // together with its descendants.
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {e}", spec.command)))?;

        let handle = UnixProcessHandle::new(child, spec.command.clone(), spec.detach)?;
        info!(
            "Spawned process: {} (PID: {}) with args: {:?}",
            spec.command,
            handle.pid,
            spec.args
        );

        Ok(Box::new(handle))
    }

    fn signal_untracked(&self, pid: ProcessId) -> bool {
        let nix_pid = NixPid::from_raw(pid as i32);
        match signal::kill(nix_pid, Signal::SIGTERM) {
            Ok(()) => {
                info!("Sent SIGTERM to untracked process {pid}");
                true
            }
            Err(e) => {
                debug!("Could not signal untracked process {pid}: {e}");
                false
            }
        }
    }
}
