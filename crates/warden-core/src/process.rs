use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Unique identifier for a managed process
pub type ProcessId = u32;

/// Status of a managed process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited with the given status
    Exited(std::process::ExitStatus),
    /// Process was terminated by a signal
    Terminated,
    /// Process status is unknown
    Unknown,
}

/// Result of a termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges to signal the process
    AccessDenied,
    /// Process did not exit within the escalation window
    Timeout,
    /// Operation failed with a specific error message
    Failed(String),
}

impl TerminationResult {
    /// A clean outcome: the process is gone, whether we stopped it or it was
    /// already dead.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            TerminationResult::Success | TerminationResult::ProcessNotFound
        )
    }
}

/// Error types for process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Other error: {0}")]
    Other(String),
}

/// Where a spawned process's output streams go
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StdioPolicy {
    /// Inherit the parent's stdio
    #[default]
    Inherit,
    /// Discard all output
    Null,
    /// Append stdout and stderr to the given file; stdin is closed
    LogFile(PathBuf),
}

/// Specification for spawning a managed process
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub stdio: StdioPolicy,
    /// Place the child in its own process group so it survives the spawner
    /// and can be signalled as a unit together with its descendants.
    pub detach: bool,
}

impl SpawnSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<S: Into<String>, I: IntoIterator<Item = S>>(mut self, iter: I) -> Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn stdio(mut self, stdio: StdioPolicy) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn detach(mut self) -> Self {
        self.detach = true;
        self
    }
}

/// Capability handle for one spawned OS process.
///
/// Signal semantics live entirely behind this trait: callers ask for
/// liveness or termination and never see signal numbers or process groups.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Spawn-time process id
    fn pid(&self) -> Option<ProcessId>;

    /// The command that started this process
    fn command(&self) -> &str;

    /// Non-blocking liveness poll
    async fn is_alive(&mut self) -> bool;

    /// Ask the process to exit, wait up to `grace`, then escalate to a
    /// forceful kill. The graceful-then-forceful sequence is internal to the
    /// implementation.
    async fn terminate(&mut self, grace: Duration) -> TerminationResult;

    /// Kill immediately with no grace period and reap the child.
    async fn kill(&mut self) -> Result<()>;
}

/// Factory for process handles.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn a new process from the given specification.
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ProcessHandle>, ProcessError>;

    /// Best-effort graceful signal to a pid this spawner does not own a
    /// handle for. Covers processes started out-of-band or whose registry
    /// entry is already gone.
    fn signal_untracked(&self, pid: ProcessId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_spec_builder() {
        let spec = SpawnSpec::new("warden-server")
            .args(["--port", "8000"])
            .arg("--projects-dir")
            .arg("/tmp/projects")
            .env("NO_COLOR", "1")
            .working_dir("/tmp")
            .stdio(StdioPolicy::Null)
            .detach();

        assert_eq!(spec.command, "warden-server");
        assert_eq!(
            spec.args,
            vec!["--port", "8000", "--projects-dir", "/tmp/projects"]
        );
        assert_eq!(spec.env.get("NO_COLOR").map(String::as_str), Some("1"));
        assert_eq!(spec.working_dir.as_deref(), Some(std::path::Path::new("/tmp")));
        assert_eq!(spec.stdio, StdioPolicy::Null);
        assert!(spec.detach);
    }

    #[test]
    fn test_termination_result_is_clean() {
        assert!(TerminationResult::Success.is_clean());
        assert!(TerminationResult::ProcessNotFound.is_clean());
        assert!(!TerminationResult::AccessDenied.is_clean());
        assert!(!TerminationResult::Timeout.is_clean());
        assert!(!TerminationResult::Failed("boom".to_string()).is_clean());
    }
}
