use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use warden_core::{ProcessHandle, ProcessId, ShellConfig, WardenError};
use warden_unix::UnixProcessHandle;

/// Token the shell echoes after each command to mark the end of its output;
/// the stdout stream itself has no message boundaries.
const OUTPUT_SENTINEL: &str = "__WARDEN_END__";

const TRUNCATION_NOTICE: &str = "\n...[output truncated]...";

const NO_SHELL_ERROR: &str =
    "Error: No session shell active. You must create or activate a project first.";

struct ActiveShell {
    handle: UnixProcessHandle,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[derive(Default)]
struct ShellState {
    shell: Option<ActiveShell>,
    cwd: Option<PathBuf>,
}

enum ReadError {
    Timeout,
    Io(std::io::Error),
}

/// Runs caller-supplied command strings inside one persistent interactive
/// shell, returning captured output.
///
/// At most one shell exists per manager; the single lock serializes every
/// command execution, so no two commands ever interleave on the shell's
/// pipes. All failure modes of `start` and `execute` are converted to
/// descriptive strings so a remote tool layer always receives a valid
/// textual reply.
pub struct SessionShell {
    config: ShellConfig,
    state: Mutex<ShellState>,
}

impl SessionShell {
    pub fn new(config: ShellConfig) -> Result<Self, WardenError> {
        config
            .validate()
            .map_err(|e| WardenError::Configuration(format!("Invalid shell config: {e}")))?;

        Ok(Self {
            config,
            state: Mutex::new(ShellState::default()),
        })
    }

    /// Start (or replace) the session shell in `working_dir`.
    pub async fn start(&self, working_dir: &Path) -> String {
        let mut state = self.state.lock().await;

        if let Some(mut old) = state.shell.take() {
            // The previous project is being abandoned, not cleanly exited;
            // favor fast context switching over a graceful shutdown.
            if let Err(e) = old.handle.kill().await {
                warn!("Failed to kill previous session shell: {e}");
            }
        }
        state.cwd = Some(working_dir.to_path_buf());

        match self.spawn_shell(working_dir).await {
            Ok(active) => {
                info!(
                    "Started session shell in {working_dir:?} with PID={:?}",
                    active.handle.pid()
                );
                state.shell = Some(active);
                format!("Started shell for project: {}", working_dir.display())
            }
            Err(e) => {
                error!("Could not start session shell in {working_dir:?}: {e:#}");
                format!("Error: Could not start shell: {e}")
            }
        }
    }

    async fn spawn_shell(&self, working_dir: &Path) -> anyhow::Result<ActiveShell> {
        let program = self
            .config
            .shell_cmd
            .first()
            .ok_or_else(|| anyhow::anyhow!("shell_cmd is empty"))?
            .clone();

        let mut cmd = Command::new(&program);
        cmd.args(&self.config.shell_cmd[1..])
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // Own process group: stop() must reach whatever the shell forks,
            // not just the shell itself.
            .process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("session shell stdin pipe unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("session shell stdout pipe unavailable"))?;

        let handle = UnixProcessHandle::new(child, program, true)?;
        let mut active = ActiveShell {
            handle,
            stdin,
            stdout: BufReader::new(stdout),
        };

        // The shell performs the stderr merge; the pipe pair cannot share an
        // fd from here.
        active.stdin.write_all(b"exec 2>&1\n").await?;
        // Login shells may reset the working directory during profile init.
        active
            .stdin
            .write_all(format!("cd \"{}\"\n", working_dir.display()).as_bytes())
            .await?;
        active.stdin.flush().await?;

        Ok(active)
    }

    /// Run one command in the session shell and capture its output.
    pub async fn execute(&self, command: &str) -> String {
        let mut state = self.state.lock().await;
        let cwd = state.cwd.clone();

        let Some(active) = state.shell.as_mut() else {
            error!("Session shell not active when attempting to execute command");
            return NO_SHELL_ERROR.to_string();
        };
        if !active.handle.is_alive().await {
            error!("Session shell process has exited (cwd={cwd:?})");
            return NO_SHELL_ERROR.to_string();
        }

        if let Err(e) = Self::send_command(&mut active.stdin, command).await {
            return format!("Shell session error: {e}");
        }

        let output = match self.read_until_sentinel(&mut active.stdout).await {
            Ok(output) => output,
            Err(ReadError::Timeout) => return "Error: Shell command timed out.".to_string(),
            Err(ReadError::Io(e)) => return format!("Shell session error: {e}"),
        };

        let output = self.cap_output(output.trim().to_string());
        info!(
            "SessionShell[dir={cwd:?}] cmd {command:?} output {} bytes",
            output.len()
        );
        output
    }

    async fn send_command(stdin: &mut ChildStdin, command: &str) -> std::io::Result<()> {
        stdin.write_all(command.trim().as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin
            .write_all(format!("echo {OUTPUT_SENTINEL}\n").as_bytes())
            .await?;
        stdin.flush().await
    }

    async fn read_until_sentinel(
        &self,
        stdout: &mut BufReader<ChildStdout>,
    ) -> Result<String, ReadError> {
        let deadline = Instant::now() + self.config.command_timeout();
        let mut output = String::new();
        let mut line = String::new();

        loop {
            line.clear();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ReadError::Timeout);
            }
            match tokio::time::timeout(remaining, stdout.read_line(&mut line)).await {
                Err(_) => return Err(ReadError::Timeout),
                Ok(Err(e)) => return Err(ReadError::Io(e)),
                // Pipe closed before the sentinel; surface whatever arrived
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {
                    if line.trim_end() == OUTPUT_SENTINEL {
                        break;
                    }
                    output.push_str(&line);
                }
            }
        }

        Ok(output)
    }

    fn cap_output(&self, mut output: String) -> String {
        let cap = self.config.output_cap_bytes;
        if output.len() > cap {
            let mut cut = cap;
            while cut > 0 && !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str(TRUNCATION_NOTICE);
        }
        output
    }

    /// Stop the session shell, gracefully with escalation.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;

        if let Some(mut active) = state.shell.take() {
            let result = active.handle.terminate(self.config.stop_grace()).await;
            if !result.is_clean() {
                warn!("Session shell termination was not clean: {result:?}");
            }
        }
        // Cleared even when termination failed; a dead shell must never be
        // mistaken for a live one.
        state.cwd = None;
        info!("Stopped session shell");
    }

    /// Working directory of the active shell, `None` when no shell is active.
    pub async fn current_dir(&self) -> Option<PathBuf> {
        self.state.lock().await.cwd.clone()
    }

    pub async fn is_active(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.shell.as_mut() {
            Some(active) => active.handle.is_alive().await,
            None => false,
        }
    }

    pub async fn pid(&self) -> Option<ProcessId> {
        self.state
            .lock()
            .await
            .shell
            .as_ref()
            .and_then(|active| active.handle.pid())
    }
}
