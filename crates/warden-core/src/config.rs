use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Port the control-plane daemon listens on by default
pub const DEFAULT_DAEMON_PORT: u16 = 54000;

/// Port a relay binds by default when the caller supplies none
pub const DEFAULT_RELAY_PORT: u16 = 3006;

/// Configuration for the supervisor daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[builder(setter(into))]
pub struct DaemonConfig {
    /// Address the control-plane listener binds; the API is unauthenticated
    /// and must stay on loopback.
    #[serde(default = "default_host")]
    #[builder(default = "default_host()")]
    pub host: String,

    /// Control-plane listener port
    #[serde(default = "default_daemon_port")]
    #[builder(default = "default_daemon_port()")]
    pub port: u16,

    /// Worker server binary; must accept --port, --projects-dir, --audit-log
    #[serde(default = "default_worker_command")]
    #[builder(default = "default_worker_command()")]
    pub worker_command: String,

    /// Relay binary; must accept --port and optionally --config
    #[serde(default = "default_relay_command")]
    #[builder(default = "default_relay_command()")]
    pub relay_command: String,

    /// Base directory handed to workers that don't name their own
    #[serde(default = "default_projects_dir")]
    #[builder(default = "default_projects_dir()")]
    pub projects_dir: PathBuf,

    /// Port a relay binds when the start request names none
    #[serde(default = "default_relay_port")]
    #[builder(default = "default_relay_port()")]
    pub relay_port: u16,

    /// Window a stopping process gets to exit voluntarily before the
    /// forceful kill (in milliseconds)
    #[serde(default = "default_stop_grace_ms")]
    #[builder(default = "default_stop_grace_ms()")]
    pub stop_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_daemon_port(),
            worker_command: default_worker_command(),
            relay_command: default_relay_command(),
            projects_dir: default_projects_dir(),
            relay_port: default_relay_port(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl DaemonConfig {
    pub fn builder() -> DaemonConfigBuilder {
        DaemonConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("host must not be empty"));
        }

        if self.worker_command.is_empty() {
            return Err(anyhow::anyhow!("worker_command must not be empty"));
        }

        if self.relay_command.is_empty() {
            return Err(anyhow::anyhow!("relay_command must not be empty"));
        }

        if self.stop_grace_ms > 60_000 {
            return Err(anyhow::anyhow!("stop_grace_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    /// Get the stop grace window as Duration
    pub fn stop_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stop_grace_ms)
    }
}

/// Configuration for the persistent session shell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
#[builder(setter(into))]
pub struct ShellConfig {
    /// Shell argv; the first element is the binary. A login shell keeps
    /// the user's environment across commands.
    #[serde(default = "default_shell_cmd")]
    #[builder(default = "default_shell_cmd()", setter(custom))]
    pub shell_cmd: Vec<String>,

    /// Per-command deadline before the execution is abandoned (in seconds)
    #[serde(default = "default_command_timeout_secs")]
    #[builder(default = "default_command_timeout_secs()")]
    pub command_timeout_secs: u64,

    /// Captured output beyond this many bytes is truncated
    #[serde(default = "default_output_cap_bytes")]
    #[builder(default = "default_output_cap_bytes()")]
    pub output_cap_bytes: usize,

    /// Grace window for `stop` before the forceful kill (in milliseconds)
    #[serde(default = "default_shell_stop_grace_ms")]
    #[builder(default = "default_shell_stop_grace_ms()")]
    pub stop_grace_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell_cmd: default_shell_cmd(),
            command_timeout_secs: default_command_timeout_secs(),
            output_cap_bytes: default_output_cap_bytes(),
            stop_grace_ms: default_shell_stop_grace_ms(),
        }
    }
}

impl ShellConfig {
    pub fn builder() -> ShellConfigBuilder {
        ShellConfigBuilder::default()
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.shell_cmd.is_empty() {
            return Err(anyhow::anyhow!("shell_cmd must not be empty"));
        }

        if self.command_timeout_secs == 0 {
            return Err(anyhow::anyhow!("command_timeout_secs must be at least 1"));
        }

        if self.command_timeout_secs > 3_600 {
            return Err(anyhow::anyhow!(
                "command_timeout_secs should not exceed one hour"
            ));
        }

        if self.output_cap_bytes == 0 {
            return Err(anyhow::anyhow!("output_cap_bytes must not be zero"));
        }

        Ok(())
    }

    /// Get the command deadline as Duration
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.command_timeout_secs)
    }

    /// Get the stop grace window as Duration
    pub fn stop_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stop_grace_ms)
    }
}

impl ShellConfigBuilder {
    pub fn shell_cmd<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let cmd: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.shell_cmd = Some(cmd);
        self
    }
}

// Default value functions for serde
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_daemon_port() -> u16 {
    DEFAULT_DAEMON_PORT
}
fn default_worker_command() -> String {
    "warden-server".to_string()
}
fn default_relay_command() -> String {
    "warden-relay".to_string()
}
fn default_projects_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("dev")
        .join("warden-projects")
}
fn default_relay_port() -> u16 {
    DEFAULT_RELAY_PORT
}
fn default_stop_grace_ms() -> u64 {
    2_000
}
fn default_shell_cmd() -> Vec<String> {
    vec!["bash".to_string(), "-l".to_string()]
}
fn default_command_timeout_secs() -> u64 {
    180
}
fn default_output_cap_bytes() -> usize {
    8_192
}
fn default_shell_stop_grace_ms() -> u64 {
    4_000
}
