use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_core::{
    DaemonConfig, ProcessId, ProcessRegistry, ProcessSpawner, RelayInfo, SpawnSpec, StdioPolicy,
    WardenError, WorkerInfo,
};
use warden_unix::{UnixProcessSpawner, find_processes_matching};

const LOG_DIR_NAME: &str = ".warden-daemon-logs";

/// Spawns, tracks, and terminates worker and relay processes on behalf of
/// remote callers, and runs the control-plane listener.
///
/// The worker and relay registries are guarded by independent locks, so
/// relay operations never contend with worker operations. Process handles
/// are exclusively owned by their registry entry; stopping a process first
/// takes the entry out of the registry, then terminates outside the lock.
pub struct SupervisorDaemon {
    config: DaemonConfig,
    spawner: Arc<dyn ProcessSpawner>,
    workers: ProcessRegistry<WorkerInfo>,
    relays: ProcessRegistry<RelayInfo>,
    shutdown: CancellationToken,
}

impl SupervisorDaemon {
    pub fn new(config: DaemonConfig) -> Result<Self, WardenError> {
        Self::with_spawner(config, Arc::new(UnixProcessSpawner::new()))
    }

    /// Construct with an injected spawner; tests substitute a recording fake.
    pub fn with_spawner(
        config: DaemonConfig,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Result<Self, WardenError> {
        config
            .validate()
            .map_err(|e| WardenError::Configuration(format!("Invalid daemon config: {e}")))?;

        Ok(Self {
            config,
            spawner,
            workers: ProcessRegistry::new(),
            relays: ProcessRegistry::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Per-process log directory under the projects dir, falling back to the
    /// system temp dir when it cannot be created.
    fn log_dir(&self, projects_dir: &Path) -> PathBuf {
        let basedir = projects_dir.join(LOG_DIR_NAME);
        match std::fs::create_dir_all(&basedir) {
            Ok(()) => basedir,
            Err(e) => {
                warn!("Could not create log dir {basedir:?}: {e}; using temp dir");
                std::env::temp_dir()
            }
        }
    }

    /// Spawn a worker server and track it. The pid is the caller's handle
    /// for future stop/list calls.
    pub async fn start_worker(
        &self,
        port: u16,
        projects_dir: Option<PathBuf>,
    ) -> Result<WorkerInfo, WardenError> {
        let projects_dir = projects_dir.unwrap_or_else(|| self.config.projects_dir.clone());
        let started_at = Utc::now();
        // Port plus timestamp, so repeated starts never share a log file
        let stamp = started_at.format("%Y%m%d-%H%M%S");
        let log_dir = self.log_dir(&projects_dir);
        let logfile = log_dir.join(format!("worker_{port}_{stamp}.log"));
        let audit_log = log_dir.join(format!("worker_{port}_{stamp}.audit.log"));

        let spec = SpawnSpec::new(&self.config.worker_command)
            .arg("--port")
            .arg(port.to_string())
            .arg("--projects-dir")
            .arg(projects_dir.display().to_string())
            .arg("--audit-log")
            .arg(audit_log.display().to_string())
            .stdio(StdioPolicy::LogFile(logfile.clone()))
            .detach();

        let handle = self
            .spawner
            .spawn(&spec)
            .await
            .map_err(|e| WardenError::SpawnFailed(e.to_string()))?;
        let pid = handle
            .pid()
            .ok_or_else(|| WardenError::SpawnFailed("worker exited before a pid was known".to_string()))?;

        let info = WorkerInfo {
            pid,
            port,
            projects_dir,
            logfile,
            audit_log,
            started_at,
        };
        self.workers.insert(pid, info.clone(), handle);
        info!("Started worker (PID: {pid}) on port {port}");
        Ok(info)
    }

    /// Spawn a relay and track it. When a JSON config is supplied it is
    /// written to a derived file consumed via `--config` and deleted on stop.
    pub async fn start_relay(
        &self,
        port: Option<u16>,
        relay_config: Option<serde_json::Value>,
    ) -> Result<RelayInfo, WardenError> {
        let port = port.unwrap_or(self.config.relay_port);
        let started_at = Utc::now();
        let stamp = started_at.format("%Y%m%d-%H%M%S");
        let log_dir = self.log_dir(&self.config.projects_dir);
        let logfile = log_dir.join(format!("relay_{port}_{stamp}.log"));

        let config_path = match relay_config {
            Some(value) => {
                let path = log_dir.join(format!("relay_{port}_{stamp}.json"));
                let contents = serde_json::to_vec_pretty(&value).map_err(|e| {
                    WardenError::Configuration(format!("relay config not serializable: {e}"))
                })?;
                std::fs::write(&path, contents).map_err(|e| {
                    WardenError::SpawnFailed(format!("could not write relay config {path:?}: {e}"))
                })?;
                Some(path)
            }
            None => None,
        };

        let mut spec = SpawnSpec::new(&self.config.relay_command)
            .arg("--port")
            .arg(port.to_string())
            .env("NO_COLOR", "1")
            .stdio(StdioPolicy::LogFile(logfile.clone()))
            .detach();
        if let Some(path) = &config_path {
            spec = spec.arg("--config").arg(path.display().to_string());
        }

        let handle = match self.spawner.spawn(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(path) = &config_path {
                    let _ = std::fs::remove_file(path);
                }
                return Err(WardenError::SpawnFailed(e.to_string()));
            }
        };
        let pid = handle
            .pid()
            .ok_or_else(|| WardenError::SpawnFailed("relay exited before a pid was known".to_string()))?;

        let info = RelayInfo {
            pid,
            port,
            logfile,
            config_path,
            started_at,
        };
        self.relays.insert(pid, info.clone(), handle);
        info!("Started relay (PID: {pid}) on port {port}");
        Ok(info)
    }

    /// Stop a tracked worker by pid, falling back to a best-effort raw
    /// signal for pids the registry does not know.
    pub async fn stop_worker_by_pid(&self, pid: ProcessId) -> bool {
        match self.workers.take(pid) {
            Some(mut tracked) => {
                // The entry is already out of the registry; a failed
                // termination must not resurrect it.
                let result = tracked.handle.terminate(self.config.stop_grace()).await;
                if !result.is_clean() {
                    error!("Worker {pid} termination failed: {result:?}");
                }
                result.is_clean()
            }
            None => {
                debug!("Worker {pid} not tracked; falling back to raw signal");
                self.spawner.signal_untracked(pid)
            }
        }
    }

    pub async fn stop_relay_by_pid(&self, pid: ProcessId) -> bool {
        match self.relays.take(pid) {
            Some(mut tracked) => {
                let result = tracked.handle.terminate(self.config.stop_grace()).await;
                if let Some(path) = &tracked.info.config_path {
                    if let Err(e) = std::fs::remove_file(path) {
                        debug!("Could not remove relay config {path:?}: {e}");
                    }
                }
                if !result.is_clean() {
                    error!("Relay {pid} termination failed: {result:?}");
                }
                result.is_clean()
            }
            None => {
                debug!("Relay {pid} not tracked; falling back to raw signal");
                self.spawner.signal_untracked(pid)
            }
        }
    }

    pub async fn stop_worker_by_port(&self, port: u16) -> bool {
        match self.workers.find_pid(|info| info.port == port) {
            Some(pid) => self.stop_worker_by_pid(pid).await,
            None => false,
        }
    }

    pub async fn stop_relay_by_port(&self, port: u16) -> bool {
        match self.relays.find_pid(|info| info.port == port) {
            Some(pid) => self.stop_relay_by_pid(pid).await,
            None => false,
        }
    }

    pub fn list_workers(&self) -> HashMap<ProcessId, WorkerInfo> {
        self.workers.snapshot()
    }

    pub fn list_relays(&self) -> HashMap<ProcessId, RelayInfo> {
        self.relays.snapshot()
    }

    /// Stop everything the daemon tracks. Relays are downstream consumers of
    /// the workers, so they are retired first; best-effort, not
    /// transactional. Returns the number of processes stopped cleanly.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for pid in self.relays.pids() {
            if self.stop_relay_by_pid(pid).await {
                stopped += 1;
            }
        }
        for pid in self.workers.pids() {
            if self.stop_worker_by_pid(pid).await {
                stopped += 1;
            }
        }
        info!("Stopped {stopped} managed processes");
        stopped
    }

    /// SIGTERM leftover worker processes from a previous daemon run that no
    /// registry tracks. Returns the number of processes signalled.
    pub fn sweep_strays(&self) -> usize {
        let pattern = Path::new(&self.config.worker_command)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.worker_command.clone());
        let tracked: HashSet<ProcessId> = self.workers.pids().into_iter().collect();

        let mut swept = 0;
        for (pid, cmdline) in find_processes_matching(&[pattern]) {
            if tracked.contains(&pid) {
                continue;
            }
            if self.spawner.signal_untracked(pid) {
                info!("Swept stray worker {pid}: {cmdline}");
                swept += 1;
            }
        }
        swept
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Bind the configured address and serve the control plane until the
    /// shutdown token fires.
    pub async fn serve(self: Arc<Self>) -> Result<(), WardenError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| WardenError::ConnectionFailed(format!("could not bind {addr}: {e}")))?;
        self.serve_on(listener).await
    }

    /// Serve the control plane on an already bound listener.
    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> Result<(), WardenError> {
        let addr = listener
            .local_addr()
            .map_err(|e| WardenError::Other(anyhow::anyhow!(e)))?;
        info!("Control plane listening on http://{addr}");

        let app = crate::routes::router(self.clone());
        let token = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| WardenError::Other(anyhow::anyhow!("control plane listener failed: {e}")))?;

        // Children never outlive the daemon loop, whichever way it ended.
        self.stop_all().await;
        Ok(())
    }
}
