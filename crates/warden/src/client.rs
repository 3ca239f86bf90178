use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use warden_core::{DEFAULT_DAEMON_PORT, ProcessId, RelayInfo, WardenError, WorkerInfo};

/// Request timeout for control-plane calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the supervisor daemon's control plane.
///
/// Thin request/response helper over the loopback HTTP+JSON API; this type
/// defines the wire contract consumed by CLIs and TUIs.
pub struct DaemonClient {
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    /// Client for a daemon on the default loopback port.
    pub fn new() -> Result<Self, WardenError> {
        Self::for_port(DEFAULT_DAEMON_PORT)
    }

    pub fn for_port(daemon_port: u16) -> Result<Self, WardenError> {
        Self::for_base_url(format!("http://127.0.0.1:{daemon_port}"))
    }

    pub fn for_base_url(base_url: impl Into<String>) -> Result<Self, WardenError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WardenError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    async fn post(&self, path: &str, payload: Value) -> Result<Value, WardenError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| WardenError::ConnectionFailed(e.to_string()))?;
        Self::decode(response).await
    }

    async fn get(&self, path: &str) -> Result<Value, WardenError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| WardenError::ConnectionFailed(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value, WardenError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WardenError::ConnectionFailed(e.to_string()))?;
        if !status.is_success() {
            return Err(WardenError::DaemonStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| WardenError::Protocol(format!("invalid JSON reply: {e}")))
    }

    fn field<T: DeserializeOwned>(mut reply: Value, name: &str) -> Result<T, WardenError> {
        let inner = reply
            .get_mut(name)
            .map(Value::take)
            .ok_or_else(|| WardenError::Protocol(format!("reply missing {name:?} field")))?;
        serde_json::from_value(inner)
            .map_err(|e| WardenError::Protocol(format!("malformed {name:?} field: {e}")))
    }

    /// Ask the daemon to spawn a worker on `port`.
    pub async fn start_worker(
        &self,
        port: u16,
        projects_dir: Option<&Path>,
    ) -> Result<WorkerInfo, WardenError> {
        let mut payload = json!({ "port": port });
        if let Some(dir) = projects_dir {
            payload["projects_dir"] = json!(dir);
        }
        Self::field(self.post("/start", payload).await?, "result")
    }

    pub async fn list_workers(&self) -> Result<HashMap<ProcessId, WorkerInfo>, WardenError> {
        Self::field(self.get("/list").await?, "servers")
    }

    /// Stop a single managed worker by pid or port.
    pub async fn stop_worker(
        &self,
        pid: Option<ProcessId>,
        port: Option<u16>,
    ) -> Result<bool, WardenError> {
        let mut payload = json!({});
        if let Some(pid) = pid {
            payload["pid"] = json!(pid);
        }
        if let Some(port) = port {
            payload["port"] = json!(port);
        }
        Self::field(self.post("/server/stop", payload).await?, "result")
    }

    /// Ask the daemon to spawn a relay; the port defaults daemon-side.
    pub async fn start_relay(
        &self,
        port: Option<u16>,
        config: Option<Value>,
    ) -> Result<RelayInfo, WardenError> {
        let mut payload = json!({});
        if let Some(port) = port {
            payload["port"] = json!(port);
        }
        if let Some(config) = config {
            payload["config"] = config;
        }
        Self::field(self.post("/proxy/start", payload).await?, "result")
    }

    pub async fn list_relays(&self) -> Result<HashMap<ProcessId, RelayInfo>, WardenError> {
        Self::field(self.get("/proxy/list").await?, "proxies")
    }

    pub async fn stop_relay(
        &self,
        pid: Option<ProcessId>,
        port: Option<u16>,
    ) -> Result<bool, WardenError> {
        let mut payload = json!({});
        if let Some(pid) = pid {
            payload["pid"] = json!(pid);
        }
        if let Some(port) = port {
            payload["port"] = json!(port);
        }
        Self::field(self.post("/proxy/stop", payload).await?, "result")
    }

    /// Stop every managed process; returns how many stopped cleanly.
    pub async fn stop_all(&self) -> Result<u64, WardenError> {
        Self::field(self.post("/stop_all", json!({})).await?, "stopped")
    }

    /// Request the daemon process to stop itself.
    pub async fn stop_daemon(&self) -> Result<(), WardenError> {
        let reply = self.post("/daemon/stop", json!({})).await?;
        match reply.get("result").and_then(Value::as_str) {
            Some("stopping") => Ok(()),
            _ => Err(WardenError::Protocol(format!(
                "unexpected stop reply: {reply}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::SupervisorDaemon;
    use crate::test_support::recording_daemon;
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    async fn serve_daemon() -> (
        DaemonClient,
        Arc<SupervisorDaemon>,
        JoinHandle<Result<(), WardenError>>,
        tempfile::TempDir,
    ) {
        let (daemon, _spawner, dir) = recording_daemon();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(daemon.clone().serve_on(listener));
        let client = DaemonClient::for_base_url(format!("http://{addr}")).unwrap();
        (client, daemon, task, dir)
    }

    #[tokio::test]
    async fn test_control_plane_round_trip() {
        let (client, daemon, task, _dir) = serve_daemon().await;

        let info = client.start_worker(8000, None).await.unwrap();
        assert_eq!(info.port, 8000);

        let workers = client.list_workers().await.unwrap();
        assert_eq!(workers.get(&info.pid), Some(&info));

        let relay = client.start_relay(None, None).await.unwrap();
        assert_eq!(relay.port, 3006);
        assert!(client.list_relays().await.unwrap().contains_key(&relay.pid));

        assert!(client.stop_worker(Some(info.pid), None).await.unwrap());
        assert!(client.list_workers().await.unwrap().is_empty());

        // Only the relay is left
        assert_eq!(client.stop_all().await.unwrap(), 1);

        client.stop_daemon().await.unwrap();
        let served = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener did not shut down")
            .unwrap();
        assert!(served.is_ok());
        assert!(daemon.list_relays().is_empty());
    }

    #[tokio::test]
    async fn test_daemon_error_statuses_surface() {
        let (client, daemon, task, _dir) = serve_daemon().await;

        let err = client.start_worker(0, None).await.unwrap_err();
        match err {
            WardenError::DaemonStatus { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("port required"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        daemon.request_shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported() {
        // Nothing listens on port 1
        let client = DaemonClient::for_base_url("http://127.0.0.1:1").unwrap();
        let err = client.list_workers().await.unwrap_err();
        assert!(matches!(err, WardenError::ConnectionFailed(_)));
    }
}
