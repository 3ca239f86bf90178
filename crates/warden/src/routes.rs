use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::daemon::SupervisorDaemon;
use warden_core::{ProcessId, WardenError};

/// Build the control-plane router bound to a daemon instance.
///
/// Handlers hold the daemon by `Arc` injected here at construction time;
/// there is no ambient state.
pub fn router(daemon: Arc<SupervisorDaemon>) -> Router {
    Router::new()
        .route("/start", post(start_worker))
        .route("/list", get(list_workers))
        .route("/server/stop", post(stop_worker))
        .route("/proxy/start", post(start_relay))
        .route("/proxy/list", get(list_relays))
        .route("/proxy/stop", post(stop_relay))
        .route("/stop_all", post(stop_all))
        .route("/daemon/stop", post(stop_daemon))
        .fallback(not_found)
        .with_state(daemon)
}

type Reply = (StatusCode, Json<Value>);

/// Tolerant body parse: malformed JSON behaves as an empty object, so the
/// required-field checks produce the 400, not the transport layer.
fn parse_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

fn ok(payload: Value) -> Reply {
    (StatusCode::OK, Json(payload))
}

fn bad_request(msg: &str) -> Reply {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg})))
}

fn error_reply(err: &WardenError) -> Reply {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"error": err.to_string()})))
}

#[derive(Debug, Default, Deserialize)]
struct StartWorkerRequest {
    port: Option<u16>,
    projects_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct StartRelayRequest {
    port: Option<u16>,
    config: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct StopRequest {
    pid: Option<ProcessId>,
    port: Option<u16>,
}

async fn start_worker(State(daemon): State<Arc<SupervisorDaemon>>, body: Bytes) -> Reply {
    let req: StartWorkerRequest = parse_body(&body);
    let Some(port) = req.port.filter(|port| *port != 0) else {
        return bad_request("port required");
    };
    match daemon.start_worker(port, req.projects_dir).await {
        Ok(info) => ok(json!({"result": info})),
        Err(e) => {
            warn!("Worker start failed: {e}");
            error_reply(&e)
        }
    }
}

async fn start_relay(State(daemon): State<Arc<SupervisorDaemon>>, body: Bytes) -> Reply {
    let req: StartRelayRequest = parse_body(&body);
    match daemon.start_relay(req.port, req.config).await {
        Ok(info) => ok(json!({"result": info})),
        Err(e) => {
            warn!("Relay start failed: {e}");
            error_reply(&e)
        }
    }
}

async fn list_workers(State(daemon): State<Arc<SupervisorDaemon>>) -> Reply {
    ok(json!({"servers": daemon.list_workers()}))
}

async fn list_relays(State(daemon): State<Arc<SupervisorDaemon>>) -> Reply {
    ok(json!({"proxies": daemon.list_relays()}))
}

async fn stop_worker(State(daemon): State<Arc<SupervisorDaemon>>, body: Bytes) -> Reply {
    let req: StopRequest = parse_body(&body);
    match (req.pid, req.port) {
        (Some(pid), _) => ok(json!({"result": daemon.stop_worker_by_pid(pid).await})),
        (None, Some(port)) => ok(json!({"result": daemon.stop_worker_by_port(port).await})),
        (None, None) => bad_request("pid or port required"),
    }
}

async fn stop_relay(State(daemon): State<Arc<SupervisorDaemon>>, body: Bytes) -> Reply {
    let req: StopRequest = parse_body(&body);
    match (req.pid, req.port) {
        (Some(pid), _) => ok(json!({"result": daemon.stop_relay_by_pid(pid).await})),
        (None, Some(port)) => ok(json!({"result": daemon.stop_relay_by_port(port).await})),
        (None, None) => bad_request("pid or port required"),
    }
}

async fn stop_all(State(daemon): State<Arc<SupervisorDaemon>>) -> Reply {
    ok(json!({"stopped": daemon.stop_all().await}))
}

async fn stop_daemon(State(daemon): State<Arc<SupervisorDaemon>>) -> Reply {
    info!("Control plane asked to stop; shutting down after reply");
    // Reply goes out first; the caller's request must not hang on a
    // listener that is about to close.
    tokio::spawn(async move {
        daemon.stop_all().await;
        daemon.request_shutdown();
    });
    ok(json!({"result": "stopping"}))
}

async fn not_found() -> Reply {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::recording_daemon;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn call(app: Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = match body {
            Some(value) => Request::builder()
                .method(method)
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&value).unwrap()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_start_requires_port() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon);

        let (status, body) = call(app.clone(), "POST", "/start", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "port required"}));

        let (status, body) = call(app, "POST", "/start", Some(json!({"port": 0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "port required"}));
    }

    #[tokio::test]
    async fn test_malformed_json_behaves_as_empty_body() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon);

        let request = Request::builder()
            .method("POST")
            .uri("/start")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_list_stop_round_trip() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon);

        let (status, body) =
            call(app.clone(), "POST", "/start", Some(json!({"port": 8000}))).await;
        assert_eq!(status, StatusCode::OK);
        let pid = body["result"]["pid"].as_u64().unwrap();
        assert_eq!(body["result"]["port"], json!(8000));

        let (status, body) = call(app.clone(), "GET", "/list", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["servers"].get(pid.to_string()).is_some());

        let (status, body) =
            call(app.clone(), "POST", "/server/stop", Some(json!({"pid": pid}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": true}));

        let (_, body) = call(app, "GET", "/list", None).await;
        assert_eq!(body, json!({"servers": {}}));
    }

    #[tokio::test]
    async fn test_stop_requires_pid_or_port() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon);

        let (status, body) = call(app, "POST", "/server/stop", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "pid or port required"}));
    }

    #[tokio::test]
    async fn test_relay_routes() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon);

        let (status, body) = call(app.clone(), "POST", "/proxy/start", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let pid = body["result"]["pid"].as_u64().unwrap();
        assert_eq!(body["result"]["port"], json!(3006));

        let (_, body) = call(app.clone(), "GET", "/proxy/list", None).await;
        assert!(body["proxies"].get(pid.to_string()).is_some());

        let (status, body) =
            call(app, "POST", "/proxy/stop", Some(json!({"port": 3006}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": true}));
    }

    #[tokio::test]
    async fn test_stop_all_reports_count() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon.clone());

        call(app.clone(), "POST", "/start", Some(json!({"port": 8000}))).await;
        call(app.clone(), "POST", "/proxy/start", Some(json!({}))).await;

        let (status, body) = call(app, "POST", "/stop_all", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"stopped": 2}));
        assert!(daemon.list_workers().is_empty());
        assert!(daemon.list_relays().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon);

        let (status, body) = call(app, "GET", "/definitely/not/a/route", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "not found"}));
    }

    #[tokio::test]
    async fn test_daemon_stop_replies_then_cancels() {
        let (daemon, _spawner, _dir) = recording_daemon();
        let app = router(daemon.clone());
        daemon.start_worker(8000, None).await.unwrap();

        let (status, body) = call(app, "POST", "/daemon/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": "stopping"}));

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            daemon.shutdown_token().cancelled(),
        )
        .await
        .expect("shutdown token was never cancelled");
        assert!(daemon.list_workers().is_empty());
    }
}
