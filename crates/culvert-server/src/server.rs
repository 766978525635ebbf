//! `CulvertServer` — Axum HTTP + WebSocket server.
//!
//! Clients connect at `/ws/{id}` with their self-chosen id. Each
//! connection gets a bounded write task and a liveness loop; teardown
//! always unregisters, stops supervision, and clears conversation
//! memory, in that order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router as AxumRouter;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use culvert_enrich::SessionMemory;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::heartbeat::HeartbeatResult;
use crate::websocket::{
    ClientConnection, ConnectionRegistry, Frame, HeartbeatSupervisor, Router, run_heartbeat,
};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub heartbeats: Arc<HeartbeatSupervisor>,
    pub router: Arc<Router>,
    pub memory: Arc<SessionMemory>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub config: Arc<ServerConfig>,
    pub start_time: Instant,
}

/// The main culvert server.
pub struct CulvertServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    heartbeats: Arc<HeartbeatSupervisor>,
    router: Arc<Router>,
    memory: Arc<SessionMemory>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl CulvertServer {
    pub fn new(
        config: ServerConfig,
        registry: Arc<ConnectionRegistry>,
        router: Arc<Router>,
        memory: Arc<SessionMemory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            heartbeats: Arc::new(HeartbeatSupervisor::new()),
            router,
            memory,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> AxumRouter {
        let state = AppState {
            registry: self.registry.clone(),
            heartbeats: self.heartbeats.clone(),
            router: self.router.clone(),
            memory: self.memory.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
        };

        AxumRouter::new()
            .route("/health", get(health_handler))
            .route("/ws/{id}", get(ws_handler))
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown. Returns the
    /// bound address (useful with port 0) and the serve task handle.
    pub async fn listen(&self) -> std::io::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned());
            if let Err(err) = serve.await {
                tracing::error!(%err, "server error");
            }
        });

        Ok((addr, handle))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.count().await;
    let dropped = state.registry.dropped_frames().await;
    Json(health::health_check(state.start_time, connections, dropped))
}

/// GET /ws/{id} — WebSocket upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

/// Drive one connection: write task, liveness loop, and the read loop
/// with per-message error isolation.
async fn handle_socket(socket: WebSocket, client_id: String, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel(state.config.send_queue_depth.max(1));
    let conn = Arc::new(ClientConnection::new(client_id, tx));

    let _displaced = state.registry.register(conn.clone()).await;
    let hb_token = state.heartbeats.begin(&conn.id);

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text.as_str().into()),
                Frame::Ping => Message::Ping(Bytes::new()),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    let interval = Duration::from_secs(state.config.heartbeat_interval_secs);
    let idle_timeout = Duration::from_secs(state.config.idle_timeout_secs);
    let heartbeat = run_heartbeat(conn.clone(), interval, idle_timeout, (*hb_token).clone());
    tokio::pin!(heartbeat);

    let shutdown = state.shutdown.token();

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        conn.mark_active();
                        if let Some(reply) = state.router.dispatch(&conn, text.as_str()).await {
                            let _ = conn.send_str(reply);
                        }
                    }
                    Some(Ok(Message::Pong(_) | Message::Ping(_))) => conn.mark_active(),
                    Some(Ok(Message::Binary(_))) => {
                        debug!(client_id = %conn.id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(client_id = %conn.id, %err, "read error, closing");
                        break;
                    }
                }
            }
            result = &mut heartbeat => {
                match result {
                    HeartbeatResult::TimedOut => {
                        info!(client_id = %conn.id, "idle timeout, closing");
                    }
                    HeartbeatResult::Cancelled => {
                        debug!(client_id = %conn.id, "liveness loop cancelled");
                    }
                }
                break;
            }
            () = shutdown.cancelled() => break,
        }
    }

    let _ = state.heartbeats.end_exact(&conn.id, &hb_token);
    let _ = state.registry.unregister_exact(&conn).await;
    state.memory.clear(&conn.id);
    write_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use culvert_blob::{BlobError, BlobStore};
    use culvert_control::ControlLock;
    use culvert_enrich::Pipeline;
    use culvert_llm::{ChatMessage, CompletionClient, LlmError};
    use culvert_storage::{IngestService, MemoryStore};
    use tower::ServiceExt;

    struct StubLlm;

    #[async_trait]
    impl CompletionClient for StubLlm {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            Ok("ok".into())
        }
    }

    struct StubBlob;

    #[async_trait]
    impl BlobStore for StubBlob {
        async fn signed_download_url(
            &self,
            _bucket: &str,
            _object: &str,
            _ttl: Duration,
        ) -> Result<String, BlobError> {
            Ok("https://signed.example/x".into())
        }

        async fn signed_upload_url(
            &self,
            _bucket: &str,
            _object: &str,
            _ttl: Duration,
            _content_type: &str,
        ) -> Result<String, BlobError> {
            Ok("https://upload.example/x".into())
        }
    }

    fn make_server() -> CulvertServer {
        let registry = Arc::new(ConnectionRegistry::new());
        let memory = Arc::new(SessionMemory::new(12));
        let ingest = Arc::new(IngestService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StubBlob),
            "bucket".into(),
        ));
        let pipeline = Arc::new(Pipeline::spawn(
            1,
            8,
            memory.clone(),
            Arc::new(StubLlm),
            ingest.clone(),
            Arc::new(StubBlob),
        ));
        let router = Arc::new(Router::new(
            registry.clone(),
            Arc::new(ControlLock::new()),
            pipeline,
            ingest,
            "android_rc".into(),
        ));
        CulvertServer::new(ServerConfig::default(), registry, router, memory)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["dropped_frames"], 0);
    }

    #[tokio::test]
    async fn ws_route_rejects_plain_get() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/ws/android_rc")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shutdown_propagates_to_coordinator() {
        let server = make_server();
        let shutdown = server.shutdown().clone();
        assert!(!shutdown.is_shutting_down());
        shutdown.shutdown();
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn config_accessible() {
        let server = make_server();
        assert_eq!(server.config().forward_target, "android_rc");
    }
}
