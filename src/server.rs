//! HTTP and WebSocket front end.
//!
//! `GET /ws` upgrades to a session, `GET /healthz` reports the capability
//! table, `GET /metrics` exports Prometheus text.

use crate::config::config::ServiceConfig;
use crate::config::types::Result;
use crate::judge::probe::CapabilityTable;
use crate::observability::metrics::get_metrics;
use crate::safety::workspace::WorkspaceManager;
use crate::session::protocol::ServerMessage;
use crate::session::{Flow, Session};
use crate::utils::env_hygiene::EnvPolicy;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound messages queued per connection before run tasks wait on the socket
const OUTBOUND_BUFFER: usize = 256;

/// State shared by every connection
#[derive(Debug)]
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub capabilities: Arc<CapabilityTable>,
    pub workspaces: WorkspaceManager,
    pub env_policy: EnvPolicy,
    shutdown: CancellationToken,
    connections: AtomicUsize,
}

impl ServiceContext {
    pub fn new(config: ServiceConfig, capabilities: CapabilityTable) -> Result<Self> {
        let workspaces = WorkspaceManager::new(config.scratch_root.clone())?;
        let env_policy = EnvPolicy::new(config.preserve_env.clone());
        Ok(Self {
            config,
            capabilities: Arc::new(capabilities),
            workspaces,
            env_policy,
            shutdown: CancellationToken::new(),
            connections: AtomicUsize::new(0),
        })
    }

    /// Ask every open connection to close its session.
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until all connections have released their sessions, or `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.open_connections() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }
}

/// Counts a connection for as long as its handler runs.
struct ConnectionGuard(Arc<ServiceContext>);

impl ConnectionGuard {
    fn new(ctx: Arc<ServiceContext>) -> Self {
        ctx.connections.fetch_add(1, Ordering::SeqCst);
        Self(ctx)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn build_router(ctx: Arc<ServiceContext>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(ctx)
}

/// Serve until `shutdown` resolves, then close sessions and wait for them.
pub async fn serve<F>(
    ctx: Arc<ServiceContext>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let signal_ctx = Arc::clone(&ctx);
    axum::serve(listener, build_router(Arc::clone(&ctx)))
        .with_graceful_shutdown(async move {
            shutdown.await;
            signal_ctx.begin_shutdown();
        })
        .await?;

    let grace = ctx.config.kill_grace() + Duration::from_secs(1);
    if !ctx.drain(grace).await {
        log::warn!(
            "{} connection(s) still open after shutdown grace",
            ctx.open_connections()
        );
    }
    Ok(())
}

/// GET /ws
async fn ws_handler(State(ctx): State<Arc<ServiceContext>>, ws: WebSocketUpgrade) -> Response {
    let max = ctx.config.max_message_bytes;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| handle_connection(socket, ctx))
}

/// GET /healthz
async fn healthz(State(ctx): State<Arc<ServiceContext>>) -> Json<serde_json::Value> {
    let languages: Vec<&str> = ctx
        .capabilities
        .available_languages()
        .into_iter()
        .map(|l| l.as_str())
        .collect();
    Json(serde_json::json!({
        "status": "ok",
        "languages": languages,
        "capabilities": ctx.capabilities.as_ref(),
    }))
}

/// GET /metrics
async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        get_metrics().export_prometheus(),
    )
}

async fn handle_connection(socket: WebSocket, ctx: Arc<ServiceContext>) {
    let _guard = ConnectionGuard::new(Arc::clone(&ctx));
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let ping_every = ctx.config.ping_interval();
    let send_task = tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval_at(tokio::time::Instant::now() + ping_every, ping_every);

        loop {
            tokio::select! {
                message = outbound_rx.recv() => {
                    let Some(message) = message else {
                        // Session and every run task are gone
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    if sender.send(Message::Text(message.to_json().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut session = Session::new(Arc::clone(&ctx), outbound_tx);
    let session_id = session.id().to_string();

    loop {
        let next = tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                log::info!("[session {}] closing for shutdown", session_id);
                break;
            }
            next = receiver.next() => next,
        };

        let flow = match next {
            Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
            Some(Ok(Message::Binary(_))) => {
                session.reject_frame("binary").await;
                Flow::Continue
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Flow::Continue,
            Some(Ok(Message::Close(_))) | None => {
                log::debug!("[session {}] client closed the connection", session_id);
                break;
            }
            Some(Err(e)) => {
                log::warn!("[session {}] WebSocket error: {}", session_id, e);
                break;
            }
        };

        if flow == Flow::Close {
            break;
        }
    }

    session.close().await;
    drop(session);

    // The writer exits once every outbound sender is dropped.
    if tokio::time::timeout(Duration::from_secs(5), send_task).await.is_err() {
        log::warn!("[session {}] writer did not finish, dropping connection", session_id);
    }
}
