//! Sessions
//!
//! One [`Session`] per connection. It owns the handshake state and at most one
//! [`run::ActiveRun`]; everything it sends goes through a single outbound
//! channel so message order on the wire matches the order of events here.

pub mod protocol;
pub mod run;

use crate::config::types::Language;
use crate::judge::dispatch;
use crate::observability::metrics::get_metrics;
use crate::server::ServiceContext;
use protocol::{parse_client_message, ClientMessage, ServerMessage};
use run::ActiveRun;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a valid `hello`
    Connected,
    Idle,
    Running,
    Closed,
}

/// What the connection loop should do after a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct Session {
    id: String,
    authenticated: bool,
    closed: bool,
    ctx: Arc<ServiceContext>,
    outbound: mpsc::Sender<ServerMessage>,
    active: Option<ActiveRun>,
}

/// Compare secrets without leaking the position of the first mismatch.
fn tokens_match(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

impl Session {
    pub fn new(ctx: Arc<ServiceContext>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let id = Uuid::new_v4().to_string();
        let authenticated = !ctx.config.auth_enabled();
        get_metrics().record_session_opened();
        log::info!(
            "[session {}] connected{}",
            id,
            if authenticated { " (auth disabled)" } else { "" }
        );
        Self {
            id,
            authenticated,
            closed: false,
            ctx,
            outbound,
            active: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if !self.authenticated {
            SessionState::Connected
        } else if self.active.as_ref().map(ActiveRun::is_live).unwrap_or(false) {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    async fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message).await;
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        match parse_client_message(text) {
            Ok(message) => self.handle_message(message).await,
            Err(reason) => {
                log::debug!("[session {}] {}", self.id, reason);
                self.send(ServerMessage::error(reason)).await;
                Flow::Continue
            }
        }
    }

    /// Frames the protocol does not carry (binary) are errors, not disconnects.
    pub async fn reject_frame(&mut self, what: &str) {
        self.send(ServerMessage::error(format!("unsupported frame: {}", what)))
            .await;
    }

    pub async fn handle_message(&mut self, message: ClientMessage) -> Flow {
        if self.closed {
            return Flow::Close;
        }

        match message {
            ClientMessage::Hello { token } => return self.handle_hello(&token).await,
            _ if !self.authenticated => {
                self.send(ServerMessage::error("handshake required")).await;
            }
            ClientMessage::Run {
                language,
                code,
                cols,
                rows,
            } => self.start_run(&language, &code, cols, rows).await,
            ClientMessage::Stdin { data } => {
                if let Some(run) = self.live_run() {
                    run.write(data.as_bytes());
                }
            }
            ClientMessage::Resize { cols, rows } => {
                if let Some(run) = self.live_run() {
                    run.resize(cols, rows);
                }
            }
            ClientMessage::Kill => self.kill_run().await,
        }
        Flow::Continue
    }

    async fn handle_hello(&mut self, token: &str) -> Flow {
        let config = &self.ctx.config;
        if config.auth_enabled() && !tokens_match(&config.secret, token) {
            log::warn!("[session {}] handshake rejected", self.id);
            get_metrics().auth_failures.inc();
            self.send(ServerMessage::error("invalid token")).await;
            return Flow::Close;
        }
        if !self.authenticated {
            log::info!("[session {}] authenticated", self.id);
        }
        self.authenticated = true;
        self.send(ServerMessage::Hello { ok: true }).await;
        Flow::Continue
    }

    fn live_run(&self) -> Option<&ActiveRun> {
        self.active.as_ref().filter(|run| run.is_live())
    }

    /// Checks that allocate nothing come first, so a rejected request leaves
    /// an active run alone. The previous run's directory is gone before the
    /// new one is created.
    async fn start_run(
        &mut self,
        language: &str,
        code: &str,
        cols: Option<u16>,
        rows: Option<u16>,
    ) {
        let language: Language = match language.parse() {
            Ok(language) => language,
            Err(e) => {
                self.send(ServerMessage::error(e.to_string())).await;
                return;
            }
        };

        let adapter = match dispatch::check_toolchain(&self.ctx.capabilities, language) {
            Ok(adapter) => adapter,
            Err(e) => {
                log::info!("[session {}] {}", self.id, e);
                get_metrics().toolchain_rejections.inc();
                self.send(ServerMessage::error(e.to_string())).await;
                return;
            }
        };

        if let Some(previous) = self.active.take() {
            log::info!("[session {}] run {} superseded", self.id, previous.id());
            previous.shutdown(self.ctx.config.kill_grace()).await;
        }

        let workspace = match self.ctx.workspaces.create_workspace() {
            Ok(workspace) => workspace,
            Err(e) => {
                log::warn!("[session {}] {}", self.id, e);
                self.send(ServerMessage::error(e.to_string())).await;
                return;
            }
        };
        let plan = match dispatch::prepare(adapter, &workspace, code) {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("[session {}] {}", self.id, e);
                self.send(ServerMessage::error(e.to_string())).await;
                return;
            }
        };

        let config = &self.ctx.config;
        self.active = Some(ActiveRun::start(
            Arc::clone(&self.ctx),
            &self.id,
            language,
            adapter,
            workspace,
            plan,
            cols.unwrap_or(config.default_cols),
            rows.unwrap_or(config.default_rows),
            self.outbound.clone(),
        ));
    }

    async fn kill_run(&mut self) {
        let Some(run) = self.active.take() else {
            return;
        };
        if run.is_live() {
            log::info!("[session {}] run {} killed by client", self.id, run.id());
            run.shutdown(self.ctx.config.kill_grace()).await;
        } else {
            // Finished runs keep their directory until the next run or disconnect.
            self.active = Some(run);
        }
    }

    /// Kill any live run and remove its scratch directory. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(run) = self.active.take() {
            run.shutdown(self.ctx.config.kill_grace()).await;
        }
        log::info!("[session {}] closed", self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // ActiveRun's own Drop kills the process and its Workspace removes the directory.
        get_metrics().record_session_closed();
    }
}
