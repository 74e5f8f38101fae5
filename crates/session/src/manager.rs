//! Connection lifecycle state machine and outward session API.

use std::{
    future::Future,
    path::{Path, PathBuf},
    pin::Pin,
    sync::{
        Arc, Mutex as StdMutex, RwLock as StdRwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    serde::Serialize,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use {
    charla_common::{InboundMessage, SendReceipt},
    charla_dispatch::DispatchPipeline,
};

use crate::{
    Result,
    error::Error,
    qr::{QrArtifact, QrRenderer},
    transport::{
        CloseReason, ConnectionPhase, Transport, TransportEvent, TransportSession, UpsertKind,
    },
};

/// Connection status of the logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Tunables for the session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding the transport's auth state.
    pub auth_dir: PathBuf,
    /// Well-known path of the persisted QR PNG.
    pub qr_png_path: PathBuf,
    /// QR events tolerated per pairing before the session fails terminally.
    pub max_qr_attempts: u32,
    /// Consecutive unsolicited reconnects tolerated before the session fails
    /// terminally.
    pub retry_budget: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("auth_info"),
            qr_png_path: PathBuf::from("qr-code.png"),
            max_qr_attempts: 5,
            retry_budget: 10,
        }
    }
}

/// Outward status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
    /// ISO-8601 wall-clock time of the snapshot.
    pub timestamp: String,
}

/// Structured result of the outward `send_message` operation. Failures are
/// data, not errors; nothing throws across this boundary.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct SessionState {
    status: SessionStatus,
    qr_challenge: Option<String>,
    qr_attempts: u32,
    retry_budget: u32,
    /// Set when the session failed terminally; cleared only by explicit
    /// intervention.
    terminal: Option<String>,
    /// Whether the last disconnect was a user-initiated logout.
    logged_out: bool,
}

#[derive(PartialEq)]
enum LoopAction {
    Continue,
    Stop,
}

/// Owns exactly one logical session to the messaging network.
///
/// Converts low-level transport events into QR pairing challenges and
/// inbound application messages, and owns reconnection policy. Failures
/// inside a single message's processing never terminate the session or its
/// event loop.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    pipeline: Arc<DispatchPipeline>,
    renderer: Option<Arc<dyn QrRenderer>>,
    artifact: QrArtifact,
    config: SessionConfig,
    state: StdRwLock<SessionState>,
    session: tokio::sync::RwLock<Option<Arc<dyn TransportSession>>>,
    /// Guard against re-entrant connects from the event-handling flow.
    connecting: AtomicBool,
    cancel: StdMutex<Option<CancellationToken>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        pipeline: Arc<DispatchPipeline>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            pipeline,
            renderer: None,
            artifact: QrArtifact::new(config.qr_png_path.clone()),
            state: StdRwLock::new(SessionState {
                status: SessionStatus::Disconnected,
                qr_challenge: None,
                qr_attempts: 0,
                retry_budget: config.retry_budget,
                terminal: None,
                logged_out: false,
            }),
            config,
            session: tokio::sync::RwLock::new(None),
            connecting: AtomicBool::new(false),
            cancel: StdMutex::new(None),
        }
    }

    #[must_use]
    pub fn with_qr_renderer(mut self, renderer: Arc<dyn QrRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    // ── Outward API ─────────────────────────────────────────────────────

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            status: self.current_status(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Current QR challenge, if the session is waiting for a scan.
    pub fn qr_code(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.qr_challenge.clone()
    }

    /// Well-known path of the persisted QR PNG.
    pub fn qr_png_path(&self) -> &Path {
        self.artifact.path()
    }

    /// Terminal failure reason, if the session needs explicit intervention.
    pub fn terminal_reason(&self) -> Option<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.terminal.clone()
    }

    /// Send a text to a bare number; returns a structured outcome rather
    /// than failing across the API boundary.
    pub async fn send_message(&self, number: &str, text: &str) -> SendMessageResponse {
        let to = format!("{number}@s.whatsapp.net");
        match self.send(&to, text).await {
            Ok(receipt) => SendMessageResponse {
                success: true,
                message_id: Some(receipt.message_id),
                timestamp_ms: Some(receipt.timestamp_ms),
                error: None,
            },
            Err(e) => {
                warn!(to = %number, error = %e, "send_message failed");
                SendMessageResponse {
                    success: false,
                    message_id: None,
                    timestamp_ms: None,
                    error: Some(e.to_string()),
                }
            },
        }
    }

    /// Send a text to a full JID. Fails fast with [`Error::NotConnected`]
    /// unless the session is connected.
    pub async fn send(&self, to: &str, text: &str) -> Result<SendReceipt> {
        if self.current_status() != SessionStatus::Connected {
            return Err(Error::NotConnected);
        }
        let session = { self.session.read().await.clone() };
        let session = session.ok_or(Error::NotConnected)?;
        session.send_text(to, text).await
    }

    /// Discard the current pairing state and start over: attempts reset,
    /// terminal flag cleared, old session handle dropped. Explicit
    /// intervention after a logout also gets a fresh retry budget, the same
    /// as [`SessionManager::connect`].
    pub async fn force_qr_regeneration(self: &Arc<Self>) -> Result<()> {
        info!("forcing qr regeneration");
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.qr_attempts = 0;
            state.qr_challenge = None;
            state.terminal = None;
            if state.logged_out {
                state.retry_budget = self.config.retry_budget;
                state.logged_out = false;
            }
        }
        self.drop_session().await;
        self.start_session().await
    }

    /// Explicitly tear the session down.
    pub async fn close(&self) -> Result<()> {
        let token = { self.cancel.lock().unwrap_or_else(|e| e.into_inner()).take() };
        if let Some(token) = token {
            token.cancel();
        }
        self.drop_session().await;
        self.set_status(SessionStatus::Disconnected);
        info!("session closed");
        Ok(())
    }

    // ── State machine ───────────────────────────────────────────────────

    /// Establish the session. An explicit connect clears a terminal failure,
    /// and after a logout it also replenishes the retry budget; transient
    /// drops keep their running budget so reconnect storms stay detectable.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state.status == SessionStatus::Connected {
                return Ok(());
            }
            state.terminal = None;
            if state.logged_out {
                state.retry_budget = self.config.retry_budget;
                state.logged_out = false;
            }
        }
        self.start_session().await
    }

    /// Reconnect from within the event-handling flow; refuses to resurrect
    /// a terminally failed session.
    fn reconnect<'a>(
        self: &'a Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            {
                let state = self.state.read().unwrap_or_else(|e| e.into_inner());
                if let Some(reason) = &state.terminal {
                    return Err(Error::terminal(reason.clone()));
                }
            }
            self.start_session().await
        })
    }

    async fn start_session(self: &Arc<Self>) -> Result<()> {
        if self.connecting.swap(true, Ordering::SeqCst) {
            debug!("connect already in progress");
            return Ok(());
        }
        let result = self.open_transport().await;
        self.connecting.store(false, Ordering::SeqCst);
        result
    }

    async fn open_transport(self: &Arc<Self>) -> Result<()> {
        self.set_status(SessionStatus::Connecting);

        // Replace any previous event loop before its session handle.
        let token = CancellationToken::new();
        {
            let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(old) = cancel.replace(token.clone()) {
                old.cancel();
            }
        }

        let session = match self.transport.connect(&self.config.auth_dir).await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "transport connect failed");
                self.set_status(SessionStatus::Disconnected);
                return Err(e);
            },
        };
        let events = session
            .take_events()
            .ok_or_else(|| Error::message("transport session has no event stream"))?;

        {
            let mut slot = self.session.write().await;
            if let Some(old) = slot.replace(Arc::clone(&session)) {
                let _ = old.end().await;
            }
        }

        let mgr = Arc::clone(self);
        tokio::spawn(async move { mgr.event_loop(events, token).await });
        debug!("transport session opened, event loop running");
        Ok(())
    }

    async fn event_loop(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("event loop cancelled");
                    break;
                },
                event = events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event, &cancel).await == LoopAction::Stop {
                            break;
                        }
                    },
                    None => {
                        warn!("transport event stream ended");
                        self.set_status(SessionStatus::Disconnected);
                        break;
                    },
                },
            }
        }
    }

    async fn handle_event(
        self: &Arc<Self>,
        event: TransportEvent,
        cancel: &CancellationToken,
    ) -> LoopAction {
        match event {
            TransportEvent::ConnectionUpdate {
                status,
                qr,
                close_reason,
            } => {
                if let Some(qr) = qr {
                    if self.handle_qr(qr, cancel).await == LoopAction::Stop {
                        return LoopAction::Stop;
                    }
                }
                match status {
                    Some(ConnectionPhase::Open) => {
                        self.handle_open().await;
                        LoopAction::Continue
                    },
                    Some(ConnectionPhase::Close) => self.handle_close(close_reason).await,
                    None => LoopAction::Continue,
                }
            },
            TransportEvent::CredentialsUpdate => {
                // Auth persistence is the transport's concern.
                debug!("credentials updated");
                LoopAction::Continue
            },
            TransportEvent::MessageUpsert { messages, kind } => {
                self.handle_upsert(messages, kind);
                LoopAction::Continue
            },
        }
    }

    async fn handle_qr(self: &Arc<Self>, qr: String, cancel: &CancellationToken) -> LoopAction {
        let attempts = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.qr_challenge = Some(qr.clone());
            state.qr_attempts += 1;
            state.qr_attempts
        };

        // A user that never scans must not keep the pairing loop alive
        // forever.
        if attempts > self.config.max_qr_attempts {
            error!(
                attempts,
                max = self.config.max_qr_attempts,
                "max qr generation attempts reached"
            );
            self.enter_terminal("max QR generation attempts reached").await;
            cancel.cancel();
            return LoopAction::Stop;
        }

        info!(
            attempt = attempts,
            max = self.config.max_qr_attempts,
            "qr code generated"
        );

        if let Some(renderer) = &self.renderer {
            if let Err(e) = self.artifact.write(renderer.as_ref(), &qr).await {
                warn!(error = %e, "failed to persist qr artifact");
            }
        }
        LoopAction::Continue
    }

    async fn handle_open(&self) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.status = SessionStatus::Connected;
            state.qr_attempts = 0;
            state.qr_challenge = None;
            // A successful pairing closes the reconnect-storm window.
            state.retry_budget = self.config.retry_budget;
        }
        self.artifact.remove().await;
        info!("connected to the messaging network");
    }

    async fn handle_close(self: &Arc<Self>, reason: Option<CloseReason>) -> LoopAction {
        let reason =
            reason.unwrap_or_else(|| CloseReason::Other("connection closed".to_string()));
        match reason {
            CloseReason::LoggedOut => {
                // Credentials are gone; reconnecting would loop forever
                // re-requesting QR codes.
                info!("logged out, not reconnecting");
                {
                    let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                    state.status = SessionStatus::Disconnected;
                    state.logged_out = true;
                }
                self.drop_session().await;
            },
            CloseReason::Other(why) => {
                let remaining = {
                    let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
                    if state.retry_budget == 0 {
                        None
                    } else {
                        state.retry_budget -= 1;
                        Some(state.retry_budget)
                    }
                };
                match remaining {
                    None => {
                        error!(reason = %why, "reconnect budget exhausted");
                        self.enter_terminal("reconnect budget exhausted").await;
                    },
                    Some(left) => {
                        warn!(reason = %why, retries_left = left, "connection closed, reconnecting");
                        let mgr = Arc::clone(self);
                        tokio::spawn(async move {
                            if let Err(e) = mgr.reconnect().await {
                                error!(error = %e, "reconnect failed");
                            }
                        });
                    },
                }
            },
        }
        LoopAction::Stop
    }

    fn handle_upsert(
        self: &Arc<Self>,
        messages: Vec<crate::transport::RawMessage>,
        kind: UpsertKind,
    ) {
        if kind != UpsertKind::Notify {
            debug!(?kind, "ignoring non-notify upsert");
            return;
        }
        for raw in messages {
            if raw.key.from_me {
                continue;
            }
            let Some(text) = raw.text_content() else {
                debug!(id = %raw.key.id, "payload carries no text, dropping");
                continue;
            };
            let message = InboundMessage {
                text,
                sender: raw.key.remote_jid.clone(),
                timestamp_ms: raw.timestamp_ms,
                key: raw.key,
                payload: raw.payload.unwrap_or(serde_json::Value::Null),
            };
            // Module work stays off the event-delivery path; replies to one
            // message are sent from that message's own task.
            let mgr = Arc::clone(self);
            tokio::spawn(async move { mgr.dispatch_and_reply(message).await });
        }
    }

    /// Run the pipeline for one message and send the reply. Any failure is
    /// logged and swallowed here; the session must survive it.
    async fn dispatch_and_reply(&self, message: InboundMessage) {
        let sender = message.sender.clone();
        match self.pipeline.dispatch(&message).await {
            Ok(outcome) => {
                debug!(to = %sender, module = %outcome.module, "sending reply");
                if let Err(e) = self.send(&sender, &outcome.reply).await {
                    error!(to = %sender, error = %e, "failed to send reply");
                }
            },
            Err(e) => {
                warn!(from = %sender, error = %e, "message not dispatched");
            },
        }
    }

    async fn enter_terminal(&self, reason: &str) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.status = SessionStatus::Disconnected;
            state.terminal = Some(reason.to_string());
        }
        self.drop_session().await;
    }

    async fn drop_session(&self) {
        let old = { self.session.write().await.take() };
        if let Some(session) = old {
            if let Err(e) = session.end().await {
                debug!(error = %e, "error ending transport session");
            }
        }
    }

    fn current_status(&self) -> SessionStatus {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.status
    }

    fn set_status(&self, status: SessionStatus) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.status = status;
    }
}
