//! WebSocket transport against the Baileys sidecar.
//!
//! The sidecar owns the actual WhatsApp Web protocol; this side speaks a
//! small JSON message protocol to it: `login` / `send` / `logout` commands
//! out, connection and message events in. Send acknowledgements are
//! correlated by request id.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt, stream::SplitSink},
    serde::{Deserialize, Serialize},
    tokio::{
        net::TcpStream,
        sync::{Mutex, mpsc, oneshot},
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use charla_common::SendReceipt;

use crate::{
    Result,
    error::Error,
    transport::{
        CloseReason, ConnectionPhase, RawMessage, Transport, TransportEvent, TransportSession,
        UpsertKind,
    },
};

pub const DEFAULT_SIDECAR_PORT: u16 = 8055;

const CONNECT_ATTEMPTS: u32 = 10;
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<SendResult>>>>;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SidecarCommand<'a> {
    Login { auth_dir: &'a str },
    Send {
        request_id: &'a str,
        to: &'a str,
        text: &'a str,
    },
    Logout,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SidecarEvent {
    Qr {
        qr: String,
    },
    Connected,
    Closed {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        logged_out: bool,
    },
    CredsUpdate,
    Message {
        messages: Vec<RawMessage>,
        kind: UpsertKind,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        timestamp_ms: Option<i64>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug)]
struct SendResult {
    success: bool,
    message_id: Option<String>,
    timestamp_ms: Option<i64>,
    error: Option<String>,
}

/// Map a sidecar event to a transport event. `SendResult` is handled out of
/// band and maps to nothing here.
fn map_event(event: SidecarEvent) -> Option<TransportEvent> {
    match event {
        SidecarEvent::Qr { qr } => Some(TransportEvent::ConnectionUpdate {
            status: None,
            qr: Some(qr),
            close_reason: None,
        }),
        SidecarEvent::Connected => Some(TransportEvent::ConnectionUpdate {
            status: Some(ConnectionPhase::Open),
            qr: None,
            close_reason: None,
        }),
        SidecarEvent::Closed { reason, logged_out } => {
            let close_reason = if logged_out {
                CloseReason::LoggedOut
            } else {
                CloseReason::Other(reason.unwrap_or_else(|| "connection closed".to_string()))
            };
            Some(TransportEvent::ConnectionUpdate {
                status: Some(ConnectionPhase::Close),
                qr: None,
                close_reason: Some(close_reason),
            })
        },
        SidecarEvent::CredsUpdate => Some(TransportEvent::CredentialsUpdate),
        SidecarEvent::Message { messages, kind } => {
            Some(TransportEvent::MessageUpsert { messages, kind })
        },
        SidecarEvent::SendResult { .. } => None,
    }
}

/// Connects to the sidecar's WebSocket server and logs the account in.
pub struct SidecarTransport {
    url: String,
}

impl SidecarTransport {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            url: format!("ws://127.0.0.1:{port}"),
        }
    }
}

#[async_trait]
impl Transport for SidecarTransport {
    async fn connect(&self, auth_dir: &Path) -> Result<Arc<dyn TransportSession>> {
        // The sidecar process might still be starting; retry briefly.
        let mut last_err: Option<Error> = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    debug!(url = %self.url, attempt, "connected to sidecar");
                    return open_session(ws, auth_dir).await;
                },
                Err(e) => {
                    debug!(url = %self.url, attempt, error = %e, "sidecar not reachable yet");
                    last_err = Some(Error::transport("sidecar connect", e));
                    tokio::time::sleep(Duration::from_secs(1)).await;
                },
            }
        }
        Err(last_err.unwrap_or_else(|| Error::message("sidecar connect failed")))
    }
}

async fn open_session(ws: WsStream, auth_dir: &Path) -> Result<Arc<dyn TransportSession>> {
    let (writer, mut reader) = ws.split();
    let writer = Mutex::new(writer);
    let (events_tx, events_rx) = mpsc::channel(64);
    let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));

    let reader_pending = Arc::clone(&pending);
    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    info!("sidecar closed the connection");
                    break;
                },
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "sidecar read failed");
                    break;
                },
            };

            let event: SidecarEvent = match serde_json::from_str(text.as_str()) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "unparseable sidecar event");
                    continue;
                },
            };

            if let SidecarEvent::SendResult {
                request_id,
                success,
                message_id,
                timestamp_ms,
                error,
            } = event
            {
                let waiter = {
                    let mut pending = reader_pending.lock().unwrap_or_else(|e| e.into_inner());
                    pending.remove(&request_id)
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(SendResult {
                            success,
                            message_id,
                            timestamp_ms,
                            error,
                        });
                    },
                    None => debug!(%request_id, "send result for unknown request"),
                }
                continue;
            }

            if let Some(event) = map_event(event) {
                if events_tx.send(event).await.is_err() {
                    // Nobody is listening anymore.
                    break;
                }
            }
        }
        // events_tx drops here; the session loop observes the stream end.
    });

    let session = SidecarSession {
        writer,
        events: StdMutex::new(Some(events_rx)),
        pending,
    };
    session
        .send_command(&SidecarCommand::Login {
            auth_dir: &auth_dir.to_string_lossy(),
        })
        .await?;

    Ok(Arc::new(session))
}

struct SidecarSession {
    writer: Mutex<WsWriter>,
    events: StdMutex<Option<mpsc::Receiver<TransportEvent>>>,
    pending: PendingMap,
}

impl SidecarSession {
    async fn send_command(&self, command: &SidecarCommand<'_>) -> Result<()> {
        let json = serde_json::to_string(command)
            .map_err(|e| Error::transport("encode sidecar command", e))?;
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::text(json))
            .await
            .map_err(|e| Error::transport("sidecar send", e))
    }
}

#[async_trait]
impl TransportSession for SidecarSession {
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(request_id.clone(), tx);
        }

        self.send_command(&SidecarCommand::Send {
            request_id: &request_id,
            to,
            text,
        })
        .await?;

        let result = match tokio::time::timeout(SEND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => return Err(Error::message("sidecar dropped the send request")),
            Err(_) => {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.remove(&request_id);
                return Err(Error::message("sidecar send timed out"));
            },
        };

        if result.success {
            Ok(SendReceipt {
                message_id: result.message_id.unwrap_or_default(),
                timestamp_ms: result
                    .timestamp_ms
                    .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            })
        } else {
            Err(Error::message(
                result.error.unwrap_or_else(|| "send rejected".to_string()),
            ))
        }
    }

    async fn end(&self) -> Result<()> {
        // Best-effort logout; the socket may already be gone.
        if let Err(e) = self.send_command(&SidecarCommand::Logout).await {
            debug!(error = %e, "logout command failed");
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn qr_event_maps_to_a_qr_challenge() {
        let event: SidecarEvent = serde_json::from_str(r#"{"type":"qr","qr":"2@abc"}"#).unwrap();
        match map_event(event) {
            Some(TransportEvent::ConnectionUpdate { qr, status, .. }) => {
                assert_eq!(qr.as_deref(), Some("2@abc"));
                assert!(status.is_none());
            },
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn logged_out_close_is_distinguished() {
        let event: SidecarEvent =
            serde_json::from_str(r#"{"type":"closed","logged_out":true}"#).unwrap();
        match map_event(event) {
            Some(TransportEvent::ConnectionUpdate { close_reason, .. }) => {
                assert_eq!(close_reason, Some(CloseReason::LoggedOut));
            },
            other => panic!("unexpected mapping: {other:?}"),
        }

        let event: SidecarEvent =
            serde_json::from_str(r#"{"type":"closed","reason":"stream errored"}"#).unwrap();
        match map_event(event) {
            Some(TransportEvent::ConnectionUpdate { close_reason, .. }) => {
                assert_eq!(
                    close_reason,
                    Some(CloseReason::Other("stream errored".into()))
                );
            },
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn message_events_carry_raw_messages() {
        let event: SidecarEvent = serde_json::from_str(
            r#"{
                "type": "message",
                "kind": "notify",
                "messages": [{
                    "key": { "remote_jid": "111@s.whatsapp.net", "from_me": false, "id": "A1" },
                    "payload": { "extendedTextMessage": { "text": "hola" } },
                    "timestamp_ms": 1700000000000
                }]
            }"#,
        )
        .unwrap();
        match map_event(event) {
            Some(TransportEvent::MessageUpsert { messages, kind }) => {
                assert_eq!(kind, UpsertKind::Notify);
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].text_content().as_deref(), Some("hola"));
            },
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn send_results_are_not_forwarded_as_events() {
        let event: SidecarEvent = serde_json::from_str(
            r#"{"type":"send_result","request_id":"r1","success":true,"message_id":"M1"}"#,
        )
        .unwrap();
        assert!(map_event(event).is_none());
    }

    #[test]
    fn commands_serialize_with_a_type_tag() {
        let json = serde_json::to_string(&SidecarCommand::Send {
            request_id: "r1",
            to: "111@s.whatsapp.net",
            text: "hola",
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "send");
        assert_eq!(value["to"], "111@s.whatsapp.net");
    }
}
