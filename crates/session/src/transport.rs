//! Black-box transport contract for the messaging network.

use std::path::Path;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use charla_common::{MessageKey, SendReceipt};

use crate::Result;

/// Connection phase reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Open,
    Close,
}

/// Why the transport closed the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// User-initiated unpairing; credentials are invalid and reconnecting
    /// would loop forever re-requesting QR codes.
    LoggedOut,
    /// Anything else (network blip, server restart); safe to reconnect.
    Other(String),
}

/// Upsert category for inbound message batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    /// Live notification; the only kind the bot reacts to.
    Notify,
    /// History sync / append; ignored.
    Append,
}

/// One raw message as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub key: MessageKey,
    /// Opaque message payload; `None` for reaction-like events.
    pub payload: Option<serde_json::Value>,
    pub timestamp_ms: i64,
}

impl RawMessage {
    /// Extract user-facing text from the payload: the first payload key's
    /// content object is checked for a `text` body, then a media `caption`;
    /// first non-empty wins. "First" is wire order (serde_json is built with
    /// `preserve_order`). Many payloads carry no text at all, and that is
    /// not an error.
    #[must_use]
    pub fn text_content(&self) -> Option<String> {
        let content = self
            .payload
            .as_ref()?
            .as_object()?
            .values()
            .next()?
            .as_object()?;
        ["text", "caption"]
            .iter()
            .filter_map(|field| content.get(*field).and_then(|v| v.as_str()))
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Low-level event emitted by a transport session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ConnectionUpdate {
        status: Option<ConnectionPhase>,
        qr: Option<String>,
        close_reason: Option<CloseReason>,
    },
    /// Auth material changed; persistence is the transport's concern.
    CredentialsUpdate,
    MessageUpsert {
        messages: Vec<RawMessage>,
        kind: UpsertKind,
    },
}

/// Factory for transport sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new session using auth state stored under `auth_dir`.
    async fn connect(&self, auth_dir: &Path) -> Result<std::sync::Arc<dyn TransportSession>>;
}

/// An open session. Events are delivered serialized over a single channel.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Take the event receiver. Single consumer; returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;

    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt>;

    /// Tear the session down.
    async fn end(&self) -> Result<()>;
}
