//! Message types shared between the session and dispatch layers.

use serde::{Deserialize, Serialize};

/// Transport-assigned identity of a message, used for dedup and reply
/// correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    /// Chat/peer JID the message belongs to (e.g. `5215550001@s.whatsapp.net`).
    pub remote_jid: String,
    /// Whether this client sent the message itself.
    pub from_me: bool,
    /// Transport message id.
    pub id: String,
}

/// An inbound message after text extraction, ready for dispatch.
///
/// Built once by the session layer from a raw transport event and consumed
/// once by the dispatch pipeline; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Extracted plain text (body or media caption).
    pub text: String,
    /// Sender JID.
    pub sender: String,
    /// Transport timestamp in milliseconds since the epoch.
    pub timestamp_ms: i64,
    pub key: MessageKey,
    /// Raw message payload, opaque to everything but classification.
    pub payload: serde_json::Value,
}

/// Delivery acknowledgement returned by the transport on a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp_ms: i64,
}
