//! Session lifecycle against the messaging network.
//!
//! [`SessionManager`] owns exactly one logical session: it drives the
//! connection state machine (QR pairing, reconnection with a bounded retry
//! budget, terminal logout), converts transport events into inbound messages
//! for the dispatch pipeline, and exposes the outward API (`status`, `qr`,
//! `send_message`, `force_qr_regeneration`).
//!
//! The transport itself is a black box behind [`Transport`] /
//! [`TransportSession`]; [`sidecar::SidecarTransport`] is the production
//! implementation speaking JSON over WebSocket to a Baileys sidecar.

pub mod error;
pub mod manager;
pub mod qr;
pub mod sidecar;
pub mod transport;

pub use {
    error::{Error, Result},
    manager::{SendMessageResponse, SessionConfig, SessionManager, SessionStatus, StatusResponse},
    qr::{QrArtifact, QrRenderer},
    transport::{
        CloseReason, ConnectionPhase, RawMessage, Transport, TransportEvent, TransportSession,
        UpsertKind,
    },
};
