use thiserror::Error;

/// Crate-wide result type for dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Sender identity does not match the network's addressing scheme.
    #[error("invalid sender identity: {sender}")]
    InvalidSender { sender: String },

    /// Message timestamp is older than the tolerance window.
    #[error("message timestamp {timestamp_ms} is outside the acceptable range (too old)")]
    StaleMessage { timestamp_ms: i64 },

    /// Message timestamp is further in the future than the tolerance window.
    #[error("message timestamp {timestamp_ms} is outside the acceptable range (in the future)")]
    FutureMessage { timestamp_ms: i64 },

    /// Config store was unavailable; the message is not dispatched.
    #[error(transparent)]
    ConfigResolution(#[from] charla_config::Error),

    /// Module selection or execution failed.
    #[error(transparent)]
    Module(#[from] charla_modules::Error),
}
