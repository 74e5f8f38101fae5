use {async_trait::async_trait, serde::Serialize};

use {charla_common::InboundMessage, charla_config::ClientConfig};

/// Classification metadata attached to a message before module execution.
#[derive(Debug, Clone, Serialize)]
pub struct MessageMetadata {
    /// First key of the raw payload object (e.g. `extendedTextMessage`,
    /// `imageMessage`), or `"unknown"`.
    pub message_type: String,
    /// Wall-clock time the pipeline picked the message up, in milliseconds.
    pub processed_at_ms: i64,
    pub has_media: bool,
}

/// Everything a module gets to see for one message. Assembled fresh per
/// dispatch, never persisted.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub message: InboundMessage,
    pub config: ClientConfig,
    pub metadata: MessageMetadata,
}

/// A pluggable message handler producing a reply string.
///
/// Implementations must be cheap to share (`Arc`) and must not assume they
/// run on the transport event loop; long work is fine here.
#[async_trait]
pub trait ChatbotModule: Send + Sync {
    /// Unique module name used for registration and activation.
    fn name(&self) -> &str;

    /// Produce the reply for one message.
    async fn execute(&self, ctx: &ModuleContext) -> anyhow::Result<String>;
}
