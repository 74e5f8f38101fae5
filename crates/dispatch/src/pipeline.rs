use std::{sync::Arc, time::Duration};

use {
    once_cell::sync::Lazy,
    regex::Regex,
    tracing::{debug, warn},
};

use {
    charla_common::InboundMessage,
    charla_config::ConfigCache,
    charla_modules::{MessageMetadata, ModuleContext, ModuleRegistry},
};

use crate::{Result, error::Error};

/// WhatsApp user JIDs: bare number plus the user-server suffix.
static SENDER_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // pattern is a literal
    Regex::new(r"^[0-9]+@s\.whatsapp\.net$").unwrap()
});

/// Payload keys that carry media.
const MEDIA_TYPES: &[&str] = &[
    "imageMessage",
    "videoMessage",
    "audioMessage",
    "documentMessage",
];

const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Result of a successful dispatch: the reply text and the module that
/// produced it.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub reply: String,
    pub module: String,
}

/// Validates, classifies, and routes one inbound message to exactly one
/// module.
///
/// Every step is fail-fast; errors are returned to the caller (the session
/// layer), which decides whether to suppress them. The pipeline itself never
/// sends a reply and never retries.
pub struct DispatchPipeline {
    cache: Arc<ConfigCache>,
    registry: Arc<ModuleRegistry>,
    timestamp_tolerance: Duration,
}

impl DispatchPipeline {
    #[must_use]
    pub fn new(cache: Arc<ConfigCache>, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            cache,
            registry,
            timestamp_tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
        }
    }

    /// Override the ±5 minute timestamp tolerance window.
    #[must_use]
    pub fn with_timestamp_tolerance(mut self, tolerance: Duration) -> Self {
        self.timestamp_tolerance = tolerance;
        self
    }

    /// Run the full pipeline for one message.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<DispatchOutcome> {
        validate_sender(&message.sender)?;
        self.validate_timestamp(message.timestamp_ms)?;

        let client_id = client_id_from_sender(&message.sender);
        let config = self.cache.get(client_id).await?;

        let metadata = MessageMetadata {
            message_type: message_type(&message.payload),
            processed_at_ms: chrono::Utc::now().timestamp_millis(),
            has_media: has_media(&message.payload),
        };

        // Single fixed default module per client: the first active entry.
        // Per-message intent routing is deliberately not supported here.
        let module = match config.settings.active_modules.first() {
            Some(name) => name.clone(),
            None => {
                warn!(client_id, "client has no active modules");
                return Err(charla_modules::Error::not_active("<none>").into());
            },
        };

        debug!(
            client_id,
            module,
            message_type = %metadata.message_type,
            "dispatching message"
        );

        let ctx = ModuleContext {
            message: message.clone(),
            config,
            metadata,
        };
        let reply = self.registry.execute(&module, &ctx).await?;

        Ok(DispatchOutcome { reply, module })
    }

    fn validate_timestamp(&self, timestamp_ms: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let tolerance = self.timestamp_tolerance.as_millis() as i64;
        if timestamp_ms < now - tolerance {
            return Err(Error::StaleMessage { timestamp_ms });
        }
        if timestamp_ms > now + tolerance {
            return Err(Error::FutureMessage { timestamp_ms });
        }
        Ok(())
    }
}

fn validate_sender(sender: &str) -> Result<()> {
    if SENDER_RE.is_match(sender) {
        Ok(())
    } else {
        Err(Error::InvalidSender {
            sender: sender.to_string(),
        })
    }
}

/// Strip the network suffix: `5215550001@s.whatsapp.net` → `5215550001`.
fn client_id_from_sender(sender: &str) -> &str {
    sender.split('@').next().unwrap_or(sender)
}

/// Message type is the first key of the payload object.
fn message_type(payload: &serde_json::Value) -> String {
    payload
        .as_object()
        .and_then(|obj| obj.keys().next())
        .cloned()
        .unwrap_or_else(|| "unknown".to_string())
}

fn has_media(payload: &serde_json::Value) -> bool {
    payload
        .as_object()
        .map(|obj| MEDIA_TYPES.iter().any(|t| obj.contains_key(*t)))
        .unwrap_or(false)
}
