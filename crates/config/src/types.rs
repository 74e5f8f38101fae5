use serde::{Deserialize, Serialize};

/// Module activated for every newly created client config.
pub const DEFAULT_MODULE: &str = "support";

/// Per-client settings persisted in the config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub language: String,
    pub timezone: String,
    /// Ordered set of module names enabled for this client. The first entry
    /// is the client's default module.
    pub active_modules: Vec<String>,
}

/// Configuration for a single sender, keyed by the bare phone number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    pub settings: ClientSettings,
}

impl ClientConfig {
    /// Default configuration created on first contact with a sender.
    ///
    /// `active_modules` is never empty after creation.
    #[must_use]
    pub fn default_for(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            settings: ClientSettings {
                language: "es".into(),
                timezone: "UTC".into(),
                active_modules: vec![DEFAULT_MODULE.into()],
            },
        }
    }
}
