use std::{collections::HashMap, sync::Arc};

use tracing::{debug, warn};

use charla_config::ClientConfig;

use crate::{
    Result,
    error::Error,
    module::{ChatbotModule, ModuleContext},
};

/// Registry of all loaded chatbot modules.
///
/// Registration happens once at startup; there is no deregistration. Module
/// names are unique.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn ChatbotModule>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its own name.
    ///
    /// Fails with [`Error::DuplicateModule`] if the name is taken; the
    /// original registration stays intact.
    pub fn register(&mut self, module: Arc<dyn ChatbotModule>) -> Result<()> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return Err(Error::duplicate(name));
        }
        debug!(module = %name, "module registered");
        self.modules.insert(name, module);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ChatbotModule>> {
        self.modules.get(name)
    }

    pub fn list(&self) -> Vec<&str> {
        self.modules.keys().map(|s| s.as_str()).collect()
    }

    /// Whether a module is enabled for this client.
    ///
    /// An empty activation list means nothing is active (fail closed); that
    /// is a configuration smell, so it logs a warning rather than raising.
    pub fn is_active(&self, name: &str, config: &ClientConfig) -> bool {
        let active = &config.settings.active_modules;
        if active.is_empty() {
            warn!(client_id = %config.client_id, "no active modules configured for client");
            return false;
        }
        active.iter().any(|m| m == name)
    }

    /// Execute a module against a dispatch context.
    ///
    /// Module failures are wrapped as [`Error::ExecutionFailed`] with the
    /// original cause preserved; nothing here retries.
    pub async fn execute(&self, name: &str, ctx: &ModuleContext) -> Result<String> {
        let module = self.modules.get(name).ok_or_else(|| Error::not_found(name))?;

        if !self.is_active(name, &ctx.config) {
            return Err(Error::not_active(name));
        }

        debug!(module = name, client_id = %ctx.config.client_id, "executing module");
        module
            .execute(ctx)
            .await
            .map_err(|source| Error::ExecutionFailed {
                module: name.to_string(),
                source,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        async_trait::async_trait,
        charla_common::{InboundMessage, MessageKey},
    };

    use super::*;
    use crate::module::MessageMetadata;

    struct EchoModule;

    #[async_trait]
    impl ChatbotModule for EchoModule {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, ctx: &ModuleContext) -> anyhow::Result<String> {
            Ok(format!("echo: {}", ctx.message.text))
        }
    }

    struct BrokenModule;

    #[async_trait]
    impl ChatbotModule for BrokenModule {
        fn name(&self) -> &str {
            "broken"
        }

        async fn execute(&self, _ctx: &ModuleContext) -> anyhow::Result<String> {
            anyhow::bail!("response table missing")
        }
    }

    fn context(text: &str, active: &[&str]) -> ModuleContext {
        let mut config = ClientConfig::default_for("111");
        config.settings.active_modules = active.iter().map(|s| s.to_string()).collect();
        ModuleContext {
            message: InboundMessage {
                text: text.into(),
                sender: "111@s.whatsapp.net".into(),
                timestamp_ms: 0,
                key: MessageKey {
                    remote_jid: "111@s.whatsapp.net".into(),
                    from_me: false,
                    id: "ABC".into(),
                },
                payload: serde_json::json!({}),
            },
            config,
            metadata: MessageMetadata {
                message_type: "conversation".into(),
                processed_at_ms: 0,
                has_media: false,
            },
        }
    }

    #[test]
    fn duplicate_registration_fails_and_keeps_original() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(EchoModule)).unwrap();

        let err = registry.register(Arc::new(EchoModule)).unwrap_err();
        assert!(matches!(err, Error::DuplicateModule { .. }));
        assert!(registry.get("echo").is_some());
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn executes_active_module() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(EchoModule)).unwrap();

        let reply = registry.execute("echo", &context("hola", &["echo"])).await.unwrap();
        assert_eq!(reply, "echo: hola");
    }

    #[tokio::test]
    async fn unknown_module_fails() {
        let registry = ModuleRegistry::new();
        let err = registry
            .execute("missing", &context("hola", &["missing"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { .. }));
    }

    #[tokio::test]
    async fn inactive_module_fails_closed() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(EchoModule)).unwrap();

        let err = registry
            .execute("echo", &context("hola", &["other"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModuleNotActive { .. }));

        // Empty activation list is treated the same way.
        let err = registry.execute("echo", &context("hola", &[])).await.unwrap_err();
        assert!(matches!(err, Error::ModuleNotActive { .. }));
    }

    #[tokio::test]
    async fn module_failure_is_wrapped_with_cause() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(BrokenModule)).unwrap();

        let err = registry
            .execute("broken", &context("hola", &["broken"]))
            .await
            .unwrap_err();
        match err {
            Error::ExecutionFailed { module, source } => {
                assert_eq!(module, "broken");
                assert!(source.to_string().contains("response table missing"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
