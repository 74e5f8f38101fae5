//! Built-in support module: canned, localized responses keyed by keyword.

use async_trait::async_trait;

use crate::module::{ChatbotModule, ModuleContext};

/// Canned-response support module, active by default for new clients.
///
/// Looks the normalized message text up in a per-language response table and
/// falls back to a language-specific default when nothing matches.
pub struct SupportModule;

impl SupportModule {
    fn respond(language: &str, text: &str) -> &'static str {
        match language {
            "en" => Self::respond_en(text),
            _ => Self::respond_es(text),
        }
    }

    fn respond_es(text: &str) -> &'static str {
        match text {
            "ayuda" => {
                "¿En qué puedo ayudarte? Puedes preguntarme sobre:\n\
                 1. 📦 Productos\n\
                 2. 🛠️ Servicios\n\
                 3. 🕒 Horarios\n\
                 4. 📞 Contacto\n\
                 5. 📋 Estado de pedido"
            },
            "productos" => {
                "🛍️ Nuestros productos principales son:\n\
                 1. Producto A - $100\n\
                 2. Producto B - $200\n\
                 3. Producto C - $300\n\n\
                 Para más detalles sobre un producto específico, escribe su nombre."
            },
            "servicios" => {
                "🔧 Ofrecemos los siguientes servicios:\n\
                 1. Servicio de instalación\n\
                 2. Mantenimiento preventivo\n\
                 3. Soporte técnico\n\
                 4. Consultoría\n\n\
                 Para más información sobre un servicio, escribe su nombre."
            },
            "horarios" => {
                "🕒 Nuestros horarios de atención son:\n\
                 Lunes a Viernes: 9:00 AM - 6:00 PM\n\
                 Sábados: 10:00 AM - 2:00 PM\n\
                 Domingos: Cerrado"
            },
            "contacto" => {
                "📞 Puedes contactarnos a través de:\n\
                 Teléfono: +1234567890\n\
                 Email: soporte@empresa.com\n\
                 Dirección: Calle Principal #123"
            },
            _ => {
                "Lo siento, no entiendo tu consulta. Escribe \"ayuda\" para ver las \
                 opciones disponibles."
            },
        }
    }

    fn respond_en(text: &str) -> &'static str {
        match text {
            "help" => {
                "How can I help you? You can ask me about:\n\
                 1. 📦 Products\n\
                 2. 🛠️ Services\n\
                 3. 🕒 Hours\n\
                 4. 📞 Contact\n\
                 5. 📋 Order Status"
            },
            "products" => {
                "🛍️ Our main products are:\n\
                 1. Product A - $100\n\
                 2. Product B - $200\n\
                 3. Product C - $300\n\n\
                 For more details about a specific product, type its name."
            },
            "services" => {
                "🔧 We offer the following services:\n\
                 1. Installation service\n\
                 2. Preventive maintenance\n\
                 3. Technical support\n\
                 4. Consulting\n\n\
                 For more information about a service, type its name."
            },
            "hours" => {
                "🕒 Our business hours are:\n\
                 Monday to Friday: 9:00 AM - 6:00 PM\n\
                 Saturday: 10:00 AM - 2:00 PM\n\
                 Sunday: Closed"
            },
            "contact" => {
                "📞 You can contact us through:\n\
                 Phone: +1234567890\n\
                 Email: support@company.com\n\
                 Address: Main Street #123"
            },
            _ => "Sorry, I don't understand your query. Type \"help\" to see available options.",
        }
    }
}

#[async_trait]
impl ChatbotModule for SupportModule {
    fn name(&self) -> &str {
        "support"
    }

    async fn execute(&self, ctx: &ModuleContext) -> anyhow::Result<String> {
        let language = ctx.config.settings.language.as_str();
        let normalized = ctx.message.text.to_lowercase();
        let normalized = normalized.trim();
        Ok(Self::respond(language, normalized).to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        charla_common::{InboundMessage, MessageKey},
        charla_config::ClientConfig,
    };

    use super::*;
    use crate::module::MessageMetadata;

    fn context(text: &str, language: &str) -> ModuleContext {
        let mut config = ClientConfig::default_for("111");
        config.settings.language = language.into();
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

    #[tokio::test]
    async fn ayuda_returns_spanish_help_menu() {
        let reply = SupportModule.execute(&context("ayuda", "es")).await.unwrap();
        assert!(reply.starts_with("¿En qué puedo ayudarte?"));
    }

    #[tokio::test]
    async fn lookup_is_normalized() {
        let reply = SupportModule
            .execute(&context("  AYUDA  ", "es"))
            .await
            .unwrap();
        assert!(reply.starts_with("¿En qué puedo ayudarte?"));
    }

    #[tokio::test]
    async fn unknown_keyword_falls_back_per_language() {
        let es = SupportModule
            .execute(&context("qwerty", "es"))
            .await
            .unwrap();
        assert!(es.contains("\"ayuda\""));

        let en = SupportModule
            .execute(&context("qwerty", "en"))
            .await
            .unwrap();
        assert!(en.contains("\"help\""));
    }

    #[tokio::test]
    async fn english_table_is_used_for_en_clients() {
        let reply = SupportModule.execute(&context("help", "en")).await.unwrap();
        assert!(reply.starts_with("How can I help you?"));
    }

    #[tokio::test]
    async fn unsupported_language_falls_back_to_spanish() {
        let reply = SupportModule.execute(&context("ayuda", "fr")).await.unwrap();
        assert!(reply.starts_with("¿En qué puedo ayudarte?"));
    }
}
