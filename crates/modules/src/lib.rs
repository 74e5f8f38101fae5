//! Chatbot module system.
//!
//! A module is a pluggable handler that turns a classified inbound message
//! into a reply string. Modules implement the [`ChatbotModule`] trait and are
//! registered by name in the [`ModuleRegistry`] at startup; per-client
//! activation is gated by the client's `active_modules` list.

pub mod error;
pub mod module;
pub mod registry;
pub mod support;

pub use {
    error::{Error, Result},
    module::{ChatbotModule, MessageMetadata, ModuleContext},
    registry::ModuleRegistry,
    support::SupportModule,
};
