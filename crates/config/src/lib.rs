//! Per-client configuration: data model, persistent store contract, and the
//! TTL cache that fronts it.
//!
//! Every inbound message resolves its sender's [`ClientConfig`] through
//! [`ConfigCache`], which coalesces concurrent first-contact lookups into a
//! single store round-trip.

pub mod cache;
pub mod error;
pub mod store;
pub mod types;

pub use {
    cache::ConfigCache,
    error::{Error, Result},
    store::{ConfigStore, MemoryConfigStore},
    types::{ClientConfig, ClientSettings, DEFAULT_MODULE},
};
