//! Message dispatch pipeline.
//!
//! Turns one validated [`charla_common::InboundMessage`] into exactly one
//! module invocation: sender and timestamp validation, config resolution
//! through the cache, payload classification, and module selection.

pub mod error;
pub mod pipeline;

pub use {
    error::{Error, Result},
    pipeline::{DispatchOutcome, DispatchPipeline},
};
