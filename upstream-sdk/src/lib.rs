//! # Upstream SDK
//!
//! Resilient access to the two external dependencies of the VirtualEd
//! content gateway.
//!
//! This crate provides:
//!
//! - `TieredDataCache`: serves the published dataset from the remote store,
//!   the last good in-memory copy, or the bundled file, in that order
//! - `RetryingCompletionClient`: one chat reply per call, with transient
//!   upstream failures retried under exponential backoff
//! - A classified error model shared by both (`ServiceError`, `ErrorClass`)
//! - Environment-backed configuration (`DatasetConfig`, `CompletionConfig`)
//!
//! Both components return typed results and never render HTTP responses;
//! translating their errors for end users is the caller's job.

pub mod services;
pub use services::completion::{
    build_messages, ChatTurn, CompletionLimits, CompletionTransport, OpenAIChatTransport, RetryingCompletionClient,
    Role,
};
pub use services::dataset::{CachedDataset, DatasetSource, Provenance, Resolution, TieredDataCache};

pub mod error;
pub use error::{CompletionError, DatasetError, ErrorClass, ErrorContext, Result, ServiceError};

pub mod resilience;
pub use resilience::{RetryConfig, RetryExecutor, RetryFailure};

pub mod config;
pub use config::{CompletionConfig, ConfigProvider, DatasetConfig, ServiceConfig};

#[cfg(test)]
mod tests;
