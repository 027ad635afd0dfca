//! Resilience patterns for upstream clients
//!
//! Only bounded retry lives here; the dataset cache carries its own tiered
//! fallback in `services::dataset`.

mod retry;

pub use retry::{RetryConfig, RetryExecutor, RetryFailure};
