//! Upstream clients
//!
//! - `dataset`: the tiered cache in front of the published dataset
//! - `completion`: the chat completion client with bounded retries

pub mod completion;
pub mod dataset;
mod common;

pub use common::{build_http_client, UserAgent};
