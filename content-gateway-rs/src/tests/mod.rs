//! Route tests for the gateway
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`;
//! upstream sources and the completion transport are in-memory fakes.

pub mod routes_tests;
