//! Integration-style tests for the SDK
//!
//! Component tests drive the cache and the completion client through
//! scripted sources and transports; the `*_mock_tests` modules run the
//! real HTTP paths against WireMock.
