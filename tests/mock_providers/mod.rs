//! Mock servers for integration tests
//!
//! - WebSocket Live API server driven by per-connection scripts
//! - Credential endpoint built on wiremock lives in the test files themselves

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

pub mod live_mock;
