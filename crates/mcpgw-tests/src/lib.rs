//! Integration tests for the MCP gateway
//!
//! These tests run the gateway against real HTTP backends served by
//! `mcpgw_client::testing::MockBackend` on ephemeral localhost ports. No
//! external services are needed.
//!
//! # Test Structure
//!
//! - `gateway_e2e_test.rs` - routing, forwarding and retries through the gateway
//! - `discovery_e2e_test.rs` - discovery aggregation across backends

// This crate only contains tests, no library code
