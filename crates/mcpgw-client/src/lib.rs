//! mcpgw-client - HTTP delivery of JSON-RPC envelopes to gateway backends
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpgw_client::RequestForwarder;
//! use mcpgw_core::{BackendConfig, JsonRpcRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let forwarder = RequestForwarder::new()?;
//!     let backend = BackendConfig::new("github", "http://localhost:4001");
//!
//!     let request = JsonRpcRequest::new("tools/list", None, 1);
//!     let response = forwarder.forward(&backend, &request).await;
//!     println!("{}", serde_json::to_string(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides scripted backends:
//!
//! ```rust,ignore
//! use mcpgw_client::testing::MockBackend;
//!
//! let backend = MockBackend::with_tools(&["search", "fetch"]).await?;
//! let config = backend.config("github");
//! ```

mod error;
mod forwarder;
pub mod testing;

pub use error::{ClientError, Result};
pub use forwarder::RequestForwarder;
