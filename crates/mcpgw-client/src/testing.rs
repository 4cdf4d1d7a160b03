//! Test utilities for forwarding and gateway tests
//!
//! Provides scripted JSON-RPC backends served by axum on ephemeral ports.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use mcpgw_core::BackendConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::Result;

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral localhost port
    pub async fn start(router: Router) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// What a scripted backend sends back
#[derive(Debug, Clone)]
pub enum MockReply {
    /// JSON body with the given status
    Json(StatusCode, Value),
    /// Raw text body with the given status
    Text(StatusCode, String),
    /// Status with extra headers and a JSON body
    WithHeaders(StatusCode, Vec<(String, String)>, Value),
    /// Wait, then send the inner reply
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    /// 200 with a result envelope answering `request`
    pub fn result(request: &Value, result: Value) -> Self {
        MockReply::Json(
            StatusCode::OK,
            json!({"jsonrpc": "2.0", "id": request["id"].clone(), "result": result}),
        )
    }

    /// 200 with an error envelope answering `request`
    pub fn error(request: &Value, code: i64, message: &str) -> Self {
        MockReply::Json(
            StatusCode::OK,
            json!({
                "jsonrpc": "2.0",
                "id": request["id"].clone(),
                "error": {"code": code, "message": message}
            }),
        )
    }

    /// Bare HTTP status with a small JSON body
    pub fn status(status: StatusCode) -> Self {
        MockReply::Json(status, json!({"error": status.as_str()}))
    }

    /// Delay this reply
    pub fn after(self, delay: Duration) -> Self {
        MockReply::Delayed(delay, Box::new(self))
    }

    async fn render(self) -> Response {
        let mut reply = self;
        while let MockReply::Delayed(delay, inner) = reply {
            tokio::time::sleep(delay).await;
            reply = *inner;
        }

        match reply {
            MockReply::Json(status, body) => (status, axum::Json(body)).into_response(),
            MockReply::Text(status, body) => (status, body).into_response(),
            MockReply::WithHeaders(status, headers, body) => {
                let mut response = (status, axum::Json(body)).into_response();
                for (name, value) in headers {
                    if let (Ok(name), Ok(value)) = (
                        axum::http::HeaderName::from_bytes(name.as_bytes()),
                        axum::http::HeaderValue::from_str(&value),
                    ) {
                        response.headers_mut().insert(name, value);
                    }
                }
                response
            }
            MockReply::Delayed(..) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

type Handler = dyn Fn(&Value, usize) -> MockReply + Send + Sync;

#[derive(Clone)]
struct MockState {
    handler: Arc<Handler>,
    received: Arc<Mutex<Vec<Value>>>,
    health_status: Arc<AtomicU16>,
}

/// A scripted JSON-RPC backend.
///
/// The handler receives each request body and its zero-based call index.
/// `GET /health` answers with a configurable status (200 by default).
pub struct MockBackend {
    server: TestServer,
    received: Arc<Mutex<Vec<Value>>>,
    health_status: Arc<AtomicU16>,
}

impl MockBackend {
    /// Start a backend driven by `handler`
    pub async fn start<F>(handler: F) -> Result<Self>
    where
        F: Fn(&Value, usize) -> MockReply + Send + Sync + 'static,
    {
        let received = Arc::new(Mutex::new(Vec::new()));
        let health_status = Arc::new(AtomicU16::new(StatusCode::OK.as_u16()));
        let state = MockState {
            handler: Arc::new(handler),
            received: received.clone(),
            health_status: health_status.clone(),
        };

        let router = Router::new()
            .route("/", post(handle_rpc))
            .route("/health", get(handle_health))
            .with_state(state);

        let server = TestServer::start(router).await?;
        Ok(Self {
            server,
            received,
            health_status,
        })
    }

    /// Backend that lists `tools` under `tools/list` and echoes any other call
    pub async fn with_tools(tools: &[&str]) -> Result<Self> {
        let listing: Vec<Value> = tools
            .iter()
            .map(|name| json!({"name": name, "description": format!("{} tool", name)}))
            .collect();
        Self::start(move |req, _| match req["method"].as_str() {
            Some("tools/list") => MockReply::result(req, json!({"tools": listing.clone()})),
            Some(method) => MockReply::result(
                req,
                json!({"echo": method, "params": req["params"].clone()}),
            ),
            None => MockReply::status(StatusCode::BAD_REQUEST),
        })
        .await
    }

    /// Base URL
    pub fn url(&self) -> String {
        self.server.base_url()
    }

    /// Descriptor for this backend with fast test timings
    pub fn config(&self, name: &str) -> BackendConfig {
        BackendConfig::new(name, self.url())
            .with_timeout_ms(2_000)
            .with_max_retries(2)
    }

    /// Change the status returned by `GET /health`
    pub fn set_health(&self, status: StatusCode) {
        self.health_status.store(status.as_u16(), Ordering::SeqCst);
    }

    /// Number of JSON-RPC requests received
    pub fn request_count(&self) -> usize {
        self.received.lock().len()
    }

    /// All request bodies received, in order
    pub fn requests(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Stop serving
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

async fn handle_rpc(State(state): State<MockState>, body: Bytes) -> Response {
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let index = {
        let mut received = state.received.lock();
        received.push(request.clone());
        received.len() - 1
    };
    (state.handler)(&request, index).render().await
}

async fn handle_health(State(state): State<MockState>) -> StatusCode {
    StatusCode::from_u16(state.health_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// URL of a localhost port nothing is listening on
pub async fn unused_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn base_url_reaches_the_bound_listener() {
        let server = TestServer::start(Router::new().route("/ping", get(|| async { "pong" })))
            .await
            .unwrap();
        let url = server.base_url();
        assert!(url.starts_with("http://127.0.0.1:"));
        assert_ne!(server.addr.port(), 0);

        let body = reqwest::get(format!("{}/ping", url))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");
        server.shutdown().await;
    }

    #[test]
    fn result_reply_echoes_id() {
        let req = json!({"jsonrpc": "2.0", "id": "x-1", "method": "ping"});
        match MockReply::result(&req, json!(true)) {
            MockReply::Json(status, body) => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body["id"], json!("x-1"));
                assert_eq!(body["result"], json!(true));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
