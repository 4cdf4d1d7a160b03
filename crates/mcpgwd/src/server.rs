//! HTTP surface of the daemon

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use mcpgw_core::RequestContext;
use mcpgw_gateway::Gateway;
use serde_json::json;
use tower_http::trace::TraceLayer;

/// Build the daemon router
pub fn create_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", post(rpc))
        .route("/health", get(health).post(rpc))
        .route("/{*path}", post(rpc))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// JSON-RPC entry point. Always answers 200 with an envelope.
async fn rpc(
    State(gateway): State<Arc<Gateway>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let ctx = request_context(&uri, &headers);
    Json(gateway.handle_bytes(&body, &ctx).await)
}

/// Backend health; 503 when any backend is unhealthy
async fn health(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    let report = gateway.health_report().await;
    let healthy = report.iter().all(|b| b.healthy);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "generation": gateway.snapshot().generation(),
            "backends": report,
        })),
    )
}

fn request_context(uri: &Uri, headers: &HeaderMap) -> RequestContext {
    let mut ctx = RequestContext::new().with_path(uri.path());
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            ctx = ctx.with_header(name.as_str(), value);
        }
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use mcpgw_core::{
        BackendConfig, BackendTransport, GatewayConfig, JsonRpcRequest, JsonRpcResponse,
        RoutingStrategy,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    struct EchoTransport;

    #[async_trait]
    impl BackendTransport for EchoTransport {
        async fn forward(
            &self,
            backend: &BackendConfig,
            request: &JsonRpcRequest,
        ) -> JsonRpcResponse {
            JsonRpcResponse::success(request.id.clone(), json!({"backend": backend.name}))
        }

        async fn check_health(&self, backend: &BackendConfig) -> bool {
            backend.name != "sick"
        }
    }

    fn app(strategy: RoutingStrategy, names: &[&str]) -> Router {
        let mut config = GatewayConfig::default();
        config.backends = names
            .iter()
            .map(|n| BackendConfig::new(*n, format!("http://{}", n)))
            .collect();
        config.routing.strategy = strategy;
        for name in names {
            config
                .routing
                .rules
                .insert(name.to_string(), name.to_string());
        }
        create_router(Arc::new(Gateway::new(&config, Arc::new(EchoTransport))))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn rpc_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_path_prefix_reaches_backend() {
        let response = app(RoutingStrategy::Prefix, &["github", "fs"])
            .oneshot(rpc_request(
                "/fs/rpc",
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], json!(3));
        assert_eq!(body["result"]["backend"], json!("fs"));
    }

    #[tokio::test]
    async fn test_header_routing_through_http() {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("X-Target-MCP", "github")
            .body(Body::from(r#"{"jsonrpc":"2.0","id":"a","method":"tools/call"}"#))
            .unwrap();
        let response = app(RoutingStrategy::Header, &["github", "fs"])
            .oneshot(request)
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["result"]["backend"], json!("github"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_request() {
        let response = app(RoutingStrategy::Prefix, &["github"])
            .oneshot(rpc_request("/", "not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], json!(-32600));
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_health_reports_each_backend() {
        let response = app(RoutingStrategy::Prefix, &["github", "sick"])
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["status"], json!("degraded"));
        assert_eq!(body["backends"][0]["name"], json!("github"));
        assert_eq!(body["backends"][0]["healthy"], json!(true));
        assert_eq!(body["backends"][1]["healthy"], json!(false));
        assert!(body["backends"][1]["elapsedMs"].is_u64());
    }
}
