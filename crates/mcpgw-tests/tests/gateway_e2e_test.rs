//! End-to-end tests for request routing and forwarding
//!
//! Each test starts scripted HTTP backends, builds a gateway from TOML
//! configuration, and drives it with inbound envelopes.

use std::io::Write;
use std::time::Duration;

use axum::http::StatusCode;
use mcpgw_client::testing::{unused_url, MockBackend, MockReply};
use mcpgw_core::{GatewayConfig, RequestContext};
use mcpgw_gateway::Gateway;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn config_toml(strategy: &str, backends: &[(&str, String)], default: Option<&str>) -> String {
    let mut toml = String::from("[forwarding]\nbase_delay_ms = 5\n\n");
    for (name, url) in backends {
        toml.push_str(&format!(
            "[[backends]]\nname = \"{}\"\nurl = \"{}\"\ntimeout_ms = 1000\nmax_retries = 2\n\n",
            name, url
        ));
    }
    toml.push_str(&format!("[routing]\nstrategy = \"{}\"\n", strategy));
    if let Some(default) = default {
        toml.push_str(&format!("default_backend = \"{}\"\n", default));
    }
    toml.push_str("\n[routing.rules]\n");
    for (name, _) in backends {
        toml.push_str(&format!("{} = \"{}\"\n", name, name));
    }
    toml
}

fn gateway(toml: &str) -> Gateway {
    let config = GatewayConfig::from_toml_str(toml).unwrap();
    Gateway::from_config(&config).unwrap()
}

fn call(id: Value, method: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": {"q": "rust"}})
}

#[tokio::test]
async fn test_prefix_routing_reaches_the_right_backend() {
    let github = MockBackend::with_tools(&["search"]).await.unwrap();
    let fs = MockBackend::with_tools(&["read"]).await.unwrap();
    let gw = gateway(&config_toml(
        "prefix",
        &[("github", github.url()), ("fs", fs.url())],
        None,
    ));

    let ctx = RequestContext::new().with_path("/github/rpc");
    let reply = gw.handle(call(json!(1), "tools/call"), &ctx).await;

    assert_eq!(reply.id, json!(1));
    assert_eq!(reply.result().unwrap()["echo"], json!("tools/call"));
    assert_eq!(reply.result().unwrap()["params"], json!({"q": "rust"}));
    assert_eq!(github.request_count(), 1);
    assert_eq!(fs.request_count(), 0);
}

#[tokio::test]
async fn test_header_routing_and_default_backend() {
    let github = MockBackend::with_tools(&[]).await.unwrap();
    let fs = MockBackend::with_tools(&[]).await.unwrap();
    let gw = gateway(&config_toml(
        "header",
        &[("github", github.url()), ("fs", fs.url())],
        Some("fs"),
    ));

    let targeted = RequestContext::new().with_header("X-Target-MCP", "github");
    gw.handle(call(json!("a"), "tools/call"), &targeted).await;
    let untargeted = RequestContext::new().with_header("x-target-mcp", "");
    gw.handle(call(json!("b"), "tools/call"), &untargeted).await;

    assert_eq!(github.requests()[0]["id"], json!("a"));
    assert_eq!(fs.requests()[0]["id"], json!("b"));
}

#[tokio::test]
async fn test_flaky_backend_recovers_with_same_id() {
    let flaky = MockBackend::start(|req, index| {
        if index == 0 {
            MockReply::status(StatusCode::SERVICE_UNAVAILABLE)
        } else {
            MockReply::result(req, json!({"attempt": index}))
        }
    })
    .await
    .unwrap();
    let gw = gateway(&config_toml("prefix", &[("flaky", flaky.url())], Some("flaky")));

    let reply = gw
        .handle(call(json!(77), "tools/call"), &RequestContext::new())
        .await;

    assert_eq!(reply.result().unwrap()["attempt"], json!(1));
    let ids: Vec<Value> = flaky.requests().iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!(77), json!(77)]);
}

#[tokio::test]
async fn test_unreachable_backend_reports_attempts() {
    let url = unused_url().await.unwrap();
    let gw = gateway(&config_toml("prefix", &[("down", url.clone())], Some("down")));

    let reply = gw
        .handle(call(json!(5), "tools/call"), &RequestContext::new())
        .await;

    let error = reply.error().unwrap();
    assert_eq!(error.code, -32603);
    let data = error.data.as_ref().unwrap();
    assert_eq!(data["address"], json!(url));
    assert_eq!(data["attempts"], json!(3));
}

#[tokio::test]
async fn test_client_errors_surface_without_retry() {
    let strict = MockBackend::start(|_, _| {
        MockReply::Json(
            StatusCode::FORBIDDEN,
            json!({"error": "forbidden", "token": "ghp_secret"}),
        )
    })
    .await
    .unwrap();
    let gw = gateway(&config_toml("prefix", &[("strict", strict.url())], Some("strict")));

    let reply = gw
        .handle(call(json!(6), "tools/call"), &RequestContext::new())
        .await;

    let error = reply.error().unwrap();
    assert_eq!(error.code, -32602);
    let data = error.data.as_ref().unwrap();
    assert_eq!(data["statusCode"], json!(403));
    assert_eq!(data["upstream"]["token"], json!("[REDACTED]"));
    assert_eq!(data["upstream"]["error"], json!("forbidden"));
    assert_eq!(strict.request_count(), 1);
}

#[tokio::test]
async fn test_routing_failures_are_distinct() {
    let github = MockBackend::with_tools(&[]).await.unwrap();
    let mut toml = config_toml("prefix", &[("github", github.url())], None);
    toml.push_str("ghost = \"nowhere\"\n");
    let gw = gateway(&toml);

    let no_route = gw
        .handle(call(json!(1), "tools/call"), &RequestContext::new().with_path("/other"))
        .await;
    assert_eq!(no_route.error().unwrap().message, "No route found");

    let missing = gw
        .handle(call(json!(2), "tools/call"), &RequestContext::new().with_path("/ghost"))
        .await;
    assert!(missing.error().unwrap().message.starts_with("Server not found"));
    assert_eq!(missing.error().unwrap().code, -32601);
    assert_eq!(github.request_count(), 0);
}

#[tokio::test]
async fn test_reload_from_file_switches_backends() {
    let old = MockBackend::with_tools(&[]).await.unwrap();
    let new = MockBackend::with_tools(&[]).await.unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config_toml("prefix", &[("svc", old.url())], Some("svc")).as_bytes())
        .unwrap();
    let config = GatewayConfig::load(file.path()).unwrap();
    let gw = Gateway::from_config(&config).unwrap();

    gw.handle(call(json!(1), "tools/call"), &RequestContext::new())
        .await;

    let reloaded = GatewayConfig::from_toml_str(&config_toml(
        "prefix",
        &[("svc", new.url())],
        Some("svc"),
    ))
    .unwrap();
    assert_eq!(gw.reload(&reloaded).unwrap(), 1);

    gw.handle(call(json!(2), "tools/call"), &RequestContext::new())
        .await;

    assert_eq!(old.request_count(), 1);
    assert_eq!(new.request_count(), 1);
}

#[tokio::test]
async fn test_health_report_over_http() {
    let up = MockBackend::with_tools(&[]).await.unwrap();
    let sick = MockBackend::with_tools(&[]).await.unwrap();
    sick.set_health(StatusCode::INTERNAL_SERVER_ERROR);
    let gw = gateway(&config_toml(
        "prefix",
        &[("up", up.url()), ("sick", sick.url())],
        None,
    ));

    let report = gw.health_report().await;
    let status: Vec<(&str, bool)> = report
        .iter()
        .map(|b| (b.name.as_str(), b.healthy))
        .collect();
    assert_eq!(status, vec![("up", true), ("sick", false)]);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let slow = MockBackend::start(|req, _| {
        MockReply::result(req, json!("late")).after(Duration::from_millis(500))
    })
    .await
    .unwrap();
    let mut toml = config_toml("prefix", &[("slow", slow.url())], Some("slow"));
    toml = toml.replace("timeout_ms = 1000", "timeout_ms = 50");
    let gw = gateway(&toml);

    let reply = gw
        .handle(call(json!(9), "tools/call"), &RequestContext::new())
        .await;

    let error = reply.error().unwrap();
    assert_eq!(error.code, -32603);
    assert_eq!(error.data.as_ref().unwrap()["type"], json!("TimeoutError"));
    assert_eq!(slow.request_count(), 3);
}
