mod harness;

use harness::client::{McpClient, first_text};
use harness::server::TestRouter;
use harness::upstream::{MockUpstream, UpstreamSpec};

#[tokio::test]
async fn control_tools_are_filtered_but_stats_endpoint_reaches_them() {
    let upstream = MockUpstream::start(UpstreamSpec {
        tools: vec!["foo", "stats", "quote"],
        with_metrics: false,
    })
    .await
    .unwrap();
    let router = TestRouter::start().await.unwrap();
    router.register("x", &upstream.url()).await;

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();

    // Exactly x:foo in the aggregated namespace
    let tools = client.list_tools().await.unwrap();
    let aggregated: Vec<&str> = tools
        .iter()
        .map(|t| t.name.as_ref())
        .filter(|n| n.starts_with("x:"))
        .collect();
    assert_eq!(aggregated, vec!["x:foo"]);

    // The filtered stats tool stays reachable through /stats
    let stats: serde_json::Value = router
        .client()
        .get(router.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["x"]["calls"], 42);

    // Downstream calls to the filtered names are rejected
    let result = client
        .call_tool("x:stats", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(true));
    let text = first_text(&result).unwrap();
    assert!(text.contains("tool not found"), "got: {text}");

    client.close().await;
}

#[tokio::test]
async fn forwarded_call_returns_upstream_result() {
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();
    let router = TestRouter::start().await.unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();
    let result = client
        .call_tool("calc:add", serde_json::json!({ "a": 2, "b": 3 }))
        .await
        .unwrap();

    assert_ne!(result.is_error, Some(true));
    let payload: serde_json::Value =
        serde_json::from_str(&first_text(&result).unwrap()).unwrap();
    assert_eq!(payload["result"], 5.0);

    client.close().await;
}

#[tokio::test]
async fn internal_metrics_never_reach_downstream_clients() {
    let upstream = MockUpstream::start(UpstreamSpec {
        tools: vec!["add", "sub"],
        with_metrics: true,
    })
    .await
    .unwrap();
    let router = TestRouter::start().await.unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();
    let result = client
        .call_tool("calc:add", serde_json::json!({ "a": 1, "b": 1 }))
        .await
        .unwrap();

    let payload: serde_json::Value =
        serde_json::from_str(&first_text(&result).unwrap()).unwrap();
    assert_eq!(payload["result"], 2.0);
    assert!(payload.get("models_metrics").is_none());
    assert!(payload.get("modelsMetrics").is_none());

    client.close().await;
}

#[tokio::test]
async fn schema_violations_are_rejected_before_forwarding() {
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();
    let router = TestRouter::start().await.unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();
    let err = client
        .call_tool("calc:add", serde_json::json!({ "a": "two", "b": 3 }))
        .await;

    assert!(err.is_err(), "string where number is required must fail");
    client.close().await;
}

#[tokio::test]
async fn router_control_tools_answer() {
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();
    let router = TestRouter::start().await.unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();

    let result = client
        .call_tool("router:list-servers", serde_json::json!({}))
        .await
        .unwrap();
    let payload: serde_json::Value =
        serde_json::from_str(&first_text(&result).unwrap()).unwrap();
    assert_eq!(payload["servers"][0]["name"], "calc");
    assert_eq!(payload["servers"][0]["connected"], true);

    let result = client
        .call_tool("router:list-tools", serde_json::json!({}))
        .await
        .unwrap();
    let payload: serde_json::Value =
        serde_json::from_str(&first_text(&result).unwrap()).unwrap();
    let names: Vec<&str> = payload["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"calc:add"));

    client.close().await;
}

#[tokio::test]
async fn non_post_on_mcp_endpoint_is_405_with_mcp_error() {
    let router = TestRouter::start().await.unwrap();

    let resp = router
        .client()
        .get(router.mcp_url())
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 405);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["message"], "Method not allowed.");
    assert!(body["id"].is_null());
}

#[tokio::test]
async fn health_endpoint_reports_router_identity() {
    let router = TestRouter::start().await.unwrap();

    let body: serde_json::Value = router
        .client()
        .get(router.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["router"]["name"], "mcp-router");
    assert_eq!(body["stats"]["totalServers"], 0);
}
