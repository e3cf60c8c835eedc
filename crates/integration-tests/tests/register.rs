mod harness;

use harness::client::McpClient;
use harness::server::TestRouter;
use harness::upstream::{MockUpstream, UpstreamSpec};

#[tokio::test]
async fn register_then_list_exposes_namespaced_tools() {
    let upstream = MockUpstream::start(UpstreamSpec {
        tools: vec!["add", "sub", "stats", "quote"],
        with_metrics: false,
    })
    .await
    .unwrap();
    let router = TestRouter::start().await.unwrap();

    let body = router.register("calc", &upstream.url()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["server"]["connected"], true);
    assert_eq!(body["stats"]["connectedServers"], 1);

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();
    let tools = client.list_tools().await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();

    assert!(names.contains(&"calc:add"));
    assert!(names.contains(&"calc:sub"));
    assert!(!names.contains(&"calc:stats"));
    assert!(!names.contains(&"calc:quote"));

    let add = tools.iter().find(|t| t.name.as_ref() == "calc:add").unwrap();
    assert!(
        add.description.as_deref().unwrap_or("").starts_with("[calc]"),
        "description should carry the server prefix"
    );

    // Control tools ride alongside the aggregated catalog
    assert!(names.contains(&"router:list-servers"));
    assert!(names.contains(&"router:reconnect-server"));

    client.close().await;
}

#[tokio::test]
async fn conflicting_url_for_live_name_is_rejected() {
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();
    let router = TestRouter::start().await.unwrap();

    router.register("a", &upstream.url()).await;

    let resp = router
        .client()
        .post(router.url("/register"))
        .json(&serde_json::json!({ "name": "a", "url": "http://other:1/mcp" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = resp.json().await.unwrap();
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("Name/URL conflict"));
    assert!(message.contains(&upstream.url()));
}

#[tokio::test]
async fn invalid_input_is_a_bad_request() {
    let router = TestRouter::start().await.unwrap();

    // Name breaks the allowed character class
    let resp = router
        .client()
        .post(router.url("/register"))
        .json(&serde_json::json!({ "name": "bad name", "url": "http://u:1/mcp" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // URL does not parse
    let resp = router
        .client()
        .post(router.url("/register"))
        .json(&serde_json::json!({ "name": "ok", "url": "not a url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn reregistering_same_name_and_url_is_not_a_conflict() {
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();
    let router = TestRouter::start().await.unwrap();

    router.register("calc", &upstream.url()).await;
    let body = router.register("calc", &upstream.url()).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["totalServers"], 1);
}

#[tokio::test]
async fn unregister_removes_tools_and_unknown_name_is_404() {
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();
    let router = TestRouter::start().await.unwrap();
    router.register("calc", &upstream.url()).await;

    let resp = router
        .client()
        .delete(router.url("/register/calc"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let removed: Vec<&str> = body["removedTools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(removed, vec!["calc:add", "calc:sub"]);

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();
    let tools = client.list_tools().await.unwrap();
    assert!(!tools.iter().any(|t| t.name.as_ref().starts_with("calc:")));
    client.close().await;

    let resp = router
        .client()
        .delete(router.url("/register/ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn register_unregister_register_round_trips() {
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();
    let router = TestRouter::start().await.unwrap();

    router.register("calc", &upstream.url()).await;
    router
        .client()
        .delete(router.url("/register/calc"))
        .send()
        .await
        .unwrap();
    let body = router.register("calc", &upstream.url()).await;

    assert_eq!(body["server"]["connected"], true);

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();
    let tools = client.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name.as_ref() == "calc:add"));
    client.close().await;
}
