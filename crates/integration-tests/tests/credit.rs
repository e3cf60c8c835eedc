mod harness;

use secrecy::SecretString;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harness::client::{McpClient, first_text};
use harness::server::TestRouter;
use harness::upstream::{MockUpstream, UpstreamSpec};
use relay_config::{Config, CreditConfig};

fn credit_config(api_url: &str) -> Config {
    let mut config = Config::default();
    config.credit = Some(CreditConfig {
        api_url: url::Url::parse(api_url).unwrap(),
        api_key: SecretString::from("admin-key".to_owned()),
    });
    config
}

#[tokio::test]
async fn quota_denial_blocks_the_call_and_skips_tracking() {
    let billing = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/usage/quota"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "allowed": false,
            "remainingDaily": 0,
            "remainingMonthly": 50
        })))
        .expect(1)
        .mount(&billing)
        .await;

    // A denied call must never be tracked
    Mock::given(method("POST"))
        .and(path("/usage/track"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&billing)
        .await;

    let upstream = MockUpstream::start(UpstreamSpec {
        tools: vec!["add", "sub", "quote"],
        with_metrics: false,
    })
    .await
    .unwrap();

    let router = TestRouter::start_with(credit_config(&format!("{}/", billing.uri())))
        .await
        .unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect_with_api_key(&router.mcp_url(), "sk-user")
        .await
        .unwrap();
    let result = client
        .call_tool("calc:add", serde_json::json!({ "a": 1, "b": 2 }))
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(true));
    let text = first_text(&result).unwrap();
    assert!(text.contains("insufficient_credits"), "got: {text}");
    assert!(text.contains('0') && text.contains("50"), "got: {text}");

    client.close().await;
    // wiremock verifies the expect() counts on drop
}

#[tokio::test]
async fn allowed_quota_forwards_and_tracks_actuals() {
    let billing = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/usage/quota"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "allowed": true,
            "remainingDaily": 9000,
            "remainingMonthly": 90000
        })))
        .expect(1)
        .mount(&billing)
        .await;

    Mock::given(method("POST"))
        .and(path("/usage/track"))
        .and(wiremock::matchers::body_partial_json(serde_json::json!({
            // Actuals from models_metrics supersede the 1000/500 quote
            "inputTokens": 150,
            "outputTokens": 40
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&billing)
        .await;

    let upstream = MockUpstream::start(UpstreamSpec {
        tools: vec!["add", "sub", "quote"],
        with_metrics: true,
    })
    .await
    .unwrap();

    let router = TestRouter::start_with(credit_config(&format!("{}/", billing.uri())))
        .await
        .unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect_with_api_key(&router.mcp_url(), "sk-user")
        .await
        .unwrap();
    let result = client
        .call_tool("calc:add", serde_json::json!({ "a": 20, "b": 22 }))
        .await
        .unwrap();

    assert_ne!(result.is_error, Some(true));
    let payload: serde_json::Value =
        serde_json::from_str(&first_text(&result).unwrap()).unwrap();
    assert_eq!(payload["result"], 42.0);
    // Metrics consumed by the gate never leak to the client
    assert!(payload.get("models_metrics").is_none());

    client.close().await;
}

#[tokio::test]
async fn missing_api_key_bypasses_the_gate_entirely() {
    let billing = MockServer::start().await;

    // No quota or track traffic at all for anonymous calls
    Mock::given(method("POST"))
        .and(path("/usage/quota"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&billing)
        .await;
    Mock::given(method("POST"))
        .and(path("/usage/track"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&billing)
        .await;

    let upstream = MockUpstream::start(UpstreamSpec {
        tools: vec!["add", "sub", "quote"],
        with_metrics: false,
    })
    .await
    .unwrap();

    let router = TestRouter::start_with(credit_config(&format!("{}/", billing.uri())))
        .await
        .unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect(&router.mcp_url()).await.unwrap();
    let result = client
        .call_tool("calc:add", serde_json::json!({ "a": 3, "b": 4 }))
        .await
        .unwrap();

    assert_ne!(result.is_error, Some(true));
    let payload: serde_json::Value =
        serde_json::from_str(&first_text(&result).unwrap()).unwrap();
    assert_eq!(payload["result"], 7.0);

    client.close().await;
}

#[tokio::test]
async fn invalid_key_without_quote_tool_is_rejected() {
    let billing = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/keys/validate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "valid": false })),
        )
        .expect(1)
        .mount(&billing)
        .await;

    // No quote tool on this upstream
    let upstream = MockUpstream::start(UpstreamSpec::default()).await.unwrap();

    let router = TestRouter::start_with(credit_config(&format!("{}/", billing.uri())))
        .await
        .unwrap();
    router.register("calc", &upstream.url()).await;

    let client = McpClient::connect_with_api_key(&router.mcp_url(), "sk-bogus")
        .await
        .unwrap();
    let result = client
        .call_tool("calc:add", serde_json::json!({ "a": 1, "b": 1 }))
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(true));
    let text = first_text(&result).unwrap();
    assert!(text.contains("invalid_api_key"), "got: {text}");

    client.close().await;
}
