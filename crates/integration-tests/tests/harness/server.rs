//! Test wrapper that runs the router on an ephemeral port

use std::net::SocketAddr;

use relay_config::Config;
use relay_server::Server;
use tokio_util::sync::CancellationToken;

/// A running router instance for one test
pub struct TestRouter {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
}

impl TestRouter {
    /// Start with the documented defaults (no store, no credit gate)
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(Config::default()).await
    }

    /// Start with a caller-tuned configuration
    pub async fn start_with(config: Config) -> anyhow::Result<Self> {
        let server = Server::new(config).await?;
        let (router, _state) = server.into_parts();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown,
            client: reqwest::Client::new(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn mcp_url(&self) -> String {
        self.url("/mcp")
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Register an upstream and assert the REST call succeeded
    pub async fn register(&self, name: &str, url: &str) -> serde_json::Value {
        let resp = self
            .client
            .post(self.url("/register"))
            .json(&serde_json::json!({ "name": name, "url": url }))
            .send()
            .await
            .expect("register request");
        assert_eq!(resp.status(), 200, "register {name} failed");
        resp.json().await.expect("register response body")
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
