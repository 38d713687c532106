//! Node-to-node HTTP transport used by the router

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::RouterError;

/// Header carrying the shared node token
pub const TOKEN_HEADER: &str = "X-AdaOS-Token";

pub const CONSOLE_PRINT_PATH: &str = "/api/io/console/print";
pub const NODE_LOOKUP_PATH: &str = "/api/subnet/nodes";

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// `POST <base_url>/api/io/console/print` with `body`
    async fn post_print(&self, base_url: &str, body: &Value, token: &str) -> Result<(), RouterError>;

    /// `GET <hub_url>/api/subnet/nodes/<node_id>`, returning `node.base_url`.
    ///
    /// A non-success status or a body without a base URL yields `None`.
    async fn lookup_base_url(
        &self,
        hub_url: &str,
        node_id: &str,
        token: &str,
    ) -> Result<Option<String>, RouterError>;
}

/// reqwest-backed transport with one timeout for every call
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new(timeout: Duration) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouterError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

fn endpoint(base: &str, path: &str) -> Result<String, RouterError> {
    url::Url::parse(base).map_err(|e| RouterError::Http(format!("invalid URL {base}: {e}")))?;
    Ok(format!("{}{}", base.trim_end_matches('/'), path))
}

/// Pull `node.base_url` out of a hub lookup response
pub fn base_url_from_lookup(body: &Value) -> Option<String> {
    body.get("node")
        .and_then(|n| n.get("base_url"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl RelayTransport for HttpRelay {
    async fn post_print(&self, base_url: &str, body: &Value, token: &str) -> Result<(), RouterError> {
        let url = endpoint(base_url, CONSOLE_PRINT_PATH)?;
        let response = self
            .client
            .post(&url)
            .header(TOKEN_HEADER, token)
            .json(body)
            .send()
            .await
            .map_err(|e| RouterError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouterError::Http(format!("{url} returned {status}")));
        }
        debug!(url = %url, "relayed notification");
        Ok(())
    }

    async fn lookup_base_url(
        &self,
        hub_url: &str,
        node_id: &str,
        token: &str,
    ) -> Result<Option<String>, RouterError> {
        let path = format!("{NODE_LOOKUP_PATH}/{}", urlencoding::encode(node_id));
        let url = endpoint(hub_url, &path)?;
        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| RouterError::Http(e.to_string()))?;

        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "hub lookup failed");
            return Ok(None);
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                debug!(url = %url, error = %e, "hub lookup returned malformed body");
                return Ok(None);
            }
        };
        Ok(base_url_from_lookup(&body))
    }
}
