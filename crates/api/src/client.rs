use {
    reqwest::Client,
    secrecy::{ExposeSecret, Secret},
    serde_json::Value,
    tracing::{debug, warn},
    url::Url,
};

use crate::{error::TanaError, node::NodeRequest};

/// Tana input API endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://europe-west1-tagr-prod.cloudfunctions.net/addToNodeV2";

/// Client for the node-creation endpoint. One instance is shared by every
/// session's engine.
pub struct TanaClient {
    client: Client,
    api_token: Secret<String>,
    endpoint: Url,
}

impl std::fmt::Debug for TanaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TanaClient")
            .field("api_token", &"[REDACTED]")
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl TanaClient {
    /// Build a client. Fails when the token is absent or blank so a missing
    /// credential is caught at startup rather than on the first tool call.
    pub fn new(api_token: Option<Secret<String>>, endpoint: &str) -> Result<Self, TanaError> {
        let api_token = api_token
            .filter(|t| !t.expose_secret().trim().is_empty())
            .ok_or(TanaError::MissingToken)?;
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TanaError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        Ok(Self {
            client: Client::new(),
            api_token,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one node to Tana. Attempted exactly once.
    ///
    /// Returns the decoded JSON body, the raw text when the body is not JSON,
    /// or `Value::Null` for an empty body.
    pub async fn create_node(&self, node: &NodeRequest) -> Result<Value, TanaError> {
        debug!(kind = %node.kind(), target = ?node.target_node_id(), "creating Tana node");

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.api_token.expose_secret())
            .json(node)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), kind = %node.kind(), "Tana API rejected node");
            return Err(TanaError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned())))
    }
}
