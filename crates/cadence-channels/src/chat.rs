//! Workspace-chat adapter — posts to named channel destinations and
//! per-user DM destinations over the chat service's REST API.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use cadence_core::config::ChatChannelConfig;
use cadence_core::{CadenceError, ChannelClient, Result, SendReceipt};

/// Chat client. Tenants connect by registering a workspace token; a
/// tenant without a token is "not connected" and dispatch treats that
/// as a retryable infrastructure condition.
pub struct ChatClient {
    config: ChatChannelConfig,
    client: reqwest::Client,
    tenant_tokens: RwLock<HashMap<String, String>>,
}

impl ChatClient {
    pub fn new(config: ChatChannelConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            tenant_tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or refresh) a tenant's workspace token.
    pub fn register_tenant(&self, tenant_id: &str, token: &str) {
        self.tenant_tokens
            .write()
            .expect("tenant token lock poisoned")
            .insert(tenant_id.to_string(), token.to_string());
        tracing::info!("🔌 Chat workspace connected for tenant {tenant_id}");
    }

    /// Drop a tenant's connection (workspace disconnected in settings).
    pub fn disconnect_tenant(&self, tenant_id: &str) {
        self.tenant_tokens
            .write()
            .expect("tenant token lock poisoned")
            .remove(tenant_id);
    }

    fn token_for(&self, tenant_id: &str) -> Option<String> {
        self.tenant_tokens
            .read()
            .expect("tenant token lock poisoned")
            .get(tenant_id)
            .cloned()
    }
}

#[async_trait]
impl ChannelClient for ChatClient {
    fn name(&self) -> &str {
        "workspace_chat"
    }

    fn is_connected(&self, tenant_id: &str) -> bool {
        self.config.enabled && self.token_for(tenant_id).is_some()
    }

    async fn send(
        &self,
        tenant_id: &str,
        destination: &str,
        content: &str,
    ) -> Result<SendReceipt> {
        let token = self.token_for(tenant_id).ok_or_else(|| {
            CadenceError::channel(format!("chat not connected for tenant {tenant_id}"))
        })?;

        let url = format!("{}/messages", self.config.api_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({
                "destination": destination,
                "text": content,
            }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CadenceError::channel(format!("chat send failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CadenceError::channel(format!(
                "chat API error {status}: {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CadenceError::channel(format!("chat response: {e}")))?;
        Ok(SendReceipt {
            message_id: body["message_id"].as_str().map(String::from),
        })
    }
}
