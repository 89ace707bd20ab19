//! Action dispatcher — executes one action spec against its channel
//! adapter. The dispatcher itself is not idempotent; replay protection
//! is the execution log's dedup key, one layer up.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use cadence_core::{
    ActionSpec, CadenceError, ChannelClient, DirectoryUser, DocumentProducer, Result,
    UserDirectory,
};

/// Structured result of a dispatched action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    MessageSent {
        channel: String,
        destination: String,
        message_id: Option<String>,
    },
    DocumentPushed {
        destination: String,
        document_id: String,
    },
    /// The webhook ran; whether the endpoint liked it is data, not an
    /// error. `ok` is true purely for 2xx responses.
    WebhookCompleted { status: u16, ok: bool },
}

impl ActionOutcome {
    /// Result payload persisted on the execution record.
    pub fn to_result_json(&self) -> Value {
        match self {
            Self::MessageSent {
                channel,
                destination,
                message_id,
            } => serde_json::json!({
                "channel": channel,
                "destination": destination,
                "message_id": message_id,
            }),
            Self::DocumentPushed {
                destination,
                document_id,
            } => serde_json::json!({
                "destination": destination,
                "document_id": document_id,
            }),
            Self::WebhookCompleted { status, ok } => serde_json::json!({
                "ok": ok,
                "status": status,
            }),
        }
    }
}

/// Dispatches action specs over the closed adapter set.
pub struct ActionDispatcher {
    chat: Arc<dyn ChannelClient>,
    directory: Arc<dyn UserDirectory>,
    documents: Arc<dyn DocumentProducer>,
    http: reqwest::Client,
}

impl ActionDispatcher {
    pub fn new(
        chat: Arc<dyn ChannelClient>,
        directory: Arc<dyn UserDirectory>,
        documents: Arc<dyn DocumentProducer>,
    ) -> Self {
        Self {
            chat,
            directory,
            documents,
            http: reqwest::Client::new(),
        }
    }

    /// Execute one action. Config errors are fatal to this attempt and
    /// never retried; channel/provider errors are retryable upstream.
    pub async fn execute(
        &self,
        tenant_id: &str,
        action: &ActionSpec,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        match action {
            ActionSpec::ChannelMessage {
                destination,
                template,
            } => self.send_channel_message(tenant_id, destination, template, payload).await,
            ActionSpec::DirectMessage {
                user_field,
                template,
            } => {
                let user = self.resolve_user(tenant_id, user_field, payload).await?;
                let content = render_template(template, payload);
                let receipt = self
                    .chat
                    .send(tenant_id, &user.dm_destination, &content)
                    .await?;
                tracing::info!("💬 DM sent to {} via {}", user.user_id, self.chat.name());
                Ok(ActionOutcome::MessageSent {
                    channel: "direct_message".into(),
                    destination: user.dm_destination,
                    message_id: receipt.message_id,
                })
            }
            ActionSpec::DocumentPush {
                user_field,
                document_kind,
            } => {
                let user = self.resolve_user(tenant_id, user_field, payload).await?;
                let document = self
                    .documents
                    .generate(tenant_id, document_kind, payload)
                    .await?;
                self.documents
                    .push(tenant_id, &user.dm_destination, &document)
                    .await?;
                tracing::info!(
                    "📄 Document {} pushed to {}",
                    document.document_id,
                    user.user_id
                );
                Ok(ActionOutcome::DocumentPushed {
                    destination: user.dm_destination,
                    document_id: document.document_id,
                })
            }
            ActionSpec::OutboundWebhook { url, headers } => {
                self.fire_webhook(url, headers, payload).await
            }
        }
    }

    async fn send_channel_message(
        &self,
        tenant_id: &str,
        destination: &str,
        template: &str,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        // The destination was validated at rule-save time; anything wrong
        // with it now is a channel-side condition and stays retryable.
        if !self.chat.is_connected(tenant_id) {
            return Err(CadenceError::channel(format!(
                "chat channel not connected for tenant {tenant_id}"
            )));
        }
        let content = render_template(template, payload);
        let receipt = self.chat.send(tenant_id, destination, &content).await?;
        tracing::info!("📢 Message posted to #{destination}");
        Ok(ActionOutcome::MessageSent {
            channel: self.chat.name().to_string(),
            destination: destination.to_string(),
            message_id: receipt.message_id,
        })
    }

    /// Resolve `payload[user_field]` through the tenant directory. A
    /// missing field or mapping is a configuration error — retrying
    /// cannot fix it.
    async fn resolve_user(
        &self,
        tenant_id: &str,
        user_field: &str,
        payload: &Value,
    ) -> Result<DirectoryUser> {
        let user_ref = payload
            .get(user_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CadenceError::config(format!("event payload has no '{user_field}' field"))
            })?;
        self.directory
            .resolve(tenant_id, user_ref)
            .await?
            .ok_or_else(|| {
                CadenceError::config(format!(
                    "no directory mapping for user '{user_ref}' in tenant {tenant_id}"
                ))
            })
    }

    async fn fire_webhook(
        &self,
        url: &str,
        headers: &[(String, String)],
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let mut req = self
            .http
            .post(url)
            .json(payload)
            .timeout(Duration::from_secs(10));
        for (key, value) in headers {
            req = req.header(key.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| CadenceError::channel(format!("webhook {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            tracing::warn!("⚠️ Webhook {url} answered {status}");
        }
        Ok(ActionOutcome::WebhookCompleted {
            status: status.as_u16(),
            ok: status.is_success(),
        })
    }
}

/// Render `{{field}}` placeholders against the event payload. Unresolved
/// placeholders pass through literally rather than failing the action.
pub fn render_template(template: &str, payload: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match payload.get(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        out.push_str("{{");
                        out.push_str(&after[..end]);
                        out.push_str("}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder — emit the rest as-is.
                out.push_str("{{");
                rest = after;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
