//! Automation rules: tenant-configured trigger → conditions → action.
//!
//! Rules are created and edited by tenant admins elsewhere; the engine
//! reads them. The action side is a closed, tagged union — each adapter
//! variant carries its own typed configuration, validated at save time
//! rather than at dispatch time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};
use crate::events::TriggerEvent;

/// Action descriptor over the closed adapter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Post a templated message to a workspace-chat destination.
    ChannelMessage { destination: String, template: String },
    /// Direct-message the user referenced by `payload[user_field]`,
    /// resolved through the tenant's user directory.
    DirectMessage { user_field: String, template: String },
    /// Generate a document for the referenced user and push it to their
    /// destination device.
    DocumentPush {
        user_field: String,
        document_kind: String,
    },
    /// POST the raw event payload to an external URL.
    OutboundWebhook {
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
}

impl ActionSpec {
    /// Stable action-type name (matches the serde tag).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChannelMessage { .. } => "channel_message",
            Self::DirectMessage { .. } => "direct_message",
            Self::DocumentPush { .. } => "document_push",
            Self::OutboundWebhook { .. } => "outbound_webhook",
        }
    }

    /// Save-time validation. Dispatch assumes a validated spec.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ChannelMessage { destination, .. } => {
                if destination.trim().is_empty() {
                    return Err(CadenceError::config("channel_message: empty destination"));
                }
            }
            Self::DirectMessage { user_field, .. } | Self::DocumentPush { user_field, .. } => {
                if user_field.trim().is_empty() {
                    return Err(CadenceError::config(format!(
                        "{}: empty user_field",
                        self.kind()
                    )));
                }
            }
            Self::OutboundWebhook { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(CadenceError::config(format!(
                        "outbound_webhook: invalid url '{url}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A tenant automation rule. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    pub tenant_id: String,
    pub trigger: TriggerEvent,
    /// Condition map: payload field → predicate. `null`/empty matches
    /// unconditionally. See `cadence-automation::conditions`.
    #[serde(default)]
    pub conditions: serde_json::Value,
    pub action: ActionSpec,
    pub active: bool,
    pub run_count: u32,
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AutomationRule {
    pub fn new(
        tenant_id: &str,
        trigger: TriggerEvent,
        conditions: serde_json::Value,
        action: ActionSpec,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            trigger,
            conditions,
            action,
            active: true,
            run_count: 0,
            last_triggered: None,
            created_at: Utc::now(),
        }
    }

    /// Save-time validation: conditions must be a map (or null), and the
    /// action config must be complete. The trigger is in the catalog by
    /// construction.
    pub fn validate(&self) -> Result<()> {
        if !self.conditions.is_null() && !self.conditions.is_object() {
            return Err(CadenceError::config(
                "trigger conditions must be an object of field predicates",
            ));
        }
        self.action.validate()
    }
}
