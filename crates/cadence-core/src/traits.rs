//! Collaborator seams.
//!
//! The engine treats every external side effect as an injected trait
//! object: the chat channel, the tenant user directory, the document
//! producer, and the at-least-once redelivery capability of the event
//! substrate. Credential handling and transport retries live behind
//! these seams, not in the engine.

use async_trait::async_trait;

use crate::error::Result;
use crate::events::DomainEvent;

/// Receipt returned by a channel send.
#[derive(Debug, Clone, Default)]
pub struct SendReceipt {
    /// Provider-side message id, when the channel reports one.
    pub message_id: Option<String>,
}

/// A workspace-chat channel capable of posting to named destinations
/// (channels or per-user DM destinations).
#[async_trait]
pub trait ChannelClient: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the tenant has a usable connection. A disconnected tenant
    /// is an infrastructure condition, not a rule configuration error.
    fn is_connected(&self, tenant_id: &str) -> bool;

    async fn send(&self, tenant_id: &str, destination: &str, content: &str)
    -> Result<SendReceipt>;
}

/// A user resolved through the tenant directory.
#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub user_id: String,
    /// Channel destination for direct messages / document pushes.
    pub dm_destination: String,
}

/// Tenant-scoped mapping from platform user references to channel
/// identities.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, tenant_id: &str, user_ref: &str) -> Result<Option<DirectoryUser>>;
}

/// Handle to a generated document.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    pub document_id: String,
    pub url: Option<String>,
}

/// External document producer: renders a document from an event payload
/// and uploads it to a destination device.
#[async_trait]
pub trait DocumentProducer: Send + Sync {
    async fn generate(
        &self,
        tenant_id: &str,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<DocumentHandle>;

    async fn push(
        &self,
        tenant_id: &str,
        destination: &str,
        document: &DocumentHandle,
    ) -> Result<()>;
}

/// At-least-once redelivery capability of the event substrate. The
/// orchestrator asks for a redelivery when a rule fails retryably;
/// replays are made idempotent by the execution-log dedup key.
#[async_trait]
pub trait Redelivery: Send + Sync {
    async fn schedule(&self, event: &DomainEvent, attempt: u32) -> Result<()>;
}
