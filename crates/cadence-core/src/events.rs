//! Domain events — the push clock of the engine.
//!
//! Producers elsewhere in the platform emit typed occurrences (an issue
//! was queued, a rock went off-track, a meeting completed). The engine
//! subscribes to a closed catalog of event types; an event carrying an
//! unknown type string is simply ignored, no rules will ever match it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed catalog of trigger event types with stable wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerEvent {
    #[serde(rename = "issue/queued")]
    IssueQueued,
    #[serde(rename = "issue/solved")]
    IssueSolved,
    #[serde(rename = "rock/status.changed")]
    RockStatusChanged,
    #[serde(rename = "todo/created")]
    TodoCreated,
    #[serde(rename = "todo/overdue")]
    TodoOverdue,
    #[serde(rename = "meeting/started")]
    MeetingStarted,
    #[serde(rename = "meeting/completed")]
    MeetingCompleted,
    #[serde(rename = "headline/created")]
    HeadlineCreated,
    #[serde(rename = "scorecard/measure.updated")]
    MeasureUpdated,
}

impl TriggerEvent {
    /// Wire string for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueQueued => "issue/queued",
            Self::IssueSolved => "issue/solved",
            Self::RockStatusChanged => "rock/status.changed",
            Self::TodoCreated => "todo/created",
            Self::TodoOverdue => "todo/overdue",
            Self::MeetingStarted => "meeting/started",
            Self::MeetingCompleted => "meeting/completed",
            Self::HeadlineCreated => "headline/created",
            Self::MeasureUpdated => "scorecard/measure.updated",
        }
    }

    /// Parse a wire string. Unknown strings yield None — the event is
    /// outside the subscribed catalog and must be ignored, not rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issue/queued" => Some(Self::IssueQueued),
            "issue/solved" => Some(Self::IssueSolved),
            "rock/status.changed" => Some(Self::RockStatusChanged),
            "todo/created" => Some(Self::TodoCreated),
            "todo/overdue" => Some(Self::TodoOverdue),
            "meeting/started" => Some(Self::MeetingStarted),
            "meeting/completed" => Some(Self::MeetingCompleted),
            "headline/created" => Some(Self::HeadlineCreated),
            "scorecard/measure.updated" => Some(Self::MeasureUpdated),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain event. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    pub tenant_id: String,
    pub event_type: TriggerEvent,
    /// Freeform payload (key/value map) interpreted by rule conditions
    /// and action templates.
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(tenant_id: &str, event_type: TriggerEvent, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            event_type,
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Build an event from the inbound wire contract. Returns None when
    /// the type string is not in the catalog.
    pub fn from_wire(
        type_str: &str,
        tenant_id: &str,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Option<Self> {
        let event_type = TriggerEvent::parse(type_str)?;
        Some(Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            event_type,
            payload,
            occurred_at,
        })
    }

    /// Create a rock status-change event.
    pub fn rock_status_changed(
        tenant_id: &str,
        rock_id: &str,
        old_status: &str,
        new_status: &str,
    ) -> Self {
        Self::new(
            tenant_id,
            TriggerEvent::RockStatusChanged,
            serde_json::json!({
                "rock_id": rock_id,
                "old_status": old_status,
                "new_status": new_status,
            }),
        )
    }

    /// Create an issue-queued event.
    pub fn issue_queued(tenant_id: &str, issue_id: &str, title: &str, owner_id: &str) -> Self {
        Self::new(
            tenant_id,
            TriggerEvent::IssueQueued,
            serde_json::json!({
                "issue_id": issue_id,
                "title": title,
                "owner_id": owner_id,
            }),
        )
    }
}
