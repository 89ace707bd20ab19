//! Execution log — append-only record of every attempted automation
//! action. Drives the audit trail, and its (rule id, event id) dedup key
//! is what makes event redelivery idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_core::Result;

/// Lifecycle of one (rule, event) attempt. Terminal states never
/// transition backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Skipped,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "skipped" => Some(Self::Skipped),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped | Self::Error)
    }
}

/// One attempted automation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecutionRecord {
    pub id: String,
    pub rule_id: String,
    /// None for manual test runs.
    pub event_id: Option<String>,
    pub status: ExecutionStatus,
    /// Structured result on success/skipped (e.g. the webhook envelope,
    /// or `{"reason": "conditions_not_met"}`).
    pub result: Option<serde_json::Value>,
    /// Human-readable failure message on error.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub test_run: bool,
}

impl ActionExecutionRecord {
    /// Open a running record for a fresh attempt.
    pub fn begin(rule_id: &str, event_id: Option<&str>, test_run: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.to_string(),
            event_id: event_id.map(str::to_string),
            status: ExecutionStatus::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            test_run,
        }
    }

    pub fn mark_success(&mut self, result: serde_json::Value) {
        self.status = ExecutionStatus::Success;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_skipped(&mut self) {
        self.status = ExecutionStatus::Skipped;
        self.result = Some(serde_json::json!({"reason": "conditions_not_met"}));
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_error(&mut self, message: String) {
        self.status = ExecutionStatus::Error;
        self.error = Some(message);
        self.completed_at = Some(Utc::now());
    }
}

/// Outcome of opening an attempt.
#[derive(Debug)]
pub enum BeginOutcome {
    /// New attempt — caller owns driving it to a terminal state.
    Started(ActionExecutionRecord),
    /// The (rule, event) pair already has a record (redelivered event).
    /// The adapter must NOT be invoked again.
    AlreadyExecuted(ActionExecutionRecord),
}

/// Append-only persistence seam for execution records.
pub trait ExecutionLog: Send + Sync {
    /// Open an attempt for (rule, event), deduplicating on the pair.
    /// Test runs (event_id = None) are never deduplicated.
    fn begin(
        &self,
        rule_id: &str,
        event_id: Option<&str>,
        test_run: bool,
    ) -> Result<BeginOutcome>;

    /// Persist the terminal state of a record. Implementations must
    /// refuse to overwrite a record that is already terminal.
    fn complete(&self, record: &ActionExecutionRecord) -> Result<()>;
}
