//! Data-source registrations — tenant configuration describing what to
//! sync, from where, and how often. Owned by tenant settings; the engine
//! reads them and maintains only the scheduling/last-run bookkeeping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sync frequency tiers. Fixed offsets per tier; `Manual` never
/// reschedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFrequency {
    FiveMinutes,
    FifteenMinutes,
    Hourly,
    Daily,
    Manual,
}

impl SyncFrequency {
    /// Offset to the next scheduled run. None for manual sources.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::FiveMinutes => Some(Duration::minutes(5)),
            Self::FifteenMinutes => Some(Duration::minutes(15)),
            Self::Hourly => Some(Duration::hours(1)),
            Self::Daily => Some(Duration::days(1)),
            Self::Manual => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FiveMinutes => "five_minutes",
            Self::FifteenMinutes => "fifteen_minutes",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "five_minutes" => Some(Self::FiveMinutes),
            "fifteen_minutes" => Some(Self::FifteenMinutes),
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A registered external data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceRegistration {
    pub id: String,
    pub tenant_id: String,
    /// Provider adapter name (e.g. "pipeline_crm").
    pub provider: String,
    pub frequency: SyncFrequency,
    pub active: bool,
    /// None means "due now" for active scheduled sources, "not
    /// scheduled" for manual/inactive ones.
    pub next_scheduled_run: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub last_run_error: Option<String>,
    /// Record field tracked for stage history (None = no tracking).
    pub stage_field: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DataSourceRegistration {
    pub fn new(tenant_id: &str, provider: &str, frequency: SyncFrequency) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            provider: provider.to_string(),
            frequency,
            active: true,
            next_scheduled_run: None,
            last_run_at: None,
            last_run_status: None,
            last_run_error: None,
            stage_field: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the scanner should pick this source up now. Manual and
    /// inactive sources are never due on the clock.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active || self.frequency == SyncFrequency::Manual {
            return false;
        }
        match self.next_scheduled_run {
            None => true,
            Some(next) => next <= now,
        }
    }

    /// Next run computed from the frequency tier. None for manual.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.frequency.interval().map(|offset| now + offset)
    }
}
