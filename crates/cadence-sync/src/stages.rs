//! Stage-transition history. Each tracked entity has at most one open
//! interval at a time; a transition closes it and opens the next, so the
//! rows chain into a full timeline of how long the entity sat in each
//! stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cadence_core::Result;

use crate::store::SyncStore;

/// One contiguous stay in a stage. `exited_at` is None while the entity
/// is still in the stage. Timelines are per data source: two sources
/// whose providers reuse an external id never share intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryInterval {
    pub id: String,
    pub source_id: String,
    pub entity_id: String,
    pub from_stage: Option<String>,
    pub to_stage: String,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
}

impl StageHistoryInterval {
    pub fn open(
        source_id: &str,
        entity_id: &str,
        from_stage: Option<&str>,
        to_stage: &str,
        entered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            entity_id: entity_id.to_string(),
            from_stage: from_stage.map(str::to_string),
            to_stage: to_stage.to_string(),
            entered_at,
            exited_at: None,
        }
    }
}

/// Record that `entity_id` from `source_id` is observed in `stage` at
/// `now`.
///
/// If the entity's open interval already has that stage, nothing is
/// written and `None` comes back. Otherwise the open interval (if any)
/// is closed at `now` and a fresh open interval is appended.
pub fn record_transition(
    store: &dyn SyncStore,
    source_id: &str,
    entity_id: &str,
    stage: &str,
    now: DateTime<Utc>,
) -> Result<Option<StageHistoryInterval>> {
    let current = store.open_interval(source_id, entity_id)?;

    let from_stage = match &current {
        Some(open) if open.to_stage == stage => return Ok(None),
        Some(open) => {
            store.close_interval(&open.id, now)?;
            Some(open.to_stage.clone())
        }
        None => None,
    };

    let interval =
        StageHistoryInterval::open(source_id, entity_id, from_stage.as_deref(), stage, now);
    store.insert_interval(&interval)?;
    tracing::debug!(
        "📇 Stage transition for {}: {} → {}",
        entity_id,
        from_stage.as_deref().unwrap_or("(none)"),
        stage
    );
    Ok(Some(interval))
}
