//! Persistence seam for the sync subsystem. The store must support
//! per-row atomic upserts; beyond that the executor assumes nothing
//! about it.

use chrono::{DateTime, Utc};

use cadence_core::Result;

use crate::executor::SyncRun;
use crate::registration::DataSourceRegistration;
use crate::stages::StageHistoryInterval;

pub trait SyncStore: Send + Sync {
    /// All active data-source registrations (any frequency).
    fn active_registrations(&self) -> Result<Vec<DataSourceRegistration>>;

    /// Successful sync: advance the schedule and record last-run state.
    fn mark_registration_synced(
        &self,
        registration_id: &str,
        next_run: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Failed sync: record the error WITHOUT advancing the schedule, so
    /// the next tick retries instead of waiting out a full period.
    fn mark_registration_failed(
        &self,
        registration_id: &str,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<()>;

    /// Open a sync-run row (status = running).
    fn insert_sync_run(&self, run: &SyncRun) -> Result<()>;

    /// Write a sync-run's terminal state and counters.
    fn complete_sync_run(&self, run: &SyncRun) -> Result<()>;

    /// Previously stored data for (source, external id), if any.
    fn stored_record(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Atomic per-row upsert of a fetched record.
    fn upsert_record(
        &self,
        source_id: &str,
        external_id: &str,
        data: &serde_json::Value,
    ) -> Result<()>;

    /// The entity's currently open stage interval (exited_at IS NULL),
    /// scoped to its data source.
    fn open_interval(
        &self,
        source_id: &str,
        entity_id: &str,
    ) -> Result<Option<StageHistoryInterval>>;

    /// Close an open interval.
    fn close_interval(&self, interval_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Append a new (open) interval.
    fn insert_interval(&self, interval: &StageHistoryInterval) -> Result<()>;
}
