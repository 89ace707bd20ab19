//! Due-set scanner: on every tick, pick the registrations whose next
//! run has arrived, oldest first, capped at the scan batch size.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use cadence_core::Result;

use crate::executor::{SyncCause, SyncExecutor};
use crate::registration::DataSourceRegistration;
use crate::store::SyncStore;

/// Registrations due at `now`, ordered by `next_scheduled_run` ascending
/// (never-scheduled sources first), truncated to `batch`.
pub fn scan_due(
    store: &dyn SyncStore,
    now: DateTime<Utc>,
    batch: usize,
) -> Result<Vec<DataSourceRegistration>> {
    let mut due: Vec<DataSourceRegistration> = store
        .active_registrations()?
        .into_iter()
        .filter(|reg| reg.is_due(now))
        .collect();

    due.sort_by_key(|reg| reg.next_scheduled_run.unwrap_or(DateTime::<Utc>::MIN_UTC));
    due.truncate(batch);
    Ok(due)
}

/// Spawn the background scheduler loop. Each tick scans the due set and
/// hands it to the executor; a tick that finds nothing is silent at
/// info level.
pub fn spawn_scheduler(
    store: Arc<dyn SyncStore>,
    executor: Arc<SyncExecutor>,
    tick_secs: u64,
    batch: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(tick_secs));
        // First tick fires immediately; skip straight to the cadence.
        ticker.tick().await;

        tracing::info!("📅 Sync scheduler started (tick every {}s)", tick_secs);

        loop {
            ticker.tick().await;

            let due = match scan_due(store.as_ref(), Utc::now(), batch) {
                Ok(due) => due,
                Err(e) => {
                    tracing::warn!("⚠️ Due-set scan failed: {}", e);
                    continue;
                }
            };

            if due.is_empty() {
                tracing::debug!("📅 Tick: no sources due");
                continue;
            }

            tracing::info!("📅 Tick: {} source(s) due", due.len());
            let reports = executor.run_batch(due, SyncCause::Scheduled).await;
            let failed = reports.iter().filter(|r| !r.succeeded()).count();
            if failed > 0 {
                tracing::warn!(
                    "⚠️ Sync batch finished: {} ok, {} failed",
                    reports.len() - failed,
                    failed
                );
            } else {
                tracing::info!("✅ Sync batch finished: {} ok", reports.len());
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SyncRun;
    use crate::registration::SyncFrequency;
    use crate::stages::StageHistoryInterval;
    use chrono::Duration;
    use std::sync::Mutex;

    struct FixedRegs {
        regs: Mutex<Vec<DataSourceRegistration>>,
    }

    impl SyncStore for FixedRegs {
        fn active_registrations(&self) -> Result<Vec<DataSourceRegistration>> {
            Ok(self.regs.lock().unwrap().clone())
        }
        fn mark_registration_synced(
            &self,
            _: &str,
            _: Option<DateTime<Utc>>,
            _: DateTime<Utc>,
        ) -> Result<()> {
            Ok(())
        }
        fn mark_registration_failed(&self, _: &str, _: DateTime<Utc>, _: &str) -> Result<()> {
            Ok(())
        }
        fn insert_sync_run(&self, _: &SyncRun) -> Result<()> {
            Ok(())
        }
        fn complete_sync_run(&self, _: &SyncRun) -> Result<()> {
            Ok(())
        }
        fn stored_record(&self, _: &str, _: &str) -> Result<Option<serde_json::Value>> {
            Ok(None)
        }
        fn upsert_record(&self, _: &str, _: &str, _: &serde_json::Value) -> Result<()> {
            Ok(())
        }
        fn open_interval(&self, _: &str, _: &str) -> Result<Option<StageHistoryInterval>> {
            Ok(None)
        }
        fn close_interval(&self, _: &str, _: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
        fn insert_interval(&self, _: &StageHistoryInterval) -> Result<()> {
            Ok(())
        }
    }

    fn reg_at(next: Option<DateTime<Utc>>) -> DataSourceRegistration {
        let mut reg = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly);
        reg.next_scheduled_run = next;
        reg
    }

    #[test]
    fn test_due_boundary() {
        let now = Utc::now();
        let past = reg_at(Some(now - Duration::seconds(1)));
        let exact = reg_at(Some(now));
        let future = reg_at(Some(now + Duration::seconds(1)));
        let expected = vec![past.id.clone(), exact.id.clone()];

        let store = FixedRegs {
            regs: Mutex::new(vec![future, exact, past]),
        };
        let due = scan_due(&store, now, 50).unwrap();
        let ids: Vec<String> = due.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_never_scheduled_sorts_first_and_batch_caps() {
        let now = Utc::now();
        let scheduled = reg_at(Some(now - Duration::minutes(5)));
        let fresh = reg_at(None);

        let store = FixedRegs {
            regs: Mutex::new(vec![scheduled.clone(), fresh.clone()]),
        };
        let due = scan_due(&store, now, 1).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, fresh.id);
    }

    #[test]
    fn test_manual_and_inactive_excluded() {
        let now = Utc::now();
        let mut manual = reg_at(None);
        manual.frequency = SyncFrequency::Manual;
        let mut inactive = reg_at(None);
        inactive.active = false;

        let store = FixedRegs {
            regs: Mutex::new(vec![manual, inactive]),
        };
        assert!(scan_due(&store, now, 50).unwrap().is_empty());
    }
}
