//! Sync execution. One `SyncRun` row per attempt, opened before the
//! provider is touched and completed with counters and a terminal
//! status. Batches run under a semaphore so a wide due set cannot
//! stampede a provider.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use cadence_core::{CadenceError, Result};

use crate::provider::{CredentialResolver, ProviderAdapter};
use crate::registration::DataSourceRegistration;
use crate::stages::record_transition;
use crate::store::SyncStore;

/// Why a sync ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCause {
    Scheduled,
    Manual,
    Retry,
}

impl SyncCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

/// Lifecycle of a sync run. `Cancelled` is reserved for runs found
/// still open after a restart; the executor itself only writes
/// `Success` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One sync attempt against one data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub data_source_id: String,
    pub cause: SyncCause,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Records returned by the provider.
    pub records_fetched: u64,
    /// Records that were new or changed and got written.
    pub records_processed: u64,
    pub error: Option<String>,
}

impl SyncRun {
    pub fn begin(data_source_id: &str, cause: SyncCause) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data_source_id: data_source_id.to_string(),
            cause,
            status: SyncRunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            records_fetched: 0,
            records_processed: 0,
            error: None,
        }
    }

    fn finish_success(&mut self, at: DateTime<Utc>) {
        self.status = SyncRunStatus::Success;
        self.completed_at = Some(at);
        self.error = None;
    }

    fn finish_error(&mut self, at: DateTime<Utc>, error: String) {
        self.status = SyncRunStatus::Error;
        self.completed_at = Some(at);
        self.error = Some(error);
    }
}

/// Outcome of one executed sync, as handed back to the scheduler.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub registration_id: String,
    pub run: SyncRun,
}

impl SyncReport {
    pub fn succeeded(&self) -> bool {
        self.run.status == SyncRunStatus::Success
    }
}

/// Runs syncs: resolves credentials, fetches from the provider adapter,
/// diffs against stored state, and keeps registration bookkeeping.
pub struct SyncExecutor {
    store: Arc<dyn SyncStore>,
    credentials: Arc<dyn CredentialResolver>,
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    max_concurrent: usize,
}

impl SyncExecutor {
    pub fn new(
        store: Arc<dyn SyncStore>,
        credentials: Arc<dyn CredentialResolver>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            credentials,
            providers: HashMap::new(),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn register_provider(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        tracing::info!("🔌 Registered sync provider: {}", adapter.name());
        self.providers.insert(adapter.name().to_string(), adapter);
    }

    /// Execute one sync to completion and persist its outcome.
    pub async fn run(
        &self,
        registration: DataSourceRegistration,
        cause: SyncCause,
    ) -> SyncReport {
        let adapter = self.providers.get(&registration.provider).cloned();
        run_source(
            self.store.clone(),
            adapter,
            self.credentials.clone(),
            registration,
            cause,
        )
        .await
    }

    /// Execute a batch of syncs with at most `max_concurrent` in flight.
    /// Failures are per-source; the batch always yields one report per
    /// registration that did not panic.
    pub async fn run_batch(
        &self,
        registrations: Vec<DataSourceRegistration>,
        cause: SyncCause,
    ) -> Vec<SyncReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(registrations.len());

        for registration in registrations {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let credentials = self.credentials.clone();
            let adapter = self.providers.get(&registration.provider).cloned();

            handles.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquisition only
                // fails if the batch is torn down.
                let _permit = semaphore.acquire_owned().await.ok();
                run_source(store, adapter, credentials, registration, cause).await
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!("⚠️ Sync task aborted: {}", e),
            }
        }
        reports
    }
}

async fn run_source(
    store: Arc<dyn SyncStore>,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    credentials: Arc<dyn CredentialResolver>,
    registration: DataSourceRegistration,
    cause: SyncCause,
) -> SyncReport {
    let mut run = SyncRun::begin(&registration.id, cause);
    if let Err(e) = store.insert_sync_run(&run) {
        let now = Utc::now();
        run.finish_error(now, format!("could not open sync run: {}", e));
        return SyncReport {
            registration_id: registration.id,
            run,
        };
    }

    tracing::info!(
        "🚀 Sync {} for source {} ({}, {})",
        run.id,
        registration.id,
        registration.provider,
        cause.as_str()
    );

    let outcome = sync_once(store.as_ref(), adapter, credentials.as_ref(), &registration, &mut run).await;
    let now = Utc::now();

    match outcome {
        Ok(()) => {
            run.finish_success(now);
            let next = registration.next_run_after(now);
            if let Err(e) = store.mark_registration_synced(&registration.id, next, now) {
                tracing::warn!("⚠️ Could not update registration {}: {}", registration.id, e);
            }
            tracing::info!(
                "✅ Sync {} done: {} fetched, {} written",
                run.id,
                run.records_fetched,
                run.records_processed
            );
        }
        Err(e) => {
            let message = e.to_string();
            run.finish_error(now, message.clone());
            // Leave next_scheduled_run untouched so the next tick
            // retries instead of waiting out a full period.
            if let Err(e) = store.mark_registration_failed(&registration.id, now, &message) {
                tracing::warn!("⚠️ Could not update registration {}: {}", registration.id, e);
            }
            tracing::warn!("⚠️ Sync {} failed: {}", run.id, message);
        }
    }

    if let Err(e) = store.complete_sync_run(&run) {
        tracing::warn!("⚠️ Could not persist sync run {}: {}", run.id, e);
    }

    SyncReport {
        registration_id: registration.id,
        run,
    }
}

async fn sync_once(
    store: &dyn SyncStore,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    credentials: &dyn CredentialResolver,
    registration: &DataSourceRegistration,
    run: &mut SyncRun,
) -> Result<()> {
    let adapter = adapter.ok_or_else(|| {
        CadenceError::config(format!(
            "no provider adapter registered for '{}'",
            registration.provider
        ))
    })?;

    let creds = credentials
        .resolve(&registration.tenant_id, &registration.provider)
        .await?;

    let records = adapter.fetch(registration, &creds).await?;
    run.records_fetched = records.len() as u64;

    for record in &records {
        let stored = store.stored_record(&registration.id, &record.external_id)?;
        let changed = stored.as_ref() != Some(&record.data);
        if changed {
            store.upsert_record(&registration.id, &record.external_id, &record.data)?;
            run.records_processed += 1;
        }

        if let Some(field) = &registration.stage_field {
            if let Some(stage) = record.data.get(field).and_then(|v| v.as_str()) {
                record_transition(store, &registration.id, &record.external_id, stage, Utc::now())?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ExternalRecord, ProviderCredentials};
    use crate::registration::SyncFrequency;
    use crate::stages::StageHistoryInterval;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        records: Mutex<HashMap<(String, String), serde_json::Value>>,
        intervals: Mutex<Vec<StageHistoryInterval>>,
        runs: Mutex<Vec<SyncRun>>,
        synced: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
        failed: Mutex<Vec<(String, String)>>,
    }

    impl SyncStore for FakeStore {
        fn active_registrations(&self) -> Result<Vec<DataSourceRegistration>> {
            Ok(Vec::new())
        }
        fn mark_registration_synced(
            &self,
            id: &str,
            next: Option<DateTime<Utc>>,
            _: DateTime<Utc>,
        ) -> Result<()> {
            self.synced.lock().unwrap().push((id.to_string(), next));
            Ok(())
        }
        fn mark_registration_failed(&self, id: &str, _: DateTime<Utc>, error: &str) -> Result<()> {
            self.failed
                .lock()
                .unwrap()
                .push((id.to_string(), error.to_string()));
            Ok(())
        }
        fn insert_sync_run(&self, run: &SyncRun) -> Result<()> {
            self.runs.lock().unwrap().push(run.clone());
            Ok(())
        }
        fn complete_sync_run(&self, run: &SyncRun) -> Result<()> {
            let mut runs = self.runs.lock().unwrap();
            if let Some(existing) = runs.iter_mut().find(|r| r.id == run.id) {
                *existing = run.clone();
            }
            Ok(())
        }
        fn stored_record(&self, source: &str, external: &str) -> Result<Option<serde_json::Value>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&(source.to_string(), external.to_string()))
                .cloned())
        }
        fn upsert_record(
            &self,
            source: &str,
            external: &str,
            data: &serde_json::Value,
        ) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert((source.to_string(), external.to_string()), data.clone());
            Ok(())
        }
        fn open_interval(
            &self,
            source_id: &str,
            entity_id: &str,
        ) -> Result<Option<StageHistoryInterval>> {
            let intervals = self.intervals.lock().unwrap();
            Ok(intervals
                .iter()
                .find(|i| {
                    i.source_id == source_id && i.entity_id == entity_id && i.exited_at.is_none()
                })
                .cloned())
        }
        fn close_interval(&self, interval_id: &str, at: DateTime<Utc>) -> Result<()> {
            let mut intervals = self.intervals.lock().unwrap();
            if let Some(i) = intervals.iter_mut().find(|i| i.id == interval_id) {
                i.exited_at = Some(at);
            }
            Ok(())
        }
        fn insert_interval(&self, interval: &StageHistoryInterval) -> Result<()> {
            self.intervals.lock().unwrap().push(interval.clone());
            Ok(())
        }
    }

    struct FakeCreds;

    #[async_trait]
    impl CredentialResolver for FakeCreds {
        async fn resolve(&self, _: &str, _: &str) -> Result<ProviderCredentials> {
            Ok(ProviderCredentials {
                access_token: "tok".to_string(),
                expires_at: None,
            })
        }
    }

    struct FakeProvider {
        records: Vec<ExternalRecord>,
        fail: bool,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl FakeProvider {
        fn with_records(records: Vec<ExternalRecord>) -> Self {
            Self {
                records,
                fail: false,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeProvider {
        fn name(&self) -> &str {
            "pipeline_crm"
        }

        async fn fetch(
            &self,
            _: &DataSourceRegistration,
            _: &ProviderCredentials,
        ) -> Result<Vec<ExternalRecord>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(CadenceError::provider("upstream returned 503"));
            }
            Ok(self.records.clone())
        }
    }

    fn executor_with(
        store: Arc<FakeStore>,
        provider: FakeProvider,
        max_concurrent: usize,
    ) -> SyncExecutor {
        let mut executor = SyncExecutor::new(store, Arc::new(FakeCreds), max_concurrent);
        executor.register_provider(Arc::new(provider));
        executor
    }

    fn rec(id: &str, data: serde_json::Value) -> ExternalRecord {
        ExternalRecord {
            external_id: id.to_string(),
            data,
        }
    }

    #[tokio::test]
    async fn test_successful_sync_writes_and_reschedules() {
        let store = Arc::new(FakeStore::default());
        let provider = FakeProvider::with_records(vec![
            rec("rock-1", json!({"title": "Q3 launch"})),
            rec("rock-2", json!({"title": "Hiring"})),
        ]);
        let executor = executor_with(store.clone(), provider, 5);

        let reg = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly);
        let report = executor.run(reg.clone(), SyncCause::Scheduled).await;

        assert!(report.succeeded());
        assert_eq!(report.run.records_fetched, 2);
        assert_eq!(report.run.records_processed, 2);
        assert_eq!(store.records.lock().unwrap().len(), 2);

        let synced = store.synced.lock().unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].0, reg.id);
        assert!(synced[0].1.is_some());
        assert!(store.failed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_records_are_not_rewritten() {
        let store = Arc::new(FakeStore::default());
        let data = json!({"title": "Q3 launch"});
        let provider = FakeProvider::with_records(vec![rec("rock-1", data.clone())]);
        let executor = executor_with(store.clone(), provider, 5);

        let reg = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly);
        store
            .records
            .lock()
            .unwrap()
            .insert((reg.id.clone(), "rock-1".to_string()), data);

        let report = executor.run(reg, SyncCause::Scheduled).await;
        assert!(report.succeeded());
        assert_eq!(report.run.records_fetched, 1);
        assert_eq!(report.run.records_processed, 0);
    }

    #[tokio::test]
    async fn test_failed_sync_does_not_advance_schedule() {
        let store = Arc::new(FakeStore::default());
        let mut provider = FakeProvider::with_records(Vec::new());
        provider.fail = true;
        let executor = executor_with(store.clone(), provider, 5);

        let reg = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly);
        let report = executor.run(reg.clone(), SyncCause::Scheduled).await;

        assert!(!report.succeeded());
        assert_eq!(report.run.status, SyncRunStatus::Error);
        assert!(store.synced.lock().unwrap().is_empty());

        let failed = store.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, reg.id);
        assert!(failed[0].1.contains("503"));
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_the_run() {
        let store = Arc::new(FakeStore::default());
        let executor = SyncExecutor::new(store.clone(), Arc::new(FakeCreds), 5);

        let reg = DataSourceRegistration::new("t1", "unwired", SyncFrequency::Hourly);
        let report = executor.run(reg, SyncCause::Manual).await;

        assert!(!report.succeeded());
        assert!(report.run.error.as_deref().unwrap_or("").contains("unwired"));
        // The run row still exists for operator visibility.
        assert_eq!(store.runs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stage_transitions_recorded_when_tracked() {
        let store = Arc::new(FakeStore::default());
        let provider =
            FakeProvider::with_records(vec![rec("rock-1", json!({"status": "off_track"}))]);
        let executor = executor_with(store.clone(), provider, 5);

        let mut reg = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly);
        reg.stage_field = Some("status".to_string());

        let report = executor.run(reg.clone(), SyncCause::Scheduled).await;
        assert!(report.succeeded());

        let intervals = store.intervals.lock().unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].source_id, reg.id);
        assert_eq!(intervals[0].entity_id, "rock-1");
        assert_eq!(intervals[0].to_stage, "off_track");
    }

    #[tokio::test]
    async fn test_batch_respects_concurrency_cap() {
        let store = Arc::new(FakeStore::default());
        let provider = FakeProvider::with_records(Vec::new());
        let peak = provider.peak.clone();
        let executor = executor_with(store, provider, 5);

        let regs: Vec<DataSourceRegistration> = (0..20)
            .map(|_| DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly))
            .collect();

        let reports = executor.run_batch(regs, SyncCause::Scheduled).await;
        assert_eq!(reports.len(), 20);
        assert!(reports.iter().all(SyncReport::succeeded));
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let store = Arc::new(FakeStore::default());
        let mut executor = SyncExecutor::new(store, Arc::new(FakeCreds), 5);
        executor.register_provider(Arc::new(FakeProvider::with_records(Vec::new())));

        let good = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly);
        let bad = DataSourceRegistration::new("t1", "unwired", SyncFrequency::Hourly);

        let reports = executor
            .run_batch(vec![good.clone(), bad], SyncCause::Scheduled)
            .await;
        assert_eq!(reports.len(), 2);
        let ok = reports.iter().filter(|r| r.succeeded()).count();
        assert_eq!(ok, 1);
    }
}
