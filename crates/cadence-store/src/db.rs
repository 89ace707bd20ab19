//! Engine database — SQLite schema and queries for the automation and
//! sync subsystems.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use cadence_automation::{ActionExecutionRecord, BeginOutcome, ExecutionLog, RuleStore};
use cadence_core::{AutomationRule, CadenceError, Result, TriggerEvent};
use cadence_sync::{DataSourceRegistration, StageHistoryInterval, SyncFrequency, SyncStore};
use cadence_sync::{SyncCause, SyncRun, SyncRunStatus};

/// Engine database manager. The connection sits behind a mutex so the
/// store can be shared across async tasks; WAL mode keeps readers from
/// blocking on the writer.
pub struct EngineDb {
    conn: Mutex<Connection>,
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_ts_opt(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_json(idx: usize, raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn invalid_text(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized value '{value}'").into(),
    )
}

/// Shared SELECT column list for rule queries — single source of truth.
const RULE_SELECT: &str = "SELECT id,tenant_id,trigger_type,conditions_json,action_json,active,run_count,last_triggered,created_at FROM automation_rules";

fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<AutomationRule> {
    let trigger_raw: String = row.get(2)?;
    let conditions_raw: String = row.get(3)?;
    let action_raw: String = row.get(4)?;
    let last_triggered: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(AutomationRule {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        trigger: TriggerEvent::parse(&trigger_raw).ok_or_else(|| invalid_text(2, &trigger_raw))?,
        conditions: parse_json(3, &conditions_raw)?,
        action: serde_json::from_str(&action_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        active: row.get::<_, i32>(5)? != 0,
        run_count: row.get(6)?,
        last_triggered: parse_ts_opt(7, last_triggered)?,
        created_at: parse_ts(8, &created_at)?,
    })
}

const EXECUTION_SELECT: &str = "SELECT id,rule_id,event_id,status,result_json,error,started_at,completed_at,test_run FROM action_executions";

fn row_to_execution(row: &rusqlite::Row) -> rusqlite::Result<ActionExecutionRecord> {
    let status_raw: String = row.get(3)?;
    let result_raw: Option<String> = row.get(4)?;
    let started_at: String = row.get(6)?;
    let completed_at: Option<String> = row.get(7)?;

    Ok(ActionExecutionRecord {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        event_id: row.get(2)?,
        status: cadence_automation::ExecutionStatus::parse(&status_raw)
            .ok_or_else(|| invalid_text(3, &status_raw))?,
        result: result_raw.map(|s| parse_json(4, &s)).transpose()?,
        error: row.get(5)?,
        started_at: parse_ts(6, &started_at)?,
        completed_at: parse_ts_opt(7, completed_at)?,
        test_run: row.get::<_, i32>(8)? != 0,
    })
}

const SOURCE_SELECT: &str = "SELECT id,tenant_id,provider,frequency,active,next_scheduled_run,last_run_at,last_run_status,last_run_error,stage_field,created_at FROM data_sources";

fn row_to_registration(row: &rusqlite::Row) -> rusqlite::Result<DataSourceRegistration> {
    let frequency_raw: String = row.get(3)?;
    let next_run: Option<String> = row.get(5)?;
    let last_run: Option<String> = row.get(6)?;
    let created_at: String = row.get(10)?;

    Ok(DataSourceRegistration {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        provider: row.get(2)?,
        frequency: SyncFrequency::parse(&frequency_raw)
            .ok_or_else(|| invalid_text(3, &frequency_raw))?,
        active: row.get::<_, i32>(4)? != 0,
        next_scheduled_run: parse_ts_opt(5, next_run)?,
        last_run_at: parse_ts_opt(6, last_run)?,
        last_run_status: row.get(7)?,
        last_run_error: row.get(8)?,
        stage_field: row.get(9)?,
        created_at: parse_ts(10, &created_at)?,
    })
}

const RUN_SELECT: &str = "SELECT id,data_source_id,cause,status,started_at,completed_at,records_fetched,records_processed,error FROM sync_runs";

fn row_to_sync_run(row: &rusqlite::Row) -> rusqlite::Result<SyncRun> {
    let cause_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let started_at: String = row.get(4)?;
    let completed_at: Option<String> = row.get(5)?;

    Ok(SyncRun {
        id: row.get(0)?,
        data_source_id: row.get(1)?,
        cause: SyncCause::parse(&cause_raw).ok_or_else(|| invalid_text(2, &cause_raw))?,
        status: SyncRunStatus::parse(&status_raw).ok_or_else(|| invalid_text(3, &status_raw))?,
        started_at: parse_ts(4, &started_at)?,
        completed_at: parse_ts_opt(5, completed_at)?,
        records_fetched: row.get(6)?,
        records_processed: row.get(7)?,
        error: row.get(8)?,
    })
}

const INTERVAL_SELECT: &str =
    "SELECT id,source_id,entity_id,from_stage,to_stage,entered_at,exited_at FROM stage_history";

fn row_to_interval(row: &rusqlite::Row) -> rusqlite::Result<StageHistoryInterval> {
    let entered_at: String = row.get(5)?;
    let exited_at: Option<String> = row.get(6)?;

    Ok(StageHistoryInterval {
        id: row.get(0)?,
        source_id: row.get(1)?,
        entity_id: row.get(2)?,
        from_stage: row.get(3)?,
        to_stage: row.get(4)?,
        entered_at: parse_ts(5, &entered_at)?,
        exited_at: parse_ts_opt(6, exited_at)?,
    })
}

impl EngineDb {
    /// Open or create the engine database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CadenceError::store(format!("DB open error: {e}")))?;

        // WAL mode allows concurrent readers while a sync batch writes.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| CadenceError::store(format!("DB pragma error: {e}")))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CadenceError::store(format!("DB open error: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CadenceError::store("DB lock poisoned"))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS automation_rules (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                conditions_json TEXT NOT NULL DEFAULT 'null',
                action_json TEXT NOT NULL,
                active INTEGER DEFAULT 1,
                run_count INTEGER DEFAULT 0,
                last_triggered TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rules_tenant
                ON automation_rules(tenant_id, trigger_type);

            CREATE TABLE IF NOT EXISTS action_executions (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                event_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                result_json TEXT,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                test_run INTEGER DEFAULT 0,
                UNIQUE(rule_id, event_id)
            );

            CREATE TABLE IF NOT EXISTS data_sources (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                frequency TEXT NOT NULL,
                active INTEGER DEFAULT 1,
                next_scheduled_run TEXT,
                last_run_at TEXT,
                last_run_status TEXT,
                last_run_error TEXT,
                stage_field TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_records (
                source_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (source_id, external_id)
            );

            CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                data_source_id TEXT NOT NULL,
                cause TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                started_at TEXT NOT NULL,
                completed_at TEXT,
                records_fetched INTEGER DEFAULT 0,
                records_processed INTEGER DEFAULT 0,
                error TEXT
            );

            CREATE TABLE IF NOT EXISTS stage_history (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                from_stage TEXT,
                to_stage TEXT NOT NULL,
                entered_at TEXT NOT NULL,
                exited_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_stage_entity
                ON stage_history(source_id, entity_id, exited_at);
        ",
            )
            .map_err(|e| CadenceError::store(format!("Migration error: {e}")))?;
        Ok(())
    }

    // ── Rules ────────────────────────────────────

    /// Save or replace a rule. Validates before writing.
    pub fn save_rule(&self, rule: &AutomationRule) -> Result<()> {
        rule.validate()?;
        let action_json = serde_json::to_string(&rule.action)
            .map_err(|e| CadenceError::store(format!("Serialize action: {e}")))?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO automation_rules
                 (id, tenant_id, trigger_type, conditions_json, action_json, active, run_count, last_triggered, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    rule.id,
                    rule.tenant_id,
                    rule.trigger.as_str(),
                    rule.conditions.to_string(),
                    action_json,
                    rule.active as i32,
                    rule.run_count,
                    rule.last_triggered.as_ref().map(ts),
                    ts(&rule.created_at),
                ],
            )
            .map_err(|e| CadenceError::store(format!("Save rule: {e}")))?;
        Ok(())
    }

    /// Delete a rule. Its execution history stays.
    pub fn delete_rule(&self, rule_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "DELETE FROM automation_rules WHERE id=?1",
                params![rule_id],
            )
            .map_err(|e| CadenceError::store(format!("Delete rule: {e}")))?;
        Ok(())
    }

    // ── Registrations ────────────────────────────────────

    /// Save or replace a data-source registration.
    pub fn save_registration(&self, reg: &DataSourceRegistration) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO data_sources
                 (id, tenant_id, provider, frequency, active, next_scheduled_run, last_run_at, last_run_status, last_run_error, stage_field, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    reg.id,
                    reg.tenant_id,
                    reg.provider,
                    reg.frequency.as_str(),
                    reg.active as i32,
                    reg.next_scheduled_run.as_ref().map(ts),
                    reg.last_run_at.as_ref().map(ts),
                    reg.last_run_status,
                    reg.last_run_error,
                    reg.stage_field,
                    ts(&reg.created_at),
                ],
            )
            .map_err(|e| CadenceError::store(format!("Save registration: {e}")))?;
        Ok(())
    }

    /// Get a registration by ID (manual sync trigger).
    pub fn registration(&self, id: &str) -> Result<Option<DataSourceRegistration>> {
        match self.conn()?.query_row(
            &format!("{} WHERE id=?1", SOURCE_SELECT),
            params![id],
            row_to_registration,
        ) {
            Ok(reg) => Ok(Some(reg)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CadenceError::store(format!("Get registration: {e}"))),
        }
    }

    // ── Operator queries ────────────────────────────────────

    /// Most recent action executions, newest first.
    pub fn recent_executions(&self, limit: usize) -> Result<Vec<ActionExecutionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} ORDER BY started_at DESC LIMIT ?1",
                EXECUTION_SELECT
            ))
            .map_err(|e| CadenceError::store(format!("Prepare: {e}")))?;
        let records = stmt
            .query_map(params![limit as i64], row_to_execution)
            .map_err(|e| CadenceError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Most recent sync runs, newest first.
    pub fn recent_sync_runs(&self, limit: usize) -> Result<Vec<SyncRun>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{} ORDER BY started_at DESC LIMIT ?1", RUN_SELECT))
            .map_err(|e| CadenceError::store(format!("Prepare: {e}")))?;
        let runs = stmt
            .query_map(params![limit as i64], row_to_sync_run)
            .map_err(|e| CadenceError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(runs)
    }

    /// Full stage timeline for an entity of a data source, oldest first.
    pub fn stage_history(
        &self,
        source_id: &str,
        entity_id: &str,
    ) -> Result<Vec<StageHistoryInterval>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE source_id=?1 AND entity_id=?2 ORDER BY entered_at",
                INTERVAL_SELECT
            ))
            .map_err(|e| CadenceError::store(format!("Prepare: {e}")))?;
        let intervals = stmt
            .query_map(params![source_id, entity_id], row_to_interval)
            .map_err(|e| CadenceError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(intervals)
    }

    /// Mark sync runs left 'running' by a previous process as cancelled.
    /// Called once at startup, before the scheduler starts.
    pub fn cancel_orphaned_runs(&self) -> Result<usize> {
        let n = self
            .conn()?
            .execute(
                "UPDATE sync_runs SET status='cancelled', completed_at=?1 WHERE status='running'",
                params![ts(&Utc::now())],
            )
            .map_err(|e| CadenceError::store(format!("Cancel orphaned runs: {e}")))?;
        if n > 0 {
            tracing::warn!("⚠️ Marked {} orphaned sync run(s) as cancelled", n);
        }
        Ok(n)
    }
}

impl RuleStore for EngineDb {
    fn rules_for_tenant(&self, tenant_id: &str) -> Result<Vec<AutomationRule>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} WHERE tenant_id=?1 ORDER BY created_at",
                RULE_SELECT
            ))
            .map_err(|e| CadenceError::store(format!("Prepare: {e}")))?;
        let rules = stmt
            .query_map(params![tenant_id], row_to_rule)
            .map_err(|e| CadenceError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rules)
    }

    fn rule(&self, rule_id: &str) -> Result<Option<AutomationRule>> {
        match self.conn()?.query_row(
            &format!("{} WHERE id=?1", RULE_SELECT),
            params![rule_id],
            row_to_rule,
        ) {
            Ok(rule) => Ok(Some(rule)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CadenceError::store(format!("Get rule: {e}"))),
        }
    }

    fn record_trigger(&self, rule_id: &str) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE automation_rules SET run_count=run_count+1, last_triggered=?1 WHERE id=?2",
                params![ts(&Utc::now()), rule_id],
            )
            .map_err(|e| CadenceError::store(format!("Record trigger: {e}")))?;
        Ok(())
    }
}

impl ExecutionLog for EngineDb {
    fn begin(
        &self,
        rule_id: &str,
        event_id: Option<&str>,
        test_run: bool,
    ) -> Result<BeginOutcome> {
        let conn = self.conn()?;

        // Dedup on (rule, event). Test runs carry no event id, and NULL
        // event ids never collide, so they always start fresh.
        if let Some(event_id) = event_id {
            match conn.query_row(
                &format!("{} WHERE rule_id=?1 AND event_id=?2", EXECUTION_SELECT),
                params![rule_id, event_id],
                row_to_execution,
            ) {
                Ok(existing) => return Ok(BeginOutcome::AlreadyExecuted(existing)),
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(CadenceError::store(format!("Check execution: {e}"))),
            }
        }

        let record = ActionExecutionRecord::begin(rule_id, event_id, test_run);
        let inserted = conn.execute(
            "INSERT INTO action_executions
             (id, rule_id, event_id, status, started_at, test_run)
             VALUES (?1,?2,?3,?4,?5,?6)",
            params![
                record.id,
                record.rule_id,
                record.event_id,
                record.status.as_str(),
                ts(&record.started_at),
                record.test_run as i32,
            ],
        );

        match inserted {
            Ok(_) => Ok(BeginOutcome::Started(record)),
            // Lost a race on the UNIQUE(rule_id, event_id) key.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation && event_id.is_some() =>
            {
                let existing = conn
                    .query_row(
                        &format!("{} WHERE rule_id=?1 AND event_id=?2", EXECUTION_SELECT),
                        params![rule_id, event_id],
                        row_to_execution,
                    )
                    .map_err(|e| CadenceError::store(format!("Check execution: {e}")))?;
                Ok(BeginOutcome::AlreadyExecuted(existing))
            }
            Err(e) => Err(CadenceError::store(format!("Open execution: {e}"))),
        }
    }

    fn complete(&self, record: &ActionExecutionRecord) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE action_executions SET status=?1, result_json=?2, error=?3, completed_at=?4
                 WHERE id=?5 AND status IN ('pending','running')",
                params![
                    record.status.as_str(),
                    record.result.as_ref().map(|v| v.to_string()),
                    record.error,
                    record.completed_at.as_ref().map(ts),
                    record.id,
                ],
            )
            .map_err(|e| CadenceError::store(format!("Complete execution: {e}")))?;
        if updated == 0 {
            tracing::warn!(
                "⚠️ Execution {} already terminal, ignoring completion",
                record.id
            );
        }
        Ok(())
    }
}

impl SyncStore for EngineDb {
    fn active_registrations(&self) -> Result<Vec<DataSourceRegistration>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{} WHERE active=1 ORDER BY created_at", SOURCE_SELECT))
            .map_err(|e| CadenceError::store(format!("Prepare: {e}")))?;
        let regs = stmt
            .query_map([], row_to_registration)
            .map_err(|e| CadenceError::store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(regs)
    }

    fn mark_registration_synced(
        &self,
        registration_id: &str,
        next_run: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE data_sources SET next_scheduled_run=?1, last_run_at=?2, last_run_status='success', last_run_error=NULL WHERE id=?3",
                params![next_run.as_ref().map(ts), ts(&at), registration_id],
            )
            .map_err(|e| CadenceError::store(format!("Mark synced: {e}")))?;
        Ok(())
    }

    fn mark_registration_failed(
        &self,
        registration_id: &str,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        // next_scheduled_run deliberately untouched.
        self.conn()?
            .execute(
                "UPDATE data_sources SET last_run_at=?1, last_run_status='error', last_run_error=?2 WHERE id=?3",
                params![ts(&at), error, registration_id],
            )
            .map_err(|e| CadenceError::store(format!("Mark failed: {e}")))?;
        Ok(())
    }

    fn insert_sync_run(&self, run: &SyncRun) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO sync_runs
                 (id, data_source_id, cause, status, started_at, records_fetched, records_processed)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    run.id,
                    run.data_source_id,
                    run.cause.as_str(),
                    run.status.as_str(),
                    ts(&run.started_at),
                    run.records_fetched,
                    run.records_processed,
                ],
            )
            .map_err(|e| CadenceError::store(format!("Open sync run: {e}")))?;
        Ok(())
    }

    fn complete_sync_run(&self, run: &SyncRun) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE sync_runs SET status=?1, completed_at=?2, records_fetched=?3, records_processed=?4, error=?5 WHERE id=?6",
                params![
                    run.status.as_str(),
                    run.completed_at.as_ref().map(ts),
                    run.records_fetched,
                    run.records_processed,
                    run.error,
                    run.id,
                ],
            )
            .map_err(|e| CadenceError::store(format!("Complete sync run: {e}")))?;
        Ok(())
    }

    fn stored_record(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        match self.conn()?.query_row(
            "SELECT data_json FROM sync_records WHERE source_id=?1 AND external_id=?2",
            params![source_id, external_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CadenceError::store(format!("Parse stored record: {e}"))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CadenceError::store(format!("Get stored record: {e}"))),
        }
    }

    fn upsert_record(
        &self,
        source_id: &str,
        external_id: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO sync_records (source_id, external_id, data_json, updated_at)
                 VALUES (?1,?2,?3,?4)
                 ON CONFLICT(source_id, external_id) DO UPDATE SET
                   data_json=excluded.data_json, updated_at=excluded.updated_at",
                params![source_id, external_id, data.to_string(), ts(&Utc::now())],
            )
            .map_err(|e| CadenceError::store(format!("Upsert record: {e}")))?;
        Ok(())
    }

    fn open_interval(
        &self,
        source_id: &str,
        entity_id: &str,
    ) -> Result<Option<StageHistoryInterval>> {
        match self.conn()?.query_row(
            &format!(
                "{} WHERE source_id=?1 AND entity_id=?2 AND exited_at IS NULL",
                INTERVAL_SELECT
            ),
            params![source_id, entity_id],
            row_to_interval,
        ) {
            Ok(interval) => Ok(Some(interval)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CadenceError::store(format!("Get open interval: {e}"))),
        }
    }

    fn close_interval(&self, interval_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn()?
            .execute(
                "UPDATE stage_history SET exited_at=?1 WHERE id=?2 AND exited_at IS NULL",
                params![ts(&at), interval_id],
            )
            .map_err(|e| CadenceError::store(format!("Close interval: {e}")))?;
        Ok(())
    }

    fn insert_interval(&self, interval: &StageHistoryInterval) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO stage_history (id, source_id, entity_id, from_stage, to_stage, entered_at, exited_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    interval.id,
                    interval.source_id,
                    interval.entity_id,
                    interval.from_stage,
                    interval.to_stage,
                    ts(&interval.entered_at),
                    interval.exited_at.as_ref().map(ts),
                ],
            )
            .map_err(|e| CadenceError::store(format!("Insert interval: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_automation::ExecutionStatus;
    use cadence_core::ActionSpec;
    use serde_json::json;

    fn temp_db() -> EngineDb {
        EngineDb::open_in_memory().unwrap()
    }

    fn sample_rule(tenant: &str) -> AutomationRule {
        AutomationRule::new(
            tenant,
            TriggerEvent::RockStatusChanged,
            json!({"new_status": "off_track"}),
            ActionSpec::ChannelMessage {
                destination: "leadership".into(),
                template: "Rock {{rock_id}} is {{new_status}}".into(),
            },
        )
    }

    #[test]
    fn test_rule_roundtrip_and_trigger_bookkeeping() {
        let db = temp_db();
        let rule = sample_rule("t1");
        db.save_rule(&rule).unwrap();
        db.save_rule(&sample_rule("t2")).unwrap();

        let rules = db.rules_for_tenant("t1").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].trigger, TriggerEvent::RockStatusChanged);
        assert_eq!(rules[0].conditions, rule.conditions);
        assert_eq!(rules[0].action, rule.action);

        db.record_trigger(&rule.id).unwrap();
        db.record_trigger(&rule.id).unwrap();
        let updated = db.rule(&rule.id).unwrap().unwrap();
        assert_eq!(updated.run_count, 2);
        assert!(updated.last_triggered.is_some());

        assert!(db.rule("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_rule_validates() {
        let db = temp_db();
        let mut rule = sample_rule("t1");
        rule.conditions = json!(["not", "a", "map"]);
        assert!(db.save_rule(&rule).is_err());
        assert!(db.rules_for_tenant("t1").unwrap().is_empty());
    }

    #[test]
    fn test_execution_dedup_on_rule_event_pair() {
        let db = temp_db();

        let record = match db.begin("r1", Some("e1"), false).unwrap() {
            BeginOutcome::Started(record) => record,
            BeginOutcome::AlreadyExecuted(_) => panic!("first begin must start"),
        };
        let mut done = record.clone();
        done.mark_success(json!({"message_id": "m1"}));
        db.complete(&done).unwrap();

        // Redelivery finds the finished record.
        match db.begin("r1", Some("e1"), false).unwrap() {
            BeginOutcome::AlreadyExecuted(existing) => {
                assert_eq!(existing.id, record.id);
                assert_eq!(existing.status, ExecutionStatus::Success);
            }
            BeginOutcome::Started(_) => panic!("redelivery must not start a new attempt"),
        }

        // A different event starts fresh.
        assert!(matches!(
            db.begin("r1", Some("e2"), false).unwrap(),
            BeginOutcome::Started(_)
        ));
    }

    #[test]
    fn test_test_runs_never_deduplicate() {
        let db = temp_db();
        for _ in 0..2 {
            assert!(matches!(
                db.begin("r1", None, true).unwrap(),
                BeginOutcome::Started(_)
            ));
        }
        let records = db.recent_executions(10).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.test_run));
    }

    #[test]
    fn test_complete_refuses_terminal_overwrite() {
        let db = temp_db();
        let record = match db.begin("r1", Some("e1"), false).unwrap() {
            BeginOutcome::Started(record) => record,
            _ => panic!(),
        };

        let mut success = record.clone();
        success.mark_success(json!({"ok": true}));
        db.complete(&success).unwrap();

        let mut stomp = record;
        stomp.mark_error("late failure".into());
        db.complete(&stomp).unwrap();

        let records = db.recent_executions(10).unwrap();
        assert_eq!(records[0].status, ExecutionStatus::Success);
    }

    #[test]
    fn test_registration_bookkeeping() {
        let db = temp_db();
        let reg = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Hourly);
        db.save_registration(&reg).unwrap();

        let mut inactive = DataSourceRegistration::new("t1", "pipeline_crm", SyncFrequency::Daily);
        inactive.active = false;
        db.save_registration(&inactive).unwrap();

        let active = db.active_registrations().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, reg.id);

        let now = Utc::now();
        let next = now + chrono::Duration::hours(1);
        db.mark_registration_synced(&reg.id, Some(next), now).unwrap();
        let after = db.registration(&reg.id).unwrap().unwrap();
        assert_eq!(after.last_run_status.as_deref(), Some("success"));
        assert!(after.next_scheduled_run.is_some());

        db.mark_registration_failed(&reg.id, now, "boom").unwrap();
        let failed = db.registration(&reg.id).unwrap().unwrap();
        assert_eq!(failed.last_run_status.as_deref(), Some("error"));
        assert_eq!(failed.last_run_error.as_deref(), Some("boom"));
        // Failure leaves the schedule where success put it.
        assert_eq!(
            failed.next_scheduled_run.map(|t| t.timestamp()),
            Some(next.timestamp())
        );
    }

    #[test]
    fn test_sync_run_lifecycle_and_orphan_cleanup() {
        let db = temp_db();
        let mut run = SyncRun::begin("src-1", SyncCause::Scheduled);
        db.insert_sync_run(&run).unwrap();

        run.records_fetched = 10;
        run.records_processed = 3;
        run.status = SyncRunStatus::Success;
        run.completed_at = Some(Utc::now());
        db.complete_sync_run(&run).unwrap();

        let orphan = SyncRun::begin("src-1", SyncCause::Manual);
        db.insert_sync_run(&orphan).unwrap();
        assert_eq!(db.cancel_orphaned_runs().unwrap(), 1);

        let runs = db.recent_sync_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        let cancelled = runs.iter().find(|r| r.id == orphan.id).unwrap();
        assert_eq!(cancelled.status, SyncRunStatus::Cancelled);
        let finished = runs.iter().find(|r| r.id == run.id).unwrap();
        assert_eq!(finished.records_fetched, 10);
        assert_eq!(finished.records_processed, 3);
    }

    #[test]
    fn test_record_upsert_and_diff_lookup() {
        let db = temp_db();
        assert!(db.stored_record("s1", "rock-1").unwrap().is_none());

        db.upsert_record("s1", "rock-1", &json!({"status": "on_track"}))
            .unwrap();
        assert_eq!(
            db.stored_record("s1", "rock-1").unwrap().unwrap()["status"],
            "on_track"
        );

        db.upsert_record("s1", "rock-1", &json!({"status": "off_track"}))
            .unwrap();
        assert_eq!(
            db.stored_record("s1", "rock-1").unwrap().unwrap()["status"],
            "off_track"
        );
    }

    #[test]
    fn test_stage_intervals() {
        let db = temp_db();
        let t0 = Utc::now();
        let first = StageHistoryInterval::open("s1", "rock-1", None, "on_track", t0);
        db.insert_interval(&first).unwrap();

        let open = db.open_interval("s1", "rock-1").unwrap().unwrap();
        assert_eq!(open.id, first.id);
        assert_eq!(open.source_id, "s1");

        let t1 = t0 + chrono::Duration::days(2);
        db.close_interval(&first.id, t1).unwrap();
        assert!(db.open_interval("s1", "rock-1").unwrap().is_none());

        let second = StageHistoryInterval::open("s1", "rock-1", Some("on_track"), "complete", t1);
        db.insert_interval(&second).unwrap();

        let history = db.stage_history("s1", "rock-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to_stage, "on_track");
        assert!(history[0].exited_at.is_some());
        assert_eq!(history[1].from_stage.as_deref(), Some("on_track"));
        assert!(history[1].exited_at.is_none());
    }

    #[test]
    fn test_stage_intervals_scoped_by_source() {
        let db = temp_db();
        let now = Utc::now();

        // Two sources whose providers reuse external id "42".
        db.insert_interval(&StageHistoryInterval::open("s1", "42", None, "on_track", now))
            .unwrap();
        db.insert_interval(&StageHistoryInterval::open("s2", "42", None, "qualified", now))
            .unwrap();

        assert_eq!(
            db.open_interval("s1", "42").unwrap().unwrap().to_stage,
            "on_track"
        );
        assert_eq!(
            db.open_interval("s2", "42").unwrap().unwrap().to_stage,
            "qualified"
        );
        assert_eq!(db.stage_history("s1", "42").unwrap().len(), 1);
        assert_eq!(db.stage_history("s2", "42").unwrap().len(), 1);
    }
}
