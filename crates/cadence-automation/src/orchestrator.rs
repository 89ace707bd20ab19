//! Automation orchestrator — drives the per-(rule, event) state machine:
//! pending → running → {success | skipped | error}.
//!
//! Rules are iterated independently with isolated failure handling; one
//! rule's error never blocks the others. Within this pass there is no
//! retry — a retryable failure asks the event substrate for a redelivery
//! of the whole event, which the execution-log dedup key makes safe.

use std::sync::Arc;

use serde_json::Value;

use cadence_core::{AutomationRule, CadenceError, DomainEvent, Redelivery, TriggerEvent};

use crate::conditions;
use crate::dispatch::ActionDispatcher;
use crate::log::{ActionExecutionRecord, BeginOutcome, ExecutionLog};
use crate::matcher::{RuleStore, find_candidates};

pub struct Orchestrator {
    rules: Arc<dyn RuleStore>,
    log: Arc<dyn ExecutionLog>,
    dispatcher: ActionDispatcher,
    redelivery: Option<Arc<dyn Redelivery>>,
}

impl Orchestrator {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        log: Arc<dyn ExecutionLog>,
        dispatcher: ActionDispatcher,
    ) -> Self {
        Self {
            rules,
            log,
            dispatcher,
            redelivery: None,
        }
    }

    /// Attach the substrate's redeliver-with-backoff capability.
    pub fn with_redelivery(mut self, redelivery: Arc<dyn Redelivery>) -> Self {
        self.redelivery = Some(redelivery);
        self
    }

    /// Process one inbound event: match rules, then run each matched
    /// rule's pipeline independently. Returns the execution records of
    /// this pass (empty when the event has no subscribers).
    pub async fn handle_event(&self, event: &DomainEvent) -> Vec<ActionExecutionRecord> {
        let candidates =
            match find_candidates(self.rules.as_ref(), &event.tenant_id, event.event_type) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Rule lookup failed for event {}: {e}", event.id);
                    return Vec::new();
                }
            };
        if candidates.is_empty() {
            tracing::debug!("Event {} ({}) has no subscribers", event.id, event.event_type);
            return Vec::new();
        }

        tracing::info!(
            "⚡ Event {} ({}) matched {} rule(s)",
            event.id,
            event.event_type,
            candidates.len()
        );

        let mut records = Vec::with_capacity(candidates.len());
        let mut wants_redelivery = false;
        for rule in &candidates {
            let (record, retryable) = self.run_rule(rule, event).await;
            wants_redelivery |= retryable;
            records.push(record);
        }

        if wants_redelivery {
            if let Some(redelivery) = &self.redelivery {
                if let Err(e) = redelivery.schedule(event, 1).await {
                    tracing::warn!("⚠️ Redelivery scheduling failed for event {}: {e}", event.id);
                }
            }
        }

        records
    }

    /// Execute a single rule's pipeline synchronously against supplied
    /// event data, without a live domain event. The record is tagged as
    /// a test run and never deduplicated.
    pub async fn run_test(
        &self,
        rule_id: &str,
        trigger: TriggerEvent,
        event_data: Value,
    ) -> cadence_core::Result<ActionExecutionRecord> {
        let rule = self
            .rules
            .rule(rule_id)?
            .ok_or_else(|| CadenceError::config(format!("unknown automation rule '{rule_id}'")))?;
        let event = DomainEvent::new(&rule.tenant_id, trigger, event_data);
        let (record, _) = self.run_one(&rule, &event, true).await;
        Ok(record)
    }

    async fn run_rule(
        &self,
        rule: &AutomationRule,
        event: &DomainEvent,
    ) -> (ActionExecutionRecord, bool) {
        self.run_one(rule, event, false).await
    }

    /// Drive one (rule, event) pair to a terminal state. Returns the
    /// record and whether the failure (if any) warrants redelivery.
    async fn run_one(
        &self,
        rule: &AutomationRule,
        event: &DomainEvent,
        test_run: bool,
    ) -> (ActionExecutionRecord, bool) {
        let event_id = if test_run { None } else { Some(event.id.as_str()) };
        let mut record = match self.log.begin(&rule.id, event_id, test_run) {
            Ok(BeginOutcome::Started(record)) => record,
            Ok(BeginOutcome::AlreadyExecuted(record)) => {
                tracing::debug!(
                    "Dedup hit: rule {} already executed for event {}",
                    rule.id,
                    event.id
                );
                return (record, false);
            }
            Err(e) => {
                // Could not open the attempt: report it as an unpersisted
                // error record so the caller still sees the failure.
                tracing::error!("Execution log unavailable for rule {}: {e}", rule.id);
                let mut record = ActionExecutionRecord::begin(&rule.id, event_id, test_run);
                record.mark_error(format!("execution log unavailable: {e}"));
                return (record, e.is_retryable());
            }
        };

        if !conditions::evaluate(&rule.conditions, &event.payload) {
            record.mark_skipped();
            self.persist(&record);
            tracing::debug!("Rule {} skipped: conditions not met", rule.id);
            return (record, false);
        }

        match self
            .dispatcher
            .execute(&event.tenant_id, &rule.action, &event.payload)
            .await
        {
            Ok(outcome) => {
                record.mark_success(outcome.to_result_json());
                self.persist(&record);
                if !test_run {
                    if let Err(e) = self.rules.record_trigger(&rule.id) {
                        tracing::warn!("⚠️ Trigger bookkeeping failed for rule {}: {e}", rule.id);
                    }
                }
                tracing::info!("✅ Rule {} ({}) succeeded", rule.id, rule.action.kind());
                (record, false)
            }
            Err(e) => {
                let retryable = e.is_retryable() && !test_run;
                record.mark_error(e.to_string());
                self.persist(&record);
                tracing::warn!("⚠️ Rule {} ({}) failed: {e}", rule.id, rule.action.kind());
                (record, retryable)
            }
        }
    }

    fn persist(&self, record: &ActionExecutionRecord) {
        if let Err(e) = self.log.complete(record) {
            tracing::error!("Failed to persist execution record {}: {e}", record.id);
        }
    }
}
