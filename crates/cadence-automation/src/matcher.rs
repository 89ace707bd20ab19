//! Rule matcher — loads a tenant's rules and selects the candidates for
//! an event type. Condition evaluation happens later, per rule, in the
//! orchestrator.

use cadence_core::{AutomationRule, Result, TriggerEvent};

/// Read seam over rule storage. The engine never writes rule content;
/// it only bumps trigger bookkeeping.
pub trait RuleStore: Send + Sync {
    /// All rules configured for a tenant, active or not.
    fn rules_for_tenant(&self, tenant_id: &str) -> Result<Vec<AutomationRule>>;

    /// Look up a single rule (manual test runs).
    fn rule(&self, rule_id: &str) -> Result<Option<AutomationRule>>;

    /// Bump run_count / last_triggered after a successful dispatch.
    fn record_trigger(&self, rule_id: &str) -> Result<()>;
}

/// Active rules subscribed to `trigger` for this tenant. An empty result
/// is valid — the event simply has no subscribers. Ordering is
/// unspecified; rules are independent of each other.
pub fn find_candidates(
    store: &dyn RuleStore,
    tenant_id: &str,
    trigger: TriggerEvent,
) -> Result<Vec<AutomationRule>> {
    let rules = store.rules_for_tenant(tenant_id)?;
    Ok(rules
        .into_iter()
        .filter(|r| r.active && r.trigger == trigger)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ActionSpec;
    use std::sync::Mutex;

    struct FakeRules(Mutex<Vec<AutomationRule>>);

    impl RuleStore for FakeRules {
        fn rules_for_tenant(&self, tenant_id: &str) -> Result<Vec<AutomationRule>> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.tenant_id == tenant_id)
                .cloned()
                .collect())
        }

        fn rule(&self, rule_id: &str) -> Result<Option<AutomationRule>> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == rule_id)
                .cloned())
        }

        fn record_trigger(&self, _rule_id: &str) -> Result<()> {
            Ok(())
        }
    }

    fn webhook_rule(tenant: &str, trigger: TriggerEvent, active: bool) -> AutomationRule {
        let mut rule = AutomationRule::new(
            tenant,
            trigger,
            serde_json::Value::Null,
            ActionSpec::OutboundWebhook {
                url: "https://example.com/hook".into(),
                headers: vec![],
            },
        );
        rule.active = active;
        rule
    }

    #[test]
    fn test_filters_by_trigger_active_and_tenant() {
        let store = FakeRules(Mutex::new(vec![
            webhook_rule("t1", TriggerEvent::IssueQueued, true),
            webhook_rule("t1", TriggerEvent::IssueQueued, false),
            webhook_rule("t1", TriggerEvent::MeetingCompleted, true),
            webhook_rule("t2", TriggerEvent::IssueQueued, true),
        ]));

        let found = find_candidates(&store, "t1", TriggerEvent::IssueQueued).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].active);
        assert_eq!(found[0].tenant_id, "t1");
    }

    #[test]
    fn test_no_subscribers_is_empty_not_error() {
        let store = FakeRules(Mutex::new(vec![]));
        let found = find_candidates(&store, "t1", TriggerEvent::TodoOverdue).unwrap();
        assert!(found.is_empty());
    }
}
