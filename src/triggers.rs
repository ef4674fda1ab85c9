//! # Triggers — Rule Selection for Incoming Events
//!
//! A trigger rule listens for one event kind, carries a condition tree (see
//! [`crate::conditions`]) and a cooldown in minutes. For an incoming event the
//! registry:
//!
//! 1. asks the store for enabled rules on `event.kind` that are off cooldown
//!    (ordered by rule id, so results are stable for a given storage state)
//! 2. keeps the rules whose conditions match the event's fields
//!
//! Selection is read-only. Firing is a separate conditional write,
//! [`TriggerRegistry::fire`], which re-checks the cooldown atomically so two
//! evaluators racing on the same event fire a rule at most once per window.
//! What a fired rule *does* is up to the caller.

use crate::conditions::ConditionTree;
use crate::error::OpsResult;
use crate::store::OpsStore;
use crate::types::{AgentEvent, NewTriggerRule, TriggerRule};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A rule may fire when it never fired, or its last firing is strictly older
/// than `now - cooldown`.
pub fn is_off_cooldown(last_fired_at: Option<DateTime<Utc>>, cooldown: Duration, now: DateTime<Utc>) -> bool {
    match last_fired_at {
        None => true,
        Some(at) => at < now - cooldown,
    }
}

#[derive(Clone)]
pub struct TriggerRegistry<S> {
    store: S,
}

impl<S: OpsStore> TriggerRegistry<S> {
    pub fn new(store: S) -> Self {
        TriggerRegistry { store }
    }

    /// Register a rule. Its conditions are validated up front.
    pub async fn create_rule(&self, rule: &NewTriggerRule) -> OpsResult<Uuid> {
        let tree = ConditionTree::parse(&rule.conditions)?;
        let id = self.store.insert_trigger_rule(rule, Utc::now()).await?;
        info!(
            rule_id = %id,
            name = %rule.name,
            trigger_event = %rule.trigger_event,
            conditions = tree.len(),
            cooldown_minutes = rule.cooldown_minutes,
            "trigger rule created"
        );
        Ok(id)
    }

    /// Rules that would fire for `event` at `now`. No side effects.
    pub async fn find_matching(&self, event: &AgentEvent, now: DateTime<Utc>) -> OpsResult<Vec<TriggerRule>> {
        let candidates = self.store.list_trigger_candidates(&event.kind, now).await?;
        let fields = event.condition_fields();
        let mut matched = Vec::new();
        for rule in candidates {
            let tree = match ConditionTree::parse(&rule.conditions) {
                Ok(tree) => tree,
                Err(e) => {
                    warn!(rule_id = %rule.id, name = %rule.name, error = %e, "skipping rule with invalid conditions");
                    continue;
                }
            };
            if tree.matches(&fields) {
                matched.push(rule);
            }
        }
        debug!(event_kind = %event.kind, matched = matched.len(), "trigger rules evaluated");
        Ok(matched)
    }

    /// Record that `rule_id` fired at `now`. False if the rule is unknown or
    /// still on cooldown, including when a concurrent caller just fired it.
    pub async fn fire(&self, rule_id: Uuid, now: DateTime<Utc>) -> OpsResult<bool> {
        let fired = self.store.mark_trigger_fired(rule_id, now).await?;
        if fired {
            info!(rule_id = %rule_id, "trigger fired");
        }
        Ok(fired)
    }

    /// Find matching rules and fire each one, returning those this call fired.
    pub async fn evaluate(&self, event: &AgentEvent, now: DateTime<Utc>) -> OpsResult<Vec<TriggerRule>> {
        let mut fired = Vec::new();
        for rule in self.find_matching(event, now).await? {
            if self.fire(rule.id, now).await? {
                fired.push(rule);
            }
        }
        Ok(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;
    use crate::store::MemoryStore;
    use crate::types::NewAgentEvent;
    use serde_json::{json, Value};

    fn rule(name: &str, event: &str, conditions: Value, cooldown_minutes: i32) -> NewTriggerRule {
        NewTriggerRule {
            name: name.into(),
            trigger_event: event.into(),
            conditions,
            cooldown_minutes,
            enabled: true,
        }
    }

    fn trade_closed(pnl: f64) -> AgentEvent {
        let mut event = NewAgentEvent::new("scout", "trade_closed", "closed BTC");
        event.pnl = Some(pnl);
        event.into_event(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn cooldown_boundary_is_strict() {
        let now = Utc::now();
        let cd = Duration::minutes(10);
        assert!(is_off_cooldown(None, cd, now));
        assert!(!is_off_cooldown(Some(now - Duration::minutes(5)), cd, now));
        assert!(!is_off_cooldown(Some(now - cd), cd, now));
        assert!(is_off_cooldown(Some(now - Duration::minutes(11)), cd, now));
    }

    #[tokio::test]
    async fn matches_on_kind_and_conditions() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new(store.clone());
        let big_win = registry
            .create_rule(&rule("big-win", "trade_closed", json!({"pnl": {"$gt": 500}}), 0))
            .await
            .unwrap();
        registry
            .create_rule(&rule("loss", "trade_closed", json!({"pnl": {"$lt": 0}}), 0))
            .await
            .unwrap();
        registry
            .create_rule(&rule("opened", "trade_opened", json!({}), 0))
            .await
            .unwrap();

        let matched = registry.find_matching(&trade_closed(900.0), Utc::now()).await.unwrap();
        let ids: Vec<_> = matched.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![big_win]);
    }

    #[tokio::test]
    async fn disabled_rules_are_ignored() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new(store);
        let mut disabled = rule("off", "trade_closed", json!({}), 0);
        disabled.enabled = false;
        registry.create_rule(&disabled).await.unwrap();
        assert!(registry
            .find_matching(&trade_closed(1.0), Utc::now())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn cooldown_excludes_then_readmits_rule() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new(store.clone());
        let id = registry
            .create_rule(&rule("any-close", "trade_closed", json!({}), 30))
            .await
            .unwrap();
        let now = Utc::now();

        store.set_last_fired(id, Some(now - Duration::minutes(10)));
        assert!(registry.find_matching(&trade_closed(1.0), now).await.unwrap().is_empty());

        store.set_last_fired(id, Some(now - Duration::minutes(31)));
        let matched = registry.find_matching(&trade_closed(1.0), now).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, id);
    }

    #[tokio::test]
    async fn find_matching_does_not_fire() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new(store.clone());
        registry
            .create_rule(&rule("any-close", "trade_closed", json!({}), 30))
            .await
            .unwrap();
        let now = Utc::now();
        assert_eq!(registry.find_matching(&trade_closed(1.0), now).await.unwrap().len(), 1);
        assert_eq!(registry.find_matching(&trade_closed(1.0), now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn evaluate_fires_once_per_window() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new(store.clone());
        registry
            .create_rule(&rule("any-close", "trade_closed", json!({}), 30))
            .await
            .unwrap();
        let now = Utc::now();

        let first = registry.evaluate(&trade_closed(1.0), now).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = registry.evaluate(&trade_closed(1.0), now).await.unwrap();
        assert!(second.is_empty());
        assert!(!registry.fire(first[0].id, now).await.unwrap());

        let later = now + Duration::minutes(31);
        assert_eq!(registry.evaluate(&trade_closed(1.0), later).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_conditions_rejected_on_create() {
        let registry = TriggerRegistry::new(MemoryStore::new());
        let err = registry
            .create_rule(&rule("bad", "trade_closed", json!({"pnl": {"$between": [1, 2]}}), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::InvalidCondition(_)));
    }

    #[tokio::test]
    async fn stored_rule_with_bad_conditions_is_skipped() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new(store.clone());
        // Bypass validation to simulate a row written by another tool.
        store
            .insert_trigger_rule(&rule("bad", "trade_closed", json!("pnl > 5"), 0), Utc::now())
            .await
            .unwrap();
        let good = registry
            .create_rule(&rule("good", "trade_closed", json!({}), 0))
            .await
            .unwrap();
        let matched = registry.find_matching(&trade_closed(1.0), Utc::now()).await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, good);
    }

    #[tokio::test]
    async fn metadata_fields_are_matchable() {
        let store = MemoryStore::new();
        let registry = TriggerRegistry::new(store);
        registry
            .create_rule(&rule("btc-only", "trade_closed", json!({"symbol": "BTC"}), 0))
            .await
            .unwrap();
        let mut event = NewAgentEvent::new("scout", "trade_closed", "closed");
        event.metadata = Some(json!({"symbol": "ETH"}));
        let event = event.into_event(Uuid::new_v4(), Utc::now());
        assert!(registry.find_matching(&event, Utc::now()).await.unwrap().is_empty());
    }
}
