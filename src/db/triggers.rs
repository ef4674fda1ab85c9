//! Trigger rule operations.
//!
//! The cooldown test `last_fired_at < now - cooldown_minutes` appears in both
//! the candidate query and the firing update. The update re-evaluates it under
//! the row lock, so two evaluators that both saw a rule as a candidate fire it
//! once.

use super::Database;
use crate::error::OpsResult;
use crate::types::{NewTriggerRule, TriggerRule};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    pub async fn create_trigger_rule(&self, rule: &NewTriggerRule, now: DateTime<Utc>) -> OpsResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO ops_trigger_rules
                 (id, name, enabled, trigger_event, conditions, cooldown_minutes, fire_count, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, 0, $7)",
        )
        .bind(id)
        .bind(&rule.name)
        .bind(rule.enabled)
        .bind(&rule.trigger_event)
        .bind(&rule.conditions)
        .bind(rule.cooldown_minutes)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_trigger_candidates(&self, event_kind: &str, now: DateTime<Utc>) -> OpsResult<Vec<TriggerRule>> {
        let rows = sqlx::query_as::<_, TriggerRule>(
            "SELECT id, name, enabled, trigger_event, conditions, cooldown_minutes,
                    last_fired_at, fire_count, created_at
             FROM ops_trigger_rules
             WHERE enabled = true
               AND trigger_event = $1
               AND (last_fired_at IS NULL
                    OR last_fired_at < $2 - INTERVAL '1 minute' * cooldown_minutes)
             ORDER BY id",
        )
        .bind(event_kind)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn fire_trigger_rule(&self, rule_id: Uuid, now: DateTime<Utc>) -> OpsResult<bool> {
        let result = sqlx::query(
            "UPDATE ops_trigger_rules
             SET last_fired_at = $2, fire_count = fire_count + 1
             WHERE id = $1
               AND enabled = true
               AND (last_fired_at IS NULL
                    OR last_fired_at < $2 - INTERVAL '1 minute' * cooldown_minutes)",
        )
        .bind(rule_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
