//! Agent event log. Rows are never updated.

use super::Database;
use crate::error::OpsResult;
use crate::types::{AgentEvent, NewAgentEvent};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    pub async fn insert_agent_event(&self, event: NewAgentEvent, now: DateTime<Utc>) -> OpsResult<AgentEvent> {
        let event = event.into_event(Uuid::new_v4(), now);
        sqlx::query(
            "INSERT INTO ops_agent_events
                 (id, agent_id, kind, title, summary, tags, trade_id, pnl, pnl_percent,
                  metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(event.id)
        .bind(&event.agent_id)
        .bind(&event.kind)
        .bind(&event.title)
        .bind(&event.summary)
        .bind(&event.tags)
        .bind(event.trade_id)
        .bind(event.pnl)
        .bind(event.pnl_percent)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(event)
    }

    /// Most recent events first, optionally of one kind.
    pub async fn get_recent_events(&self, kind: Option<&str>, limit: i64) -> OpsResult<Vec<AgentEvent>> {
        let rows = sqlx::query_as::<_, AgentEvent>(
            "SELECT id, agent_id, kind, title, summary, tags, trade_id, pnl, pnl_percent,
                    metadata, created_at
             FROM ops_agent_events
             WHERE ($1::text IS NULL OR kind = $1)
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(kind)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
