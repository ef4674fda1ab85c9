//! Mission lookup and settlement.

use super::Database;
use crate::error::OpsResult;
use crate::types::{Mission, MissionStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    pub async fn fetch_mission(&self, id: Uuid) -> OpsResult<Option<Mission>> {
        let row = sqlx::query_as::<_, Mission>(
            "SELECT id, title, created_by, mission_type, proposal_id, metadata, status,
                    created_at, completed_at
             FROM ops_missions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Move a running mission to its terminal status once no step is queued
    /// or running.
    ///
    /// One statement: the status guard and the pending-step check are part of
    /// the `WHERE`, so of several concurrent callers only the first updates
    /// the row. The others re-check the guard after the row lock is released
    /// and match nothing.
    pub async fn settle_mission_status(
        &self,
        mission_id: Uuid,
        now: DateTime<Utc>,
    ) -> OpsResult<Option<MissionStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            "UPDATE ops_missions m
             SET status = CASE
                     WHEN EXISTS (
                         SELECT 1 FROM ops_mission_steps s
                         WHERE s.mission_id = m.id AND s.status = 'failed'
                     ) THEN 'failed'
                     ELSE 'succeeded'
                 END,
                 completed_at = $2
             WHERE m.id = $1
               AND m.status = 'running'
               AND NOT EXISTS (
                   SELECT 1 FROM ops_mission_steps s
                   WHERE s.mission_id = m.id AND s.status IN ('queued', 'running')
               )
             RETURNING m.status",
        )
        .bind(mission_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        status.map(|s| s.parse()).transpose()
    }
}
