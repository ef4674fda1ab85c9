//! Mission step operations.
//!
//! Workers poll `get_queued_steps`, then race on `claim_mission_step`. The
//! claim and the completion are each one conditional `UPDATE`, so the row
//! lock decides the winner and `rows_affected` reports it.

use super::Database;
use crate::error::{OpsError, OpsResult};
use crate::types::{FinishedStep, MissionStep, NewStep, QueuedStep, StepOutcome, StepStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    /// Queue a step on an existing mission. `NotFound` if the mission is missing.
    pub async fn create_step(&self, step: &NewStep, now: DateTime<Utc>) -> OpsResult<Uuid> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT INTO ops_mission_steps
                 (id, mission_id, kind, payload, assigned_to, status, timeout_at, created_at)
             SELECT $1, $2, $3, $4, $5, 'queued', $6, $7
             WHERE EXISTS (SELECT 1 FROM ops_missions WHERE id = $2)",
        )
        .bind(id)
        .bind(step.mission_id)
        .bind(&step.kind)
        .bind(&step.payload)
        .bind(step.assigned_to.as_deref())
        .bind(step.timeout_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OpsError::not_found("mission", step.mission_id));
        }
        Ok(id)
    }

    pub async fn fetch_step(&self, id: Uuid) -> OpsResult<Option<MissionStep>> {
        let row = sqlx::query_as::<_, MissionStep>(
            "SELECT id, mission_id, seq, kind, payload, assigned_to, status, timeout_at,
                    result, error, created_at, started_at, completed_at
             FROM ops_mission_steps WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_mission_steps(&self, mission_id: Uuid) -> OpsResult<Vec<MissionStep>> {
        let rows = sqlx::query_as::<_, MissionStep>(
            "SELECT id, mission_id, seq, kind, payload, assigned_to, status, timeout_at,
                    result, error, created_at, started_at, completed_at
             FROM ops_mission_steps
             WHERE mission_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(mission_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Queued steps with a deadline after `now`, oldest first, joined with
    /// their mission's title and creator. `kind = None` means any kind.
    pub async fn get_queued_steps(
        &self,
        kind: Option<&str>,
        limit: i64,
        now: DateTime<Utc>,
    ) -> OpsResult<Vec<QueuedStep>> {
        let rows = sqlx::query_as::<_, QueuedStep>(
            "SELECT s.id, s.mission_id, s.seq, s.kind, s.payload, s.assigned_to, s.status,
                    s.timeout_at, s.result, s.error, s.created_at, s.started_at, s.completed_at,
                    m.title AS mission_title, m.created_by AS mission_created_by
             FROM ops_mission_steps s
             JOIN ops_missions m ON m.id = s.mission_id
             WHERE s.status = 'queued'
               AND s.timeout_at > $1
               AND ($2::text IS NULL OR s.kind = $2)
             ORDER BY s.created_at ASC, s.seq ASC
             LIMIT $3",
        )
        .bind(now)
        .bind(kind)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// queued → running. False if the step is unknown or no longer queued.
    pub async fn claim_mission_step(&self, id: Uuid, assigned_to: &str, now: DateTime<Utc>) -> OpsResult<bool> {
        let result = sqlx::query(
            "UPDATE ops_mission_steps
             SET status = 'running', assigned_to = $2, started_at = $3
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .bind(assigned_to)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// running → succeeded/failed. `None` if the step was not running.
    pub async fn complete_mission_step(
        &self,
        id: Uuid,
        outcome: &StepOutcome,
        now: DateTime<Utc>,
    ) -> OpsResult<Option<FinishedStep>> {
        let status: StepStatus = outcome.status();
        let mission_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE ops_mission_steps
             SET status = $2, result = $3, error = $4, completed_at = $5
             WHERE id = $1 AND status = 'running'
             RETURNING mission_id",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(outcome.result().cloned())
        .bind(outcome.error())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(mission_id.map(|mission_id| FinishedStep {
            step_id: id,
            mission_id,
            status,
        }))
    }
}
