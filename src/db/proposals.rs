//! Trading proposal operations.
//!
//! ## Lifecycle
//!
//! 1. `create_proposal` — agent submits, status `pending`
//! 2. `update_proposal_status` — review moves it to `accepted` or `rejected`
//!    (first caller wins)
//! 3. `create_mission_from_proposal` — one transaction turns an accepted
//!    proposal into a mission plus queued steps

use super::Database;
use crate::compiler::{plan_mission, CompileOptions};
use crate::error::{OpsError, OpsResult};
use crate::types::{CompiledMission, NewProposal, PendingProposal, Proposal, ProposalStatus};
use chrono::{DateTime, Utc};
use uuid::Uuid;

impl Database {
    pub async fn create_proposal(&self, proposal: &NewProposal, now: DateTime<Utc>) -> OpsResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO ops_trading_proposals
                 (id, agent_id, title, signal_type, entry_price, target_price, stop_loss,
                  proposed_steps, metadata, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', $10)",
        )
        .bind(id)
        .bind(&proposal.agent_id)
        .bind(&proposal.title)
        .bind(&proposal.signal_type)
        .bind(proposal.entry_price)
        .bind(proposal.target_price)
        .bind(proposal.stop_loss)
        .bind(proposal.steps_json())
        .bind(proposal.metadata_json())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn fetch_proposal(&self, id: Uuid) -> OpsResult<Option<Proposal>> {
        let row = sqlx::query_as::<_, Proposal>(
            "SELECT id, agent_id, title, signal_type, entry_price, target_price, stop_loss,
                    proposed_steps, metadata, status, created_at, accepted_at
             FROM ops_trading_proposals WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Pending proposals, newest first, each with its linked mission count.
    pub async fn get_pending_proposals(&self, limit: i64) -> OpsResult<Vec<PendingProposal>> {
        let rows = sqlx::query_as::<_, PendingProposal>(
            "SELECT p.id, p.agent_id, p.title, p.signal_type, p.entry_price, p.target_price,
                    p.stop_loss, p.proposed_steps, p.metadata, p.status, p.created_at,
                    p.accepted_at,
                    (SELECT COUNT(*) FROM ops_missions m WHERE m.proposal_id = p.id) AS mission_count
             FROM ops_trading_proposals p
             WHERE p.status = 'pending'
             ORDER BY p.created_at DESC
             LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Conditional status change. `accepted_at` is stamped on acceptance.
    pub async fn update_proposal_status(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> OpsResult<bool> {
        let result = sqlx::query(
            "UPDATE ops_trading_proposals
             SET status = $3,
                 accepted_at = CASE WHEN $3 = 'accepted' THEN $4 ELSE accepted_at END
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Compile an accepted proposal into a mission and its queued steps.
    ///
    /// The proposal row is locked with `FOR UPDATE` for the whole transaction,
    /// so two compilers racing on one proposal serialize and the second sees
    /// the first one's mission. Any error drops `tx`, which rolls back.
    /// A plan with no steps is inserted already settled.
    pub async fn create_mission_from_proposal(
        &self,
        proposal_id: Uuid,
        options: &CompileOptions,
        now: DateTime<Utc>,
    ) -> OpsResult<CompiledMission> {
        let mut tx = self.pool.begin().await?;

        let proposal = sqlx::query_as::<_, Proposal>(
            "SELECT id, agent_id, title, signal_type, entry_price, target_price, stop_loss,
                    proposed_steps, metadata, status, created_at, accepted_at
             FROM ops_trading_proposals WHERE id = $1
             FOR UPDATE",
        )
        .bind(proposal_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| OpsError::not_found("proposal", proposal_id))?;

        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ops_missions WHERE proposal_id = $1")
                .bind(proposal_id)
                .fetch_one(&mut *tx)
                .await?;
        if existing > 0 {
            return Err(OpsError::Precondition(format!(
                "proposal {} already has a mission",
                proposal_id
            )));
        }

        let plan = plan_mission(&proposal, options, now)?;
        let status = plan.initial_status();

        sqlx::query(
            "INSERT INTO ops_missions
                 (id, title, created_by, mission_type, proposal_id, metadata, status,
                  created_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(plan.mission_id)
        .bind(&plan.title)
        .bind(&plan.created_by)
        .bind(&plan.mission_type)
        .bind(proposal_id)
        .bind(&plan.metadata)
        .bind(status.as_str())
        .bind(now)
        .bind(status.is_terminal().then_some(now))
        .execute(&mut *tx)
        .await?;

        // seq is assigned by the BIGSERIAL, so insertion order is template order.
        for step in &plan.steps {
            sqlx::query(
                "INSERT INTO ops_mission_steps
                     (id, mission_id, kind, payload, assigned_to, status, timeout_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, 'queued', $6, $7)",
            )
            .bind(step.id)
            .bind(plan.mission_id)
            .bind(&step.kind)
            .bind(&step.payload)
            .bind(step.assigned_to.as_deref())
            .bind(step.timeout_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE ops_trading_proposals
             SET status = 'accepted', accepted_at = COALESCE(accepted_at, $2)
             WHERE id = $1",
        )
        .bind(proposal_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(plan.compiled())
    }
}
