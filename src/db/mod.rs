//! # Database — PostgreSQL Storage Layer
//!
//! Durable [`OpsStore`] over `sqlx::PgPool`. The schema lives in
//! `migrations/001_ops_schema.sql`.
//!
//! ## Schema
//!
//! - `ops_trading_proposals`: agent proposals, their step templates and review status
//! - `ops_missions`: one mission per compiled proposal, `running` until settled
//! - `ops_mission_steps`: claimable units of work with a claim deadline
//! - `ops_trigger_rules`: event-kind listeners with conditions and cooldown
//! - `ops_agent_events`: append-only event log
//!
//! ## Module Structure
//!
//! - [`proposals`] — proposal CRUD and the compile transaction
//! - [`missions`] — mission lookup and settlement
//! - [`steps`] — step insert, claim, completion, claimable queue
//! - [`triggers`] — rule insert, candidate selection, firing
//! - [`events`] — event log
//!
//! Every status change is a conditional `UPDATE ... WHERE status = X`, so
//! racing callers resolve on the row itself and `rows_affected` tells each
//! one whether it won.

mod events;
mod missions;
mod proposals;
mod steps;
mod triggers;

use crate::compiler::CompileOptions;
use crate::error::OpsResult;
use crate::store::OpsStore;
use crate::types::{
    AgentEvent, CompiledMission, FinishedStep, Mission, MissionStatus, MissionStep,
    NewAgentEvent, NewProposal, NewStep, NewTriggerRule, PendingProposal, Proposal,
    ProposalStatus, QueuedStep, StepOutcome, TriggerRule,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

// ── Database struct and connection ──────────────────────────────

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Parse a `postgres://` URL by hand so the username survives intact.
///
/// sqlx's own parser strips the `.project-ref` suffix that pooled hosted
/// Postgres requires. Percent-encoded credentials are decoded.
pub(crate) fn connect_options(database_url: &str) -> Result<PgConnectOptions> {
    let url = url::Url::parse(database_url)?;
    let username = urlencoding::decode(url.username())?.into_owned();
    let password = url
        .password()
        .map(|p| urlencoding::decode(p).map(|s| s.into_owned()))
        .transpose()?;
    let mut opts = PgConnectOptions::new()
        .host(url.host_str().unwrap_or("localhost"))
        .port(url.port().unwrap_or(5432))
        .database(url.path().trim_start_matches('/'))
        .username(&username)
        .statement_cache_capacity(0);
    if let Some(ref pw) = password {
        opts = opts.password(pw);
    }
    Ok(opts)
}

impl Database {
    /// Connect with [`DEFAULT_MAX_CONNECTIONS`].
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        let opts = connect_options(database_url)?;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Ok(Database { pool })
    }

    /// Wrap an existing pool (integration tests share one).
    pub fn from_pool(pool: PgPool) -> Self {
        Database { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute `SELECT 1` to verify connectivity.
    pub async fn health_check(&self) -> OpsResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}

// ── OpsStore ────────────────────────────────────────────────────

impl OpsStore for Database {
    async fn insert_proposal(&self, proposal: &NewProposal, now: DateTime<Utc>) -> OpsResult<Uuid> {
        self.create_proposal(proposal, now).await
    }

    async fn get_proposal(&self, id: Uuid) -> OpsResult<Option<Proposal>> {
        self.fetch_proposal(id).await
    }

    async fn list_pending_proposals(&self, limit: i64) -> OpsResult<Vec<PendingProposal>> {
        self.get_pending_proposals(limit).await
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> OpsResult<bool> {
        self.update_proposal_status(id, from, to, now).await
    }

    async fn compile_proposal(
        &self,
        proposal_id: Uuid,
        options: &CompileOptions,
        now: DateTime<Utc>,
    ) -> OpsResult<CompiledMission> {
        self.create_mission_from_proposal(proposal_id, options, now).await
    }

    async fn get_mission(&self, id: Uuid) -> OpsResult<Option<Mission>> {
        self.fetch_mission(id).await
    }

    async fn settle_mission(&self, mission_id: Uuid, now: DateTime<Utc>) -> OpsResult<Option<MissionStatus>> {
        self.settle_mission_status(mission_id, now).await
    }

    async fn insert_step(&self, step: &NewStep, now: DateTime<Utc>) -> OpsResult<Uuid> {
        self.create_step(step, now).await
    }

    async fn get_step(&self, id: Uuid) -> OpsResult<Option<MissionStep>> {
        self.fetch_step(id).await
    }

    async fn list_mission_steps(&self, mission_id: Uuid) -> OpsResult<Vec<MissionStep>> {
        self.get_mission_steps(mission_id).await
    }

    async fn list_claimable(
        &self,
        kind: Option<&str>,
        limit: i64,
        now: DateTime<Utc>,
    ) -> OpsResult<Vec<QueuedStep>> {
        self.get_queued_steps(kind, limit, now).await
    }

    async fn claim_step(&self, id: Uuid, assigned_to: &str, now: DateTime<Utc>) -> OpsResult<bool> {
        self.claim_mission_step(id, assigned_to, now).await
    }

    async fn complete_step(
        &self,
        id: Uuid,
        outcome: &StepOutcome,
        now: DateTime<Utc>,
    ) -> OpsResult<Option<FinishedStep>> {
        self.complete_mission_step(id, outcome, now).await
    }

    async fn insert_trigger_rule(&self, rule: &NewTriggerRule, now: DateTime<Utc>) -> OpsResult<Uuid> {
        self.create_trigger_rule(rule, now).await
    }

    async fn list_trigger_candidates(&self, event_kind: &str, now: DateTime<Utc>) -> OpsResult<Vec<TriggerRule>> {
        self.get_trigger_candidates(event_kind, now).await
    }

    async fn mark_trigger_fired(&self, rule_id: Uuid, now: DateTime<Utc>) -> OpsResult<bool> {
        self.fire_trigger_rule(rule_id, now).await
    }

    async fn record_event(&self, event: NewAgentEvent, now: DateTime<Utc>) -> OpsResult<AgentEvent> {
        self.insert_agent_event(event, now).await
    }
}

// ── Tests ───────────────────────────────────────────────────────
