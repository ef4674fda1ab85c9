//! # Store — Storage Interface for the Pipeline
//!
//! Components never talk to a connection directly; they hold an [`OpsStore`]
//! and call one method per atomic operation. Each method is a single
//! linearizable step against shared storage:
//!
//! - `claim_step` / `complete_step` are conditional updates
//!   (`UPDATE ... WHERE status = X`), so concurrent callers on the same step
//!   observe exactly one winner.
//! - `settle_mission` moves a mission out of `running` only when no queued or
//!   running step remains, and only once.
//! - `compile_proposal` runs inside one transaction holding a row lock on the
//!   proposal; any failure leaves nothing behind.
//! - `mark_trigger_fired` re-checks the cooldown in the same statement that
//!   records the firing.
//!
//! The caller passes `now` into every time-dependent operation so expiry and
//! cooldown decisions are made against one clock reading.
//!
//! Implementations: [`crate::db::Database`] (PostgreSQL) and [`MemoryStore`].

mod memory;

pub use memory::MemoryStore;

use crate::compiler::CompileOptions;
use crate::error::OpsResult;
use crate::types::{
    AgentEvent, CompiledMission, FinishedStep, Mission, MissionStatus, MissionStep,
    NewAgentEvent, NewProposal, NewStep, NewTriggerRule, PendingProposal, Proposal,
    ProposalStatus, QueuedStep, StepOutcome, TriggerRule,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use uuid::Uuid;

pub trait OpsStore: Send + Sync {
    // ── Proposals ───────────────────────────────────────────────

    fn insert_proposal(
        &self,
        proposal: &NewProposal,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<Uuid>> + Send;

    fn get_proposal(&self, id: Uuid) -> impl Future<Output = OpsResult<Option<Proposal>>> + Send;

    /// Pending proposals, newest first, with their linked mission count.
    fn list_pending_proposals(
        &self,
        limit: i64,
    ) -> impl Future<Output = OpsResult<Vec<PendingProposal>>> + Send;

    /// Move a proposal from `from` to `to`. Returns false if it was not in `from`.
    fn transition_proposal(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<bool>> + Send;

    /// Create a mission and its steps from an accepted proposal, atomically.
    fn compile_proposal(
        &self,
        proposal_id: Uuid,
        options: &CompileOptions,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<CompiledMission>> + Send;

    // ── Missions ────────────────────────────────────────────────

    fn get_mission(&self, id: Uuid) -> impl Future<Output = OpsResult<Option<Mission>>> + Send;

    /// Settle a running mission whose steps are all terminal. Returns the new
    /// status, or `None` if steps are still pending or it was already settled.
    fn settle_mission(
        &self,
        mission_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<Option<MissionStatus>>> + Send;

    // ── Steps ───────────────────────────────────────────────────

    fn insert_step(
        &self,
        step: &NewStep,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<Uuid>> + Send;

    fn get_step(&self, id: Uuid) -> impl Future<Output = OpsResult<Option<MissionStep>>> + Send;

    /// Steps of one mission in creation order.
    fn list_mission_steps(
        &self,
        mission_id: Uuid,
    ) -> impl Future<Output = OpsResult<Vec<MissionStep>>> + Send;

    /// Queued steps whose deadline is after `now`, oldest first.
    fn list_claimable(
        &self,
        kind: Option<&str>,
        limit: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<Vec<QueuedStep>>> + Send;

    /// queued → running. Returns false if the step was not queued.
    fn claim_step(
        &self,
        id: Uuid,
        assigned_to: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<bool>> + Send;

    /// running → succeeded/failed. Returns `None` if the step was not running.
    fn complete_step(
        &self,
        id: Uuid,
        outcome: &StepOutcome,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<Option<FinishedStep>>> + Send;

    // ── Triggers and events ─────────────────────────────────────

    fn insert_trigger_rule(
        &self,
        rule: &NewTriggerRule,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<Uuid>> + Send;

    /// Enabled rules listening for `event_kind` that are off cooldown at `now`,
    /// ordered by id.
    fn list_trigger_candidates(
        &self,
        event_kind: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<Vec<TriggerRule>>> + Send;

    /// Record a firing if the rule is still off cooldown. Returns false otherwise.
    fn mark_trigger_fired(
        &self,
        rule_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<bool>> + Send;

    fn record_event(
        &self,
        event: NewAgentEvent,
        now: DateTime<Utc>,
    ) -> impl Future<Output = OpsResult<AgentEvent>> + Send;
}
