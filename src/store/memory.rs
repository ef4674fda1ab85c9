//! In-process [`OpsStore`] backed by a single mutex.
//!
//! Every operation runs inside one critical section and never awaits while the
//! lock is held, so each call is atomic in the same way a conditional `UPDATE`
//! is atomic in PostgreSQL. Used by the test suites and by embedders that do
//! not need durable storage.

use super::OpsStore;
use crate::compiler::{plan_mission, CompileOptions};
use crate::error::{OpsError, OpsResult};
use crate::missions::verdict;
use crate::triggers::is_off_cooldown;
use crate::types::{
    AgentEvent, CompiledMission, FinishedStep, Mission, MissionStatus, MissionStep,
    NewAgentEvent, NewProposal, NewStep, NewTriggerRule, PendingProposal, Proposal,
    ProposalStatus, QueuedStep, StepOutcome, StepStatus, TriggerRule,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct State {
    proposals: HashMap<Uuid, Proposal>,
    missions: HashMap<Uuid, Mission>,
    steps: HashMap<Uuid, MissionStep>,
    rules: HashMap<Uuid, TriggerRule>,
    events: Vec<AgentEvent>,
    next_seq: i64,
}

impl State {
    fn push_step(&mut self, id: Uuid, step: &NewStep, now: DateTime<Utc>) {
        self.next_seq += 1;
        self.steps.insert(
            id,
            MissionStep {
                id,
                mission_id: step.mission_id,
                seq: self.next_seq,
                kind: step.kind.clone(),
                payload: step.payload.clone(),
                assigned_to: step.assigned_to.clone(),
                status: StepStatus::Queued,
                timeout_at: step.timeout_at,
                result: None,
                error: None,
                created_at: now,
                started_at: None,
                completed_at: None,
            },
        );
    }

    fn steps_of(&self, mission_id: Uuid) -> Vec<MissionStep> {
        let mut steps: Vec<_> = self
            .steps
            .values()
            .filter(|s| s.mission_id == mission_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| (s.created_at, s.seq));
        steps
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves no half-applied operation,
        // since every mutation completes before the guard drops.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a bare running mission with no proposal behind it.
    pub fn seed_mission(&self, title: &str, created_by: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().missions.insert(
            id,
            Mission {
                id,
                title: title.to_string(),
                created_by: created_by.to_string(),
                mission_type: "manual".to_string(),
                proposal_id: None,
                metadata: json!({}),
                status: MissionStatus::Running,
                created_at: Utc::now(),
                completed_at: None,
            },
        );
        id
    }

    pub fn mission_count(&self) -> usize {
        self.lock().missions.len()
    }

    pub fn step_count(&self) -> usize {
        self.lock().steps.len()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.lock().events.clone()
    }
}

impl OpsStore for MemoryStore {
    async fn insert_proposal(&self, proposal: &NewProposal, now: DateTime<Utc>) -> OpsResult<Uuid> {
        let id = Uuid::new_v4();
        self.lock().proposals.insert(
            id,
            Proposal {
                id,
                agent_id: proposal.agent_id.clone(),
                title: proposal.title.clone(),
                signal_type: proposal.signal_type.clone(),
                entry_price: proposal.entry_price,
                target_price: proposal.target_price,
                stop_loss: proposal.stop_loss,
                proposed_steps: proposal.steps_json(),
                metadata: proposal.metadata_json(),
                status: ProposalStatus::Pending,
                created_at: now,
                accepted_at: None,
            },
        );
        Ok(id)
    }

    async fn get_proposal(&self, id: Uuid) -> OpsResult<Option<Proposal>> {
        Ok(self.lock().proposals.get(&id).cloned())
    }

    async fn list_pending_proposals(&self, limit: i64) -> OpsResult<Vec<PendingProposal>> {
        let state = self.lock();
        let mut pending: Vec<_> = state
            .proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Pending)
            .map(|p| PendingProposal {
                proposal: p.clone(),
                mission_count: state
                    .missions
                    .values()
                    .filter(|m| m.proposal_id == Some(p.id))
                    .count() as i64,
            })
            .collect();
        pending.sort_by(|a, b| b.proposal.created_at.cmp(&a.proposal.created_at));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> OpsResult<bool> {
        let mut state = self.lock();
        match state.proposals.get_mut(&id) {
            Some(p) if p.status == from => {
                p.status = to;
                if to == ProposalStatus::Accepted {
                    p.accepted_at = Some(now);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compile_proposal(
        &self,
        proposal_id: Uuid,
        options: &CompileOptions,
        now: DateTime<Utc>,
    ) -> OpsResult<CompiledMission> {
        let mut state = self.lock();
        let proposal = state
            .proposals
            .get(&proposal_id)
            .ok_or_else(|| OpsError::not_found("proposal", proposal_id))?;
        if state
            .missions
            .values()
            .any(|m| m.proposal_id == Some(proposal_id))
        {
            return Err(OpsError::Precondition(format!(
                "proposal {} already has a mission",
                proposal_id
            )));
        }
        // Everything fallible happens before the first mutation.
        let plan = plan_mission(proposal, options, now)?;

        state.missions.insert(
            plan.mission_id,
            Mission {
                id: plan.mission_id,
                title: plan.title.clone(),
                created_by: plan.created_by.clone(),
                mission_type: plan.mission_type.clone(),
                proposal_id: Some(proposal_id),
                metadata: plan.metadata.clone(),
                status: plan.initial_status(),
                created_at: now,
                completed_at: plan.initial_status().is_terminal().then_some(now),
            },
        );
        for step in &plan.steps {
            let new_step = NewStep {
                mission_id: plan.mission_id,
                kind: step.kind.clone(),
                payload: step.payload.clone(),
                assigned_to: step.assigned_to.clone(),
                timeout_at: step.timeout_at,
            };
            state.push_step(step.id, &new_step, now);
        }
        if let Some(p) = state.proposals.get_mut(&proposal_id) {
            p.status = ProposalStatus::Accepted;
            p.accepted_at.get_or_insert(now);
        }
        Ok(plan.compiled())
    }

    async fn get_mission(&self, id: Uuid) -> OpsResult<Option<Mission>> {
        Ok(self.lock().missions.get(&id).cloned())
    }

    async fn settle_mission(
        &self,
        mission_id: Uuid,
        now: DateTime<Utc>,
    ) -> OpsResult<Option<MissionStatus>> {
        let mut state = self.lock();
        let steps = state.steps_of(mission_id);
        let Some(mission) = state.missions.get_mut(&mission_id) else {
            return Ok(None);
        };
        if mission.status.is_terminal() {
            return Ok(None);
        }
        let Some(status) = verdict(&steps) else {
            return Ok(None);
        };
        mission.status = status;
        mission.completed_at = Some(now);
        Ok(Some(status))
    }

    async fn insert_step(&self, step: &NewStep, now: DateTime<Utc>) -> OpsResult<Uuid> {
        let mut state = self.lock();
        if !state.missions.contains_key(&step.mission_id) {
            return Err(OpsError::not_found("mission", step.mission_id));
        }
        let id = Uuid::new_v4();
        state.push_step(id, step, now);
        Ok(id)
    }

    async fn get_step(&self, id: Uuid) -> OpsResult<Option<MissionStep>> {
        Ok(self.lock().steps.get(&id).cloned())
    }

    async fn list_mission_steps(&self, mission_id: Uuid) -> OpsResult<Vec<MissionStep>> {
        Ok(self.lock().steps_of(mission_id))
    }

    async fn list_claimable(
        &self,
        kind: Option<&str>,
        limit: i64,
        now: DateTime<Utc>,
    ) -> OpsResult<Vec<QueuedStep>> {
        let state = self.lock();
        let mut queued: Vec<_> = state
            .steps
            .values()
            .filter(|s| s.status == StepStatus::Queued && s.timeout_at > now)
            .filter(|s| kind.map_or(true, |k| s.kind == k))
            .filter_map(|s| {
                let mission = state.missions.get(&s.mission_id)?;
                Some(QueuedStep {
                    step: s.clone(),
                    mission_title: mission.title.clone(),
                    mission_created_by: mission.created_by.clone(),
                })
            })
            .collect();
        queued.sort_by_key(|q| (q.step.created_at, q.step.seq));
        queued.truncate(limit.max(0) as usize);
        Ok(queued)
    }

    async fn claim_step(&self, id: Uuid, assigned_to: &str, now: DateTime<Utc>) -> OpsResult<bool> {
        let mut state = self.lock();
        match state.steps.get_mut(&id) {
            Some(step) if step.status == StepStatus::Queued => {
                step.status = StepStatus::Running;
                step.assigned_to = Some(assigned_to.to_string());
                step.started_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_step(
        &self,
        id: Uuid,
        outcome: &StepOutcome,
        now: DateTime<Utc>,
    ) -> OpsResult<Option<FinishedStep>> {
        let mut state = self.lock();
        match state.steps.get_mut(&id) {
            Some(step) if step.status == StepStatus::Running => {
                step.status = outcome.status();
                step.result = outcome.result().cloned();
                step.error = outcome.error().map(str::to_string);
                step.completed_at = Some(now);
                Ok(Some(FinishedStep {
                    step_id: id,
                    mission_id: step.mission_id,
                    status: step.status,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn insert_trigger_rule(&self, rule: &NewTriggerRule, now: DateTime<Utc>) -> OpsResult<Uuid> {
        let id = Uuid::new_v4();
        self.lock().rules.insert(
            id,
            TriggerRule {
                id,
                name: rule.name.clone(),
                enabled: rule.enabled,
                trigger_event: rule.trigger_event.clone(),
                conditions: rule.conditions.clone(),
                cooldown_minutes: rule.cooldown_minutes,
                last_fired_at: None,
                fire_count: 0,
                created_at: now,
            },
        );
        Ok(id)
    }

    async fn list_trigger_candidates(
        &self,
        event_kind: &str,
        now: DateTime<Utc>,
    ) -> OpsResult<Vec<TriggerRule>> {
        let state = self.lock();
        let mut rules: Vec<_> = state
            .rules
            .values()
            .filter(|r| r.enabled && r.trigger_event == event_kind)
            .filter(|r| is_off_cooldown(r.last_fired_at, r.cooldown(), now))
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn mark_trigger_fired(&self, rule_id: Uuid, now: DateTime<Utc>) -> OpsResult<bool> {
        let mut state = self.lock();
        match state.rules.get_mut(&rule_id) {
            Some(rule) if rule.enabled && is_off_cooldown(rule.last_fired_at, rule.cooldown(), now) => {
                rule.last_fired_at = Some(now);
                rule.fire_count += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_event(&self, event: NewAgentEvent, now: DateTime<Utc>) -> OpsResult<AgentEvent> {
        let event = event.into_event(Uuid::new_v4(), now);
        self.lock().events.push(event.clone());
        Ok(event)
    }
}

impl MemoryStore {
    /// Overwrite a rule's last firing time, e.g. to simulate an elapsed cooldown.
    pub fn set_last_fired(&self, rule_id: Uuid, at: Option<DateTime<Utc>>) {
        if let Some(rule) = self.lock().rules.get_mut(&rule_id) {
            rule.last_fired_at = at;
        }
    }
}
