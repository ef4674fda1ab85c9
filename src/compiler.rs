//! # Compiler — Proposals into Missions
//!
//! An agent submits a [`Proposal`] carrying an ordered list of step templates.
//! Once accepted, [`ProposalCompiler::compile`] turns it into exactly one
//! mission plus one queued step per template, all in one transaction.
//!
//! ## Lifecycle
//!
//! 1. `submit` inserts the proposal as `pending`
//! 2. `accept` / `reject` move it out of `pending` (conditional, first caller wins)
//! 3. `compile` locks the proposal row, re-checks it is accepted and not yet
//!    compiled, expands templates via [`plan_mission`], inserts mission + steps
//! 4. Workers claim the steps in template order (creation order breaks ties)
//!
//! The store calls [`plan_mission`] while holding its lock so every backend
//! expands templates identically.

use crate::error::{OpsError, OpsResult};
use crate::store::OpsStore;
use crate::types::{
    CompiledMission, MissionStatus, NewProposal, PendingProposal, Proposal, ProposalStatus,
    StepTemplate,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

/// Mission type recorded for missions compiled from trading proposals.
pub const ENTRY_MISSION_TYPE: &str = "entry";

/// Default claim deadline for a step, measured from its creation.
pub const DEFAULT_STEP_TIMEOUT_SECS: i64 = 3600;

/// Longest claim deadline a template or config may ask for (one year).
pub const MAX_STEP_TIMEOUT_SECS: i64 = 365 * 24 * 3600;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Recorded as the mission's `created_by`.
    pub created_by: String,
    pub mission_type: String,
    /// Deadline for steps whose template sets no `timeout_secs`.
    pub default_step_timeout: Duration,
}

impl CompileOptions {
    pub fn new(created_by: &str) -> Self {
        CompileOptions {
            created_by: created_by.to_string(),
            mission_type: ENTRY_MISSION_TYPE.to_string(),
            default_step_timeout: Duration::seconds(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub assigned_to: Option<String>,
    pub timeout_at: DateTime<Utc>,
}

/// Everything a store needs to insert for one compiled proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionPlan {
    pub mission_id: Uuid,
    pub proposal_id: Uuid,
    pub title: String,
    pub created_by: String,
    pub mission_type: String,
    pub metadata: Value,
    pub steps: Vec<PlannedStep>,
}

impl MissionPlan {
    /// A plan without steps has nothing to wait for and is born settled.
    pub fn initial_status(&self) -> MissionStatus {
        if self.steps.is_empty() {
            MissionStatus::Succeeded
        } else {
            MissionStatus::Running
        }
    }

    pub fn compiled(&self) -> CompiledMission {
        CompiledMission {
            mission_id: self.mission_id,
            step_ids: self.steps.iter().map(|s| s.id).collect(),
        }
    }
}

/// Decode a proposal's `proposed_steps` column, preserving order.
pub fn parse_templates(raw: &Value) -> OpsResult<Vec<StepTemplate>> {
    let items = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => {
            return Err(OpsError::InvalidTemplate(
                "proposed_steps is not an array".into(),
            ))
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let tpl: StepTemplate = serde_json::from_value(item.clone())
                .map_err(|e| OpsError::InvalidTemplate(format!("step {}: {}", i, e)))?;
            check_template(i, &tpl)?;
            Ok(tpl)
        })
        .collect()
}

fn check_template(index: usize, tpl: &StepTemplate) -> OpsResult<()> {
    match tpl.timeout_secs {
        Some(secs) if !(1..=MAX_STEP_TIMEOUT_SECS).contains(&secs) => {
            Err(OpsError::InvalidTemplate(format!(
                "step {}: timeout_secs must be between 1 and {}",
                index, MAX_STEP_TIMEOUT_SECS
            )))
        }
        _ => Ok(()),
    }
}

/// Expand an accepted proposal into a mission plan. Pure apart from id generation.
pub fn plan_mission(
    proposal: &Proposal,
    options: &CompileOptions,
    now: DateTime<Utc>,
) -> OpsResult<MissionPlan> {
    if proposal.status != ProposalStatus::Accepted {
        return Err(OpsError::Precondition(format!(
            "proposal {} is {}, not accepted",
            proposal.id, proposal.status
        )));
    }
    let templates = parse_templates(&proposal.proposed_steps)?;
    let steps = templates
        .into_iter()
        .enumerate()
        .map(|(i, tpl)| {
            let timeout = match tpl.timeout_secs {
                Some(secs) => Duration::try_seconds(secs),
                None => Some(options.default_step_timeout),
            };
            let timeout_at = timeout
                .and_then(|t| now.checked_add_signed(t))
                .ok_or_else(|| OpsError::InvalidTemplate(format!("step {}: timeout out of range", i)))?;
            Ok(PlannedStep {
                id: Uuid::new_v4(),
                kind: tpl.kind,
                payload: tpl.payload,
                assigned_to: tpl.assigned_to,
                timeout_at,
            })
        })
        .collect::<OpsResult<Vec<_>>>()?;

    Ok(MissionPlan {
        mission_id: Uuid::new_v4(),
        proposal_id: proposal.id,
        title: proposal.title.clone(),
        created_by: options.created_by.clone(),
        mission_type: options.mission_type.clone(),
        metadata: json!({
            "source_proposal": proposal.id.to_string(),
            "original_agent": proposal.agent_id,
            "signal_type": proposal.signal_type,
        }),
        steps,
    })
}

#[derive(Clone)]
pub struct ProposalCompiler<S> {
    store: S,
}

impl<S: OpsStore> ProposalCompiler<S> {
    pub fn new(store: S) -> Self {
        ProposalCompiler { store }
    }

    /// Insert a new pending proposal.
    pub async fn submit(&self, proposal: &NewProposal) -> OpsResult<Uuid> {
        for (i, tpl) in proposal.proposed_steps.iter().enumerate() {
            check_template(i, tpl)?;
        }
        let id = self.store.insert_proposal(proposal, Utc::now()).await?;
        info!(
            proposal_id = %id,
            agent = %proposal.agent_id,
            signal_type = %proposal.signal_type,
            steps = proposal.proposed_steps.len(),
            "proposal submitted"
        );
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> OpsResult<Proposal> {
        self.store
            .get_proposal(id)
            .await?
            .ok_or_else(|| OpsError::not_found("proposal", id))
    }

    pub async fn pending(&self, limit: i64) -> OpsResult<Vec<PendingProposal>> {
        self.store.list_pending_proposals(limit).await
    }

    /// pending → accepted. Returns false if the proposal was not pending.
    pub async fn accept(&self, id: Uuid) -> OpsResult<bool> {
        self.decide(id, ProposalStatus::Accepted).await
    }

    /// pending → rejected. Returns false if the proposal was not pending.
    pub async fn reject(&self, id: Uuid) -> OpsResult<bool> {
        self.decide(id, ProposalStatus::Rejected).await
    }

    async fn decide(&self, id: Uuid, to: ProposalStatus) -> OpsResult<bool> {
        let moved = self
            .store
            .transition_proposal(id, ProposalStatus::Pending, to, Utc::now())
            .await?;
        if moved {
            info!(proposal_id = %id, status = %to, "proposal decided");
        } else if self.store.get_proposal(id).await?.is_none() {
            return Err(OpsError::not_found("proposal", id));
        }
        Ok(moved)
    }

    /// Compile an accepted proposal into a mission with one step per template.
    /// A proposal without templates yields a mission that is already succeeded.
    ///
    /// Fails with `NotFound` for an unknown proposal, `Precondition` if it is
    /// not accepted or already has a mission, `InvalidTemplate` if its steps
    /// do not decode. Nothing is persisted on failure.
    pub async fn compile(&self, proposal_id: Uuid, options: &CompileOptions) -> OpsResult<CompiledMission> {
        let compiled = match self
            .store
            .compile_proposal(proposal_id, options, Utc::now())
            .await
        {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!(proposal_id = %proposal_id, error = %e, "failed to compile proposal");
                return Err(e);
            }
        };
        info!(
            proposal_id = %proposal_id,
            mission_id = %compiled.mission_id,
            steps = compiled.step_ids.len(),
            created_by = %options.created_by,
            "mission compiled"
        );
        Ok(compiled)
    }
}
