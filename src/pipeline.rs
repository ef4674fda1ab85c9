//! The components wired over one store.
//!
//! Callers that need the whole flow (the CLI, the step worker) go through
//! [`Pipeline`] so that completing a step always re-evaluates its mission and
//! ingesting an event always records it before evaluating triggers.

use crate::compiler::ProposalCompiler;
use crate::error::OpsResult;
use crate::ledger::StepLedger;
use crate::missions::MissionTracker;
use crate::store::OpsStore;
use crate::triggers::TriggerRegistry;
use crate::types::{AgentEvent, FinishedStep, MissionStatus, NewAgentEvent, StepOutcome, TriggerRule};
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct Pipeline<S> {
    store: S,
    pub compiler: ProposalCompiler<S>,
    pub ledger: StepLedger<S>,
    pub missions: MissionTracker<S>,
    pub triggers: TriggerRegistry<S>,
}

/// What a step completion changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionReport {
    pub step: FinishedStep,
    /// Set when this completion settled the mission.
    pub mission_status: Option<MissionStatus>,
}

impl<S: OpsStore + Clone> Pipeline<S> {
    pub fn new(store: S) -> Self {
        Pipeline {
            compiler: ProposalCompiler::new(store.clone()),
            ledger: StepLedger::new(store.clone()),
            missions: MissionTracker::new(store.clone()),
            triggers: TriggerRegistry::new(store.clone()),
            store,
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.ledger = self.ledger.with_default_timeout(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Complete a running step and re-evaluate its mission. Returns `None`
    /// when the step was not running (duplicate or unclaimed completion).
    pub async fn complete_step(&self, step_id: Uuid, outcome: &StepOutcome) -> OpsResult<Option<CompletionReport>> {
        let Some(step) = self.ledger.finish(step_id, outcome).await? else {
            return Ok(None);
        };
        let mission_status = self.missions.on_step_completed(step.mission_id).await?;
        Ok(Some(CompletionReport { step, mission_status }))
    }

    /// Persist an event, then fire every trigger rule it matches.
    pub async fn ingest_event(&self, event: NewAgentEvent) -> OpsResult<(AgentEvent, Vec<TriggerRule>)> {
        let now = Utc::now();
        let event = self.store.record_event(event, now).await?;
        let fired = self.triggers.evaluate(&event, now).await?;
        info!(
            event_id = %event.id,
            agent = %event.agent_id,
            kind = %event.kind,
            fired = fired.len(),
            "event ingested"
        );
        Ok((event, fired))
    }
}
