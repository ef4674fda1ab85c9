//! # Ledger — Claimable Mission Steps
//!
//! Every mission step is a unit of work that exactly one worker may execute.
//!
//! ## Lifecycle
//!
//! ```text
//! queued ──claim──▶ running ──complete──▶ succeeded | failed
//! ```
//!
//! 1. `enqueue` inserts a step as `queued` with a claim deadline (`timeout_at`)
//! 2. Workers poll `list_claimable` (oldest first, expired deadlines excluded)
//! 3. `claim` is a single conditional update; of N concurrent claimants on one
//!    step exactly one sees `true`
//! 4. `complete` only moves a `running` step, so a duplicate completion is a
//!    no-op returning `false`
//!
//! Expiry is a query-time filter only: a step past its deadline simply stops
//! being offered. Nothing here reaps running steps that outlive their deadline.
//!
//! Contention outcomes are booleans, not errors. Errors mean the store is
//! unreachable.

use crate::compiler::DEFAULT_STEP_TIMEOUT_SECS;
use crate::error::{OpsError, OpsResult};
use crate::store::OpsStore;
use crate::types::{FinishedStep, MissionStep, NewStep, QueuedStep, StepOutcome};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct StepLedger<S> {
    store: S,
    default_timeout: Duration,
}

impl<S: OpsStore> StepLedger<S> {
    pub fn new(store: S) -> Self {
        StepLedger {
            store,
            default_timeout: Duration::seconds(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Queue a step with the default claim deadline.
    pub async fn enqueue(
        &self,
        mission_id: Uuid,
        kind: &str,
        payload: Value,
        assigned_to: Option<&str>,
    ) -> OpsResult<Uuid> {
        let timeout_at = Utc::now()
            .checked_add_signed(self.default_timeout)
            .ok_or_else(|| OpsError::InvalidTemplate("default step timeout out of range".into()))?;
        self.enqueue_with_deadline(mission_id, kind, payload, assigned_to, timeout_at)
            .await
    }

    /// Queue a step that stops being claimable at `timeout_at`.
    pub async fn enqueue_with_deadline(
        &self,
        mission_id: Uuid,
        kind: &str,
        payload: Value,
        assigned_to: Option<&str>,
        timeout_at: DateTime<Utc>,
    ) -> OpsResult<Uuid> {
        let step = NewStep {
            mission_id,
            kind: kind.to_string(),
            payload,
            assigned_to: assigned_to.map(str::to_string),
            timeout_at,
        };
        let id = self.store.insert_step(&step, Utc::now()).await?;
        debug!(step_id = %id, mission_id = %mission_id, kind, "step enqueued");
        Ok(id)
    }

    /// Queued, unexpired steps, oldest first, optionally of one kind.
    pub async fn list_claimable(&self, kind: Option<&str>, limit: i64) -> OpsResult<Vec<QueuedStep>> {
        self.store.list_claimable(kind, limit, Utc::now()).await
    }

    /// Atomically take a queued step. Returns false if another caller got it
    /// first or the step does not exist.
    pub async fn claim(&self, step_id: Uuid, assigned_to: &str) -> OpsResult<bool> {
        let won = self.store.claim_step(step_id, assigned_to, Utc::now()).await?;
        if won {
            info!(step_id = %step_id, worker = assigned_to, "step claimed");
        } else {
            debug!(step_id = %step_id, worker = assigned_to, "claim lost");
        }
        Ok(won)
    }

    /// Finish a running step: failed when `error` is present, succeeded otherwise.
    /// Returns false if the step was not running.
    pub async fn complete(
        &self,
        step_id: Uuid,
        result: Option<Value>,
        error: Option<String>,
    ) -> OpsResult<bool> {
        Ok(self
            .finish(step_id, &StepOutcome::from_parts(result, error))
            .await?
            .is_some())
    }

    /// Like [`complete`](Self::complete) but reports which mission the step
    /// belonged to, so the caller can re-evaluate it.
    pub async fn finish(&self, step_id: Uuid, outcome: &StepOutcome) -> OpsResult<Option<FinishedStep>> {
        let finished = self.store.complete_step(step_id, outcome, Utc::now()).await?;
        match &finished {
            Some(done) => info!(
                step_id = %step_id,
                mission_id = %done.mission_id,
                status = %done.status,
                error = outcome.error().unwrap_or(""),
                "step completed"
            ),
            None => debug!(step_id = %step_id, "completion ignored: step not running"),
        }
        Ok(finished)
    }

    pub async fn get(&self, step_id: Uuid) -> OpsResult<MissionStep> {
        self.store
            .get_step(step_id)
            .await?
            .ok_or_else(|| OpsError::not_found("step", step_id))
    }

    pub async fn steps_for_mission(&self, mission_id: Uuid) -> OpsResult<Vec<MissionStep>> {
        self.store.list_mission_steps(mission_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::StepStatus;
    use serde_json::json;
    use std::sync::Arc;

    fn ledger() -> (MemoryStore, StepLedger<MemoryStore>, Uuid) {
        let store = MemoryStore::new();
        let mission_id = store.seed_mission("rebalance", "ops");
        (store.clone(), StepLedger::new(store), mission_id)
    }

    #[tokio::test]
    async fn enqueue_creates_queued_step() {
        let (_, ledger, mission_id) = ledger();
        let id = ledger
            .enqueue(mission_id, "analyze", json!({"symbol": "BTC"}), Some("sage"))
            .await
            .unwrap();
        let step = ledger.get(id).await.unwrap();
        assert_eq!(step.status, StepStatus::Queued);
        assert_eq!(step.kind, "analyze");
        assert_eq!(step.assigned_to.as_deref(), Some("sage"));
        assert!(step.started_at.is_none());
        assert!(step.timeout_at > Utc::now());
    }

    #[tokio::test]
    async fn enqueue_for_unknown_mission_is_not_found() {
        let (_, ledger, _) = ledger();
        let err = ledger
            .enqueue(Uuid::new_v4(), "analyze", json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::NotFound { entity: "mission", .. }));
    }

    #[tokio::test]
    async fn claim_moves_step_to_running_once() {
        let (_, ledger, mission_id) = ledger();
        let id = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap();

        assert!(ledger.claim(id, "worker-a").await.unwrap());
        assert!(!ledger.claim(id, "worker-b").await.unwrap());

        let step = ledger.get(id).await.unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert_eq!(step.assigned_to.as_deref(), Some("worker-a"));
        assert!(step.started_at.is_some());
    }

    #[tokio::test]
    async fn claim_unknown_step_returns_false() {
        let (_, ledger, _) = ledger();
        assert!(!ledger.claim(Uuid::new_v4(), "worker-a").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let (_, ledger, mission_id) = ledger();
        let id = ledger.enqueue(mission_id, "execute_trade", json!({}), None).await.unwrap();
        let ledger = Arc::new(ledger);

        let mut handles = Vec::new();
        for i in 0..32 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.claim(id, &format!("worker-{}", i)).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn complete_twice_applies_once() {
        let (_, ledger, mission_id) = ledger();
        let id = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap();
        ledger.claim(id, "worker-a").await.unwrap();

        assert!(ledger.complete(id, Some(json!({"signal": "buy"})), None).await.unwrap());
        assert!(!ledger.complete(id, None, Some("late failure".into())).await.unwrap());

        let step = ledger.get(id).await.unwrap();
        assert_eq!(step.status, StepStatus::Succeeded);
        assert_eq!(step.result, Some(json!({"signal": "buy"})));
        assert!(step.error.is_none());
        assert!(step.completed_at.is_some());
    }

    #[tokio::test]
    async fn complete_with_error_marks_failed() {
        let (_, ledger, mission_id) = ledger();
        let id = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap();
        ledger.claim(id, "worker-a").await.unwrap();

        let done = ledger
            .finish(id, &StepOutcome::from_parts(None, Some("rate limited".into())))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.mission_id, mission_id);
        assert_eq!(done.status, StepStatus::Failed);
        assert_eq!(ledger.get(id).await.unwrap().error.as_deref(), Some("rate limited"));
    }

    #[tokio::test]
    async fn enqueue_with_overflowing_default_timeout_errors() {
        let (store, ledger, mission_id) = ledger();
        let ledger = ledger.with_default_timeout(Duration::weeks(1_000_000_000));
        let err = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap_err();
        assert!(matches!(err, OpsError::InvalidTemplate(_)));
        assert_eq!(store.step_count(), 0);
    }

    #[tokio::test]
    async fn complete_unclaimed_step_returns_false() {
        let (_, ledger, mission_id) = ledger();
        let id = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap();
        assert!(!ledger.complete(id, None, None).await.unwrap());
        assert_eq!(ledger.get(id).await.unwrap().status, StepStatus::Queued);
    }

    #[tokio::test]
    async fn claimable_is_fifo_filtered_and_excludes_expired() {
        let (_, ledger, mission_id) = ledger();
        let now = Utc::now();
        let first = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap();
        let expired = ledger
            .enqueue_with_deadline(mission_id, "analyze", json!({}), None, now - Duration::seconds(1))
            .await
            .unwrap();
        let trade = ledger.enqueue(mission_id, "execute_trade", json!({}), None).await.unwrap();
        let second = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap();
        let claimed = ledger.enqueue(mission_id, "analyze", json!({}), None).await.unwrap();
        ledger.claim(claimed, "worker-a").await.unwrap();

        let all: Vec<_> = ledger
            .list_claimable(None, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.step.id)
            .collect();
        assert_eq!(all, vec![first, trade, second]);
        assert!(!all.contains(&expired));

        let analyze: Vec<_> = ledger
            .list_claimable(Some("analyze"), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.step.id)
            .collect();
        assert_eq!(analyze, vec![first, second]);

        let limited = ledger.list_claimable(None, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].step.id, first);
        assert_eq!(limited[0].mission_title, "rebalance");
        assert_eq!(limited[0].mission_created_by, "ops");
    }
}
