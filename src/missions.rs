//! Mission-level status derived from step completion.
//!
//! A mission stays `running` while any of its steps is queued or running. The
//! first re-evaluation that finds none left moves it to `succeeded`, or to
//! `failed` if any step failed. Settling is one conditional update in the
//! store, so concurrent completions of sibling steps settle the mission exactly
//! once and redundant calls are no-ops.

use crate::error::{OpsError, OpsResult};
use crate::store::OpsStore;
use crate::types::{Mission, MissionStatus, MissionStep, StepStatus};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct MissionTracker<S> {
    store: S,
}

impl<S: OpsStore> MissionTracker<S> {
    pub fn new(store: S) -> Self {
        MissionTracker { store }
    }

    /// Re-evaluate a mission after one of its steps finished.
    ///
    /// Returns the status the mission just moved to, or `None` if it is still
    /// running or was already terminal. Unknown missions are `NotFound`.
    pub async fn on_step_completed(&self, mission_id: Uuid) -> OpsResult<Option<MissionStatus>> {
        let settled = self.store.settle_mission(mission_id, Utc::now()).await?;
        match settled {
            Some(status) => {
                info!(mission_id = %mission_id, status = %status, "mission settled");
            }
            None => {
                if self.store.get_mission(mission_id).await?.is_none() {
                    return Err(OpsError::not_found("mission", mission_id));
                }
                debug!(mission_id = %mission_id, "mission not settled");
            }
        }
        Ok(settled)
    }

    pub async fn get(&self, mission_id: Uuid) -> OpsResult<Mission> {
        self.store
            .get_mission(mission_id)
            .await?
            .ok_or_else(|| OpsError::not_found("mission", mission_id))
    }

    pub async fn steps(&self, mission_id: Uuid) -> OpsResult<Vec<MissionStep>> {
        self.store.list_mission_steps(mission_id).await
    }
}

/// The terminal status a mission takes once no step is pending.
pub fn verdict(steps: &[MissionStep]) -> Option<MissionStatus> {
    if steps.iter().any(|s| s.status.is_pending()) {
        return None;
    }
    if steps.iter().any(|s| s.status == StepStatus::Failed) {
        Some(MissionStatus::Failed)
    } else {
        Some(MissionStatus::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{NewStep, StepOutcome};
    use chrono::Duration;
    use serde_json::json;

    async fn mission_with_steps(store: &MemoryStore, n: usize) -> (Uuid, Vec<Uuid>) {
        let mission_id = store.seed_mission("hedge BTC", "ops");
        let mut ids = Vec::new();
        for _ in 0..n {
            let id = store
                .insert_step(
                    &NewStep {
                        mission_id,
                        kind: "analyze".into(),
                        payload: json!({}),
                        assigned_to: None,
                        timeout_at: Utc::now() + Duration::hours(1),
                    },
                    Utc::now(),
                )
                .await
                .unwrap();
            ids.push(id);
        }
        (mission_id, ids)
    }

    async fn run(store: &MemoryStore, step: Uuid, outcome: StepOutcome) {
        assert!(store.claim_step(step, "worker-1", Utc::now()).await.unwrap());
        assert!(store.complete_step(step, &outcome, Utc::now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mission_succeeds_after_every_step_succeeds() {
        let store = MemoryStore::new();
        let tracker = MissionTracker::new(store.clone());
        let (mission_id, steps) = mission_with_steps(&store, 3).await;

        for (i, step) in steps.iter().enumerate() {
            run(&store, *step, StepOutcome::Succeeded { result: None }).await;
            let settled = tracker.on_step_completed(mission_id).await.unwrap();
            if i < steps.len() - 1 {
                assert_eq!(settled, None);
            } else {
                assert_eq!(settled, Some(MissionStatus::Succeeded));
            }
        }
        let mission = tracker.get(mission_id).await.unwrap();
        assert_eq!(mission.status, MissionStatus::Succeeded);
        assert!(mission.completed_at.is_some());
    }

    #[tokio::test]
    async fn one_failed_step_fails_the_mission() {
        let store = MemoryStore::new();
        let tracker = MissionTracker::new(store.clone());
        let (mission_id, steps) = mission_with_steps(&store, 2).await;

        run(&store, steps[0], StepOutcome::from_parts(None, Some("exchange down".into()))).await;
        assert_eq!(tracker.on_step_completed(mission_id).await.unwrap(), None);
        run(&store, steps[1], StepOutcome::Succeeded { result: None }).await;
        assert_eq!(
            tracker.on_step_completed(mission_id).await.unwrap(),
            Some(MissionStatus::Failed)
        );
    }

    #[tokio::test]
    async fn settling_twice_is_harmless() {
        let store = MemoryStore::new();
        let tracker = MissionTracker::new(store.clone());
        let (mission_id, steps) = mission_with_steps(&store, 1).await;
        run(&store, steps[0], StepOutcome::Succeeded { result: None }).await;

        assert_eq!(
            tracker.on_step_completed(mission_id).await.unwrap(),
            Some(MissionStatus::Succeeded)
        );
        assert_eq!(tracker.on_step_completed(mission_id).await.unwrap(), None);
        assert_eq!(tracker.get(mission_id).await.unwrap().status, MissionStatus::Succeeded);
    }

    #[tokio::test]
    async fn unknown_mission_is_not_found() {
        let tracker = MissionTracker::new(MemoryStore::new());
        let err = tracker.on_step_completed(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OpsError::NotFound { entity: "mission", .. }));
    }

    #[tokio::test]
    async fn verdict_matches_step_states() {
        let store = MemoryStore::new();
        let (mission_id, steps) = mission_with_steps(&store, 2).await;
        let all = store.list_mission_steps(mission_id).await.unwrap();
        assert_eq!(verdict(&all), None);

        run(&store, steps[0], StepOutcome::Succeeded { result: None }).await;
        run(&store, steps[1], StepOutcome::from_parts(None, Some("x".into()))).await;
        let all = store.list_mission_steps(mission_id).await.unwrap();
        assert_eq!(verdict(&all), Some(MissionStatus::Failed));
        assert_eq!(verdict(&[]), Some(MissionStatus::Succeeded));
    }
}
