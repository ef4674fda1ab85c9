//! # Worker — Poll, Claim, Execute, Complete
//!
//! A [`StepWorker`] drives steps through the ledger on behalf of one worker
//! id:
//!
//! ```text
//! list_claimable(kind) → claim → StepExecutor::execute → Pipeline::complete_step
//! ```
//!
//! Losing a claim is normal when several workers poll the same queue; the
//! step is skipped. When a pass finds nothing to do the worker sleeps for its
//! poll interval, waking early if the shutdown channel flips.
//!
//! [`CommandExecutor`] runs one external program per step kind. The step
//! payload is written to the program's stdin as JSON; stdout becomes the step
//! result (parsed as JSON, or wrapped as `{"stdout": "..."}`); a non-zero exit
//! fails the step with stderr as the error.

use crate::config::ExecutorConfig;
use crate::error::OpsResult;
use crate::pipeline::Pipeline;
use crate::store::OpsStore;
use crate::types::{QueuedStep, StepOutcome};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub trait StepExecutor: Send + Sync {
    /// Run one claimed step. Failures are reported through the outcome.
    fn execute(&self, step: &QueuedStep) -> impl Future<Output = StepOutcome> + Send;
}

pub struct StepWorker<S, E> {
    pipeline: Pipeline<S>,
    executor: E,
    worker_id: String,
    kinds: Vec<String>,
    batch_size: i64,
    poll_interval: Duration,
}

impl<S, E> StepWorker<S, E>
where
    S: OpsStore + Clone,
    E: StepExecutor,
{
    pub fn new(pipeline: Pipeline<S>, executor: E, worker_id: &str) -> Self {
        StepWorker {
            pipeline,
            executor,
            worker_id: worker_id.to_string(),
            kinds: Vec::new(),
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
        }
    }

    /// Only poll for these kinds. Empty means every kind.
    pub fn with_kinds(mut self, kinds: Vec<String>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn candidates(&self) -> OpsResult<Vec<QueuedStep>> {
        if self.kinds.is_empty() {
            return self.pipeline.ledger.list_claimable(None, self.batch_size).await;
        }
        let mut all = Vec::new();
        for kind in &self.kinds {
            all.extend(
                self.pipeline
                    .ledger
                    .list_claimable(Some(kind), self.batch_size)
                    .await?,
            );
        }
        all.sort_by_key(|q| (q.step.created_at, q.step.seq));
        all.truncate(self.batch_size.max(0) as usize);
        Ok(all)
    }

    /// One polling pass. Returns how many steps this worker executed.
    pub async fn run_once(&self) -> OpsResult<usize> {
        let mut executed = 0;
        for queued in self.candidates().await? {
            let step_id = queued.step.id;
            if !self.pipeline.ledger.claim(step_id, &self.worker_id).await? {
                continue;
            }
            let outcome = self.executor.execute(&queued).await;
            match self.pipeline.complete_step(step_id, &outcome).await? {
                Some(report) => {
                    if let Some(status) = report.mission_status {
                        info!(
                            worker = %self.worker_id,
                            mission_id = %report.step.mission_id,
                            status = %status,
                            "mission finished"
                        );
                    }
                }
                None => warn!(
                    worker = %self.worker_id,
                    step_id = %step_id,
                    "step was no longer running when its result came back"
                ),
            }
            executed += 1;
        }
        Ok(executed)
    }

    /// Poll until `shutdown` becomes true or its sender is dropped. Returns
    /// the number of steps executed.
    ///
    /// A storage error ends the current pass; the next poll tries again.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            worker = %self.worker_id,
            kinds = ?self.kinds,
            batch_size = self.batch_size,
            poll_interval_secs = self.poll_interval.as_secs(),
            "step worker started"
        );
        let mut total = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let executed = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    warn!(worker = %self.worker_id, error = %e, "poll failed");
                    0
                }
            };
            total += executed as u64;
            if executed == 0 {
                debug!(worker = %self.worker_id, "no work, sleeping");
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(worker = %self.worker_id, executed = total, "step worker stopped");
        total
    }
}

// ── External program executor ───────────────────────────────────

pub struct CommandExecutor {
    programs: BTreeMap<String, ExecutorConfig>,
}

impl CommandExecutor {
    pub fn new(programs: BTreeMap<String, ExecutorConfig>) -> Self {
        CommandExecutor { programs }
    }

    pub fn kinds(&self) -> Vec<String> {
        self.programs.keys().cloned().collect()
    }

    async fn run_program(&self, program: &ExecutorConfig, step: &QueuedStep) -> Result<Option<Value>, String> {
        let input = serde_json::to_vec(&step.step.payload).map_err(|e| format!("encoding payload: {}", e))?;
        let mut child = Command::new(&program.command)
            .args(&program.args)
            .env("TRADEOPS_STEP_ID", step.step.id.to_string())
            .env("TRADEOPS_MISSION_ID", step.step.mission_id.to_string())
            .env("TRADEOPS_STEP_KIND", &step.step.kind)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawning {}: {}", program.command, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that ignores its input may exit before reading it.
            if let Err(e) = stdin.write_all(&input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(format!("writing payload: {}", e));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("waiting for {}: {}", program.command, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} exited with {}: {}", program.command, output.status, stderr.trim()));
        }
        Ok(parse_stdout(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// JSON stdout is the result as-is; anything else is wrapped. Empty means no result.
fn parse_stdout(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed).unwrap_or_else(|_| json!({ "stdout": trimmed })))
}

impl StepExecutor for CommandExecutor {
    async fn execute(&self, step: &QueuedStep) -> StepOutcome {
        let Some(program) = self.programs.get(&step.step.kind) else {
            return StepOutcome::from_parts(None, Some(format!("no executor configured for kind '{}'", step.step.kind)));
        };
        debug!(step_id = %step.step.id, command = %program.command, "executing step");
        match self.run_program(program, step).await {
            Ok(result) => StepOutcome::Succeeded { result },
            Err(error) => StepOutcome::Failed { error, result: None },
        }
    }
}
