//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Each subcommand
//! resolves config and the database, then calls one pipeline operation.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{info, warn};
use tradeops::compiler::{parse_templates, CompileOptions};
use tradeops::config::OpsConfig;
use tradeops::db::Database;
use tradeops::types::{NewAgentEvent, NewProposal, NewTriggerRule, StepOutcome};
use tradeops::{CommandExecutor, Pipeline, StepWorker};

use super::{Cli, Commands};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect(cli: &Cli, config: &OpsConfig) -> Result<Database> {
    let database_url = cli
        .database_url
        .as_deref()
        .or(config.database.url.as_deref())
        .ok_or_else(|| {
            anyhow::anyhow!("DATABASE_URL is required (set via --database-url, env, or [database].url)")
        })?;
    let db = Database::connect_with(database_url, config.database.max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    Ok(db)
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = OpsConfig::load_or_default(cli.config.as_deref())?;
    let db = connect(&cli, &config).await?;
    let pipeline = Pipeline::new(db.clone()).with_step_timeout(config.steps.default_timeout());

    match cli.command {
        // ── Proposals ───────────────────────────────────────────
        Commands::Propose {
            agent,
            title,
            signal_type,
            entry_price,
            target_price,
            stop_loss,
            steps,
            metadata,
        } => {
            let mut proposal = NewProposal::new(&agent, &title, &signal_type);
            proposal.entry_price = entry_price;
            proposal.target_price = target_price;
            proposal.stop_loss = stop_loss;
            proposal.metadata = metadata;
            if let Some(steps) = steps {
                proposal.proposed_steps = parse_templates(&steps)?;
            }
            let id = pipeline.compiler.submit(&proposal).await?;
            print_json(&json!({ "proposal_id": id }))
        }
        Commands::Proposals { limit } => print_json(&pipeline.compiler.pending(limit).await?),
        Commands::Accept { id } => {
            if !pipeline.compiler.accept(id).await? {
                anyhow::bail!("proposal {} is not pending", id);
            }
            print_json(&json!({ "proposal_id": id, "status": "accepted" }))
        }
        Commands::Reject { id } => {
            if !pipeline.compiler.reject(id).await? {
                anyhow::bail!("proposal {} is not pending", id);
            }
            print_json(&json!({ "proposal_id": id, "status": "rejected" }))
        }
        Commands::Compile {
            id,
            created_by,
            mission_type,
        } => {
            let mut options =
                CompileOptions::new(&created_by).with_step_timeout(config.steps.default_timeout());
            options.mission_type = mission_type;
            print_json(&pipeline.compiler.compile(id, &options).await?)
        }

        // ── Missions and steps ──────────────────────────────────
        Commands::Mission { id } => {
            let mission = pipeline.missions.get(id).await?;
            let steps = pipeline.missions.steps(id).await?;
            print_json(&json!({ "mission": mission, "steps": steps }))
        }
        Commands::Steps { kind, limit } => {
            print_json(&pipeline.ledger.list_claimable(kind.as_deref(), limit).await?)
        }
        Commands::Claim { step_id, worker } => {
            if !pipeline.ledger.claim(step_id, &worker).await? {
                anyhow::bail!("step {} is not queued", step_id);
            }
            print_json(&pipeline.ledger.get(step_id).await?)
        }
        Commands::Complete {
            step_id,
            result,
            error,
        } => {
            let outcome = StepOutcome::from_parts(result, error);
            let Some(report) = pipeline.complete_step(step_id, &outcome).await? else {
                anyhow::bail!("step {} is not running", step_id);
            };
            print_json(&json!({
                "step_id": report.step.step_id,
                "mission_id": report.step.mission_id,
                "step_status": report.step.status,
                "mission_status": report.mission_status,
            }))
        }
        Commands::Work {
            worker_id,
            kinds,
            once,
        } => {
            let worker_id = worker_id
                .or_else(|| config.worker.id.clone())
                .unwrap_or_else(get_hostname);
            let kinds = if kinds.is_empty() {
                config.worker_kinds()
            } else {
                kinds
            };
            if config.executors.is_empty() {
                warn!("no [executors] configured; every claimed step will fail");
            }
            let worker = StepWorker::new(pipeline, CommandExecutor::new(config.executors.clone()), &worker_id)
                .with_kinds(kinds)
                .with_batch_size(config.worker.batch_size)
                .with_poll_interval(config.worker.poll_interval());
            if once {
                let executed = worker.run_once().await?;
                return print_json(&json!({ "worker": worker_id, "executed": executed }));
            }
            db.health_check().await.context("database health check")?;

            let (stop_tx, stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = stop_tx.send(true);
            });
            let executed = worker.run(stop_rx).await;
            print_json(&json!({ "worker": worker_id, "executed": executed }))
        }

        // ── Triggers and events ─────────────────────────────────
        Commands::RuleAdd {
            name,
            event,
            conditions,
            cooldown_minutes,
            disabled,
        } => {
            if cooldown_minutes < 0 {
                anyhow::bail!("--cooldown-minutes must not be negative");
            }
            let rule = NewTriggerRule {
                name,
                trigger_event: event,
                conditions,
                cooldown_minutes,
                enabled: !disabled,
            };
            let id = pipeline.triggers.create_rule(&rule).await?;
            print_json(&json!({ "rule_id": id }))
        }
        Commands::Event {
            agent,
            kind,
            title,
            summary,
            tags,
            trade_id,
            pnl,
            pnl_percent,
            metadata,
        } => {
            let mut event = NewAgentEvent::new(&agent, &kind, &title);
            event.summary = summary;
            event.tags = tags;
            event.trade_id = trade_id;
            event.pnl = pnl;
            event.pnl_percent = pnl_percent;
            event.metadata = metadata;
            let (event, fired) = pipeline.ingest_event(event).await?;
            let fired: Vec<Value> = fired
                .iter()
                .map(|rule| json!({ "rule_id": rule.id, "name": rule.name }))
                .collect();
            print_json(&json!({ "event_id": event.id, "fired": fired }))
        }
        Commands::Events { kind, limit } => print_json(&db.get_recent_events(kind.as_deref(), limit).await?),
    }
}

fn get_hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "worker".to_string())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c.await.ok();
                info!("received SIGINT, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT, shutting down");
    }
}
