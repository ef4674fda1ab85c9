//! # Main — CLI Entry Point
//!
//! Every subcommand works against PostgreSQL. The connection URL comes from
//! `--database-url` / `DATABASE_URL` (a `.env` file is honoured), falling back
//! to `[database].url` in the `--config` TOML.
//!
//! ## Subcommands
//!
//! - Proposals: `propose`, `proposals`, `accept`, `reject`, `compile`
//! - Missions and steps: `mission`, `steps`, `claim`, `complete`, `work`
//! - Triggers and events: `rule-add`, `event`, `events`
//!
//! Data is printed to stdout as JSON; logs go to stderr (or stdout as JSON
//! lines with `LOG_FORMAT=json`).

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tradeops", about = "Trading-operations pipeline: proposals, missions, steps, triggers")]
struct Cli {
    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// TOML config file ([database], [steps], [worker], [executors.<kind>])
    #[arg(long, env = "TRADEOPS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn parse_json(s: &str) -> std::result::Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON: {}", e))
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a trading proposal (status: pending)
    Propose {
        /// Proposing agent
        #[arg(long)]
        agent: String,
        #[arg(long)]
        title: String,
        /// Signal that motivated the trade (e.g. breakout, mean_reversion)
        #[arg(long)]
        signal_type: String,
        #[arg(long)]
        entry_price: Option<f64>,
        #[arg(long)]
        target_price: Option<f64>,
        #[arg(long)]
        stop_loss: Option<f64>,
        /// Step templates as a JSON array of {kind, payload, assigned_to, timeout_secs}
        #[arg(long, value_parser = parse_json)]
        steps: Option<Value>,
        /// Free-form JSON object
        #[arg(long, value_parser = parse_json)]
        metadata: Option<Value>,
    },
    /// List pending proposals, newest first
    Proposals {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Accept a pending proposal
    Accept { id: Uuid },
    /// Reject a pending proposal
    Reject { id: Uuid },
    /// Compile an accepted proposal into a mission with queued steps
    Compile {
        id: Uuid,
        /// Recorded as the mission's creator
        #[arg(long, default_value = "ops")]
        created_by: String,
        #[arg(long, default_value = tradeops::compiler::ENTRY_MISSION_TYPE)]
        mission_type: String,
    },
    /// Show a mission and its steps
    Mission { id: Uuid },
    /// List claimable steps, oldest first
    Steps {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Claim a queued step
    Claim {
        step_id: Uuid,
        /// Worker or agent taking the step
        #[arg(long)]
        worker: String,
    },
    /// Complete a running step; --error marks it failed
    Complete {
        step_id: Uuid,
        #[arg(long, value_parser = parse_json)]
        result: Option<Value>,
        #[arg(long)]
        error: Option<String>,
    },
    /// Run a step worker using the configured executors
    Work {
        /// Worker ID (defaults to [worker].id, then the hostname)
        #[arg(long)]
        worker_id: Option<String>,
        /// Step kinds to poll, comma-separated (defaults to [worker].kinds)
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<String>,
        /// Do one polling pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Register a trigger rule
    RuleAdd {
        #[arg(long)]
        name: String,
        /// Event kind the rule listens for
        #[arg(long)]
        event: String,
        /// Condition object, e.g. '{"pnl": {"$gt": 500}}'
        #[arg(long, value_parser = parse_json, default_value = "{}")]
        conditions: Value,
        #[arg(long, default_value_t = 0)]
        cooldown_minutes: i32,
        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Record an agent event and fire matching trigger rules
    Event {
        #[arg(long)]
        agent: String,
        #[arg(long)]
        kind: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        trade_id: Option<Uuid>,
        #[arg(long)]
        pnl: Option<f64>,
        #[arg(long)]
        pnl_percent: Option<f64>,
        #[arg(long, value_parser = parse_json)]
        metadata: Option<Value>,
    },
    /// List recent agent events, newest first
    Events {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable on stderr otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(cli::run(cli))
}
