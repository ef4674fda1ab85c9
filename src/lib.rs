//! # tradeops — Trading Operations Pipeline
//!
//! Agents propose trades; accepted proposals compile into missions made of
//! steps; workers claim steps exactly once and report results; a mission
//! settles when its last step finishes. Trigger rules watch the agent event
//! log and fire at most once per cooldown window.
//!
//! ```text
//! NewProposal ─submit─▶ pending ─accept─▶ accepted ─compile─▶ Mission + queued steps
//!                                                                 │
//!                      StepWorker: list_claimable → claim → execute → complete
//!                                                                 │
//!                                              MissionTracker settles succeeded | failed
//!
//! NewAgentEvent ─record─▶ event log ─▶ TriggerRegistry: candidates → match → fire
//! ```
//!
//! Components are generic over an [`store::OpsStore`]: [`db::Database`] for
//! PostgreSQL, [`store::MemoryStore`] for tests and embedding.

pub mod compiler;
pub mod conditions;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod missions;
pub mod pipeline;
pub mod store;
pub mod triggers;
pub mod types;
pub mod worker;

pub use compiler::{CompileOptions, ProposalCompiler};
pub use conditions::ConditionTree;
pub use error::{OpsError, OpsResult};
pub use ledger::StepLedger;
pub use missions::MissionTracker;
pub use pipeline::{CompletionReport, Pipeline};
pub use store::{MemoryStore, OpsStore};
pub use triggers::TriggerRegistry;
pub use worker::{CommandExecutor, StepExecutor, StepWorker};
