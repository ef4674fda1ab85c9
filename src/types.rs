//! Records persisted by the storage layer and the inputs used to create them.
//!
//! The same structs serve both backends: they derive `sqlx::FromRow` for
//! PostgreSQL and are stored directly by the in-memory store. Statuses are
//! persisted as lowercase text and decoded through `TryFrom<String>`, so an
//! unexpected value surfaces as a decode error instead of a silent default.

use crate::error::OpsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! text_status {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = OpsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(OpsError::UnknownStatus(other.to_string())),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = OpsError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

text_status!(ProposalStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
});

text_status!(MissionStatus {
    Running => "running",
    Succeeded => "succeeded",
    Failed => "failed",
});

text_status!(StepStatus {
    Queued => "queued",
    Running => "running",
    Succeeded => "succeeded",
    Failed => "failed",
});

impl MissionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MissionStatus::Running)
    }
}

impl StepStatus {
    /// Queued and running steps keep their mission open.
    pub fn is_pending(self) -> bool {
        matches!(self, StepStatus::Queued | StepStatus::Running)
    }
}

// ── Proposals ───────────────────────────────────────────────────

/// One entry of a proposal's `proposed_steps` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTemplate {
    #[serde(default = "default_step_kind")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
    #[serde(default)]
    pub assigned_to: Option<String>,
    /// Per-step override of the default claim deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<i64>,
}

fn default_step_kind() -> String {
    "analyze".to_string()
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl StepTemplate {
    pub fn new(kind: &str) -> Self {
        StepTemplate {
            kind: kind.to_string(),
            payload: empty_object(),
            assigned_to: None,
            timeout_secs: None,
        }
    }

    pub fn assigned_to(mut self, agent: &str) -> Self {
        self.assigned_to = Some(agent.to_string());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Proposal {
    pub id: Uuid,
    pub agent_id: String,
    pub title: String,
    pub signal_type: String,
    pub entry_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub proposed_steps: Value,
    pub metadata: Value,
    #[sqlx(try_from = "String")]
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// A pending proposal together with the number of missions already linked to it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PendingProposal {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub proposal: Proposal,
    pub mission_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProposal {
    pub agent_id: String,
    pub title: String,
    pub signal_type: String,
    pub entry_price: Option<f64>,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub proposed_steps: Vec<StepTemplate>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl NewProposal {
    pub fn new(agent_id: &str, title: &str, signal_type: &str) -> Self {
        NewProposal {
            agent_id: agent_id.to_string(),
            title: title.to_string(),
            signal_type: signal_type.to_string(),
            ..Default::default()
        }
    }

    pub fn with_steps(mut self, steps: Vec<StepTemplate>) -> Self {
        self.proposed_steps = steps;
        self
    }

    pub(crate) fn steps_json(&self) -> Value {
        serde_json::to_value(&self.proposed_steps).unwrap_or_else(|_| Value::Array(Vec::new()))
    }

    pub(crate) fn metadata_json(&self) -> Value {
        self.metadata.clone().unwrap_or_else(empty_object)
    }
}

// ── Missions and steps ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Mission {
    pub id: Uuid,
    pub title: String,
    pub created_by: String,
    pub mission_type: String,
    pub proposal_id: Option<Uuid>,
    pub metadata: Value,
    #[sqlx(try_from = "String")]
    pub status: MissionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MissionStep {
    pub id: Uuid,
    pub mission_id: Uuid,
    /// Insertion order; breaks ties between steps created in the same instant.
    pub seq: i64,
    pub kind: String,
    pub payload: Value,
    pub assigned_to: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: StepStatus,
    pub timeout_at: DateTime<Utc>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A claimable step joined with its mission's title and creator.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueuedStep {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub step: MissionStep,
    pub mission_title: String,
    pub mission_created_by: String,
}

#[derive(Debug, Clone)]
pub struct NewStep {
    pub mission_id: Uuid,
    pub kind: String,
    pub payload: Value,
    pub assigned_to: Option<String>,
    pub timeout_at: DateTime<Utc>,
}

/// How a running step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { result: Option<Value> },
    Failed { error: String, result: Option<Value> },
}

impl StepOutcome {
    /// An error message, when present, makes the outcome a failure.
    pub fn from_parts(result: Option<Value>, error: Option<String>) -> Self {
        match error {
            Some(error) => StepOutcome::Failed { error, result },
            None => StepOutcome::Succeeded { result },
        }
    }

    pub fn status(&self) -> StepStatus {
        match self {
            StepOutcome::Succeeded { .. } => StepStatus::Succeeded,
            StepOutcome::Failed { .. } => StepStatus::Failed,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            StepOutcome::Succeeded { result } | StepOutcome::Failed { result, .. } => {
                result.as_ref()
            }
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StepOutcome::Succeeded { .. } => None,
            StepOutcome::Failed { error, .. } => Some(error),
        }
    }
}

/// Returned by a successful completion: which mission to re-evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedStep {
    pub step_id: Uuid,
    pub mission_id: Uuid,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledMission {
    pub mission_id: Uuid,
    pub step_ids: Vec<Uuid>,
}

// ── Triggers and events ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TriggerRule {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub trigger_event: String,
    pub conditions: Value,
    pub cooldown_minutes: i32,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: i32,
    pub created_at: DateTime<Utc>,
}

impl TriggerRule {
    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.cooldown_minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTriggerRule {
    pub name: String,
    pub trigger_event: String,
    pub conditions: Value,
    #[serde(default)]
    pub cooldown_minutes: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AgentEvent {
    pub id: Uuid,
    pub agent_id: String,
    pub kind: String,
    pub title: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub trade_id: Option<Uuid>,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Core event fields visible to trigger conditions. Metadata keys with
/// these names are ignored rather than allowed to shadow them.
const EVENT_FIELDS: [&str; 9] = [
    "agent_id",
    "kind",
    "event_type",
    "title",
    "summary",
    "tags",
    "trade_id",
    "pnl",
    "pnl_percent",
];

impl AgentEvent {
    /// Flatten the event into the field map that conditions are matched against.
    pub fn condition_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("agent_id".into(), Value::from(self.agent_id.clone()));
        fields.insert("kind".into(), Value::from(self.kind.clone()));
        fields.insert("event_type".into(), Value::from(self.kind.clone()));
        fields.insert("title".into(), Value::from(self.title.clone()));
        fields.insert("summary".into(), Value::from(self.summary.clone()));
        fields.insert("tags".into(), Value::from(self.tags.clone()));
        if let Some(trade_id) = self.trade_id {
            fields.insert("trade_id".into(), Value::from(trade_id.to_string()));
        }
        if let Some(pnl) = self.pnl {
            fields.insert("pnl".into(), Value::from(pnl));
        }
        if let Some(pnl_percent) = self.pnl_percent {
            fields.insert("pnl_percent".into(), Value::from(pnl_percent));
        }
        if let Value::Object(meta) = &self.metadata {
            for (key, value) in meta {
                if !EVENT_FIELDS.contains(&key.as_str()) {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
        fields
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAgentEvent {
    pub agent_id: String,
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub trade_id: Option<Uuid>,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl NewAgentEvent {
    pub fn new(agent_id: &str, kind: &str, title: &str) -> Self {
        NewAgentEvent {
            agent_id: agent_id.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            ..Default::default()
        }
    }

    /// Materialize the record a store will persist.
    pub(crate) fn into_event(self, id: Uuid, now: DateTime<Utc>) -> AgentEvent {
        AgentEvent {
            id,
            agent_id: self.agent_id,
            kind: self.kind,
            title: self.title,
            summary: self.summary,
            tags: self.tags,
            trade_id: self.trade_id,
            pnl: self.pnl,
            pnl_percent: self.pnl_percent,
            metadata: self.metadata.unwrap_or_else(empty_object),
            created_at: now,
        }
    }
}
