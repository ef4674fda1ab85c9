//! TOML configuration for the `tradeops` binary.
//!
//! Every section is optional; a missing file section falls back to defaults.
//!
//! ```toml
//! [database]
//! url = "postgres://ops@localhost/tradeops"   # DATABASE_URL wins when set
//! max_connections = 5
//!
//! [steps]
//! default_timeout_secs = 3600
//!
//! [worker]
//! id = "desk-1"
//! kinds = ["analyze", "execute_trade"]
//! poll_interval_secs = 5
//! batch_size = 10
//!
//! [executors.analyze]
//! command = "python3"
//! args = ["agents/analyze.py"]
//! ```

use crate::compiler::{DEFAULT_STEP_TIMEOUT_SECS, MAX_STEP_TIMEOUT_SECS};
use crate::db::DEFAULT_MAX_CONNECTIONS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

// ── TOML Configuration Structs ──────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub steps: StepsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Step kind → program that executes it.
    #[serde(default)]
    pub executors: BTreeMap<String, ExecutorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsConfig {
    /// Claim deadline for compiled and enqueued steps.
    #[serde(default = "default_step_timeout")]
    pub default_timeout_secs: i64,
}

impl Default for StepsConfig {
    fn default() -> Self {
        StepsConfig {
            default_timeout_secs: default_step_timeout(),
        }
    }
}

fn default_step_timeout() -> i64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

impl StepsConfig {
    /// Falls back to the built-in default for values `validate` would reject.
    pub fn default_timeout(&self) -> chrono::Duration {
        match self.default_timeout_secs {
            secs @ 1..=MAX_STEP_TIMEOUT_SECS => chrono::Duration::seconds(secs),
            _ => chrono::Duration::seconds(DEFAULT_STEP_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: Option<String>,
    /// Step kinds this worker polls for. Empty means the kinds that have an
    /// executor configured.
    #[serde(default)]
    pub kinds: Vec<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            id: None,
            kinds: Vec::new(),
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> i64 {
    10
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

// ── TOML Parsing ────────────────────────────────────────────────

impl OpsConfig {
    pub fn parse(content: &str) -> Result<Self> {
        let config: OpsConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(OpsConfig::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be at least 1");
        }
        if !(1..=MAX_STEP_TIMEOUT_SECS).contains(&self.steps.default_timeout_secs) {
            anyhow::bail!(
                "steps.default_timeout_secs must be between 1 and {}",
                MAX_STEP_TIMEOUT_SECS
            );
        }
        if self.worker.poll_interval_secs == 0 {
            anyhow::bail!("worker.poll_interval_secs must be positive");
        }
        if self.worker.batch_size <= 0 {
            anyhow::bail!("worker.batch_size must be positive");
        }
        for (kind, exec) in &self.executors {
            if exec.command.trim().is_empty() {
                anyhow::bail!("executors.{}.command is empty", kind);
            }
        }
        Ok(())
    }

    /// The kinds a worker should poll: `[worker].kinds`, or every kind with an
    /// executor when that list is empty.
    pub fn worker_kinds(&self) -> Vec<String> {
        if self.worker.kinds.is_empty() {
            self.executors.keys().cloned().collect()
        } else {
            self.worker.kinds.clone()
        }
    }
}
