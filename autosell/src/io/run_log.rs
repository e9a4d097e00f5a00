//! Run reports written to `runs/<run-id>.json` after each automation run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{ItemId, RetainerId, RetainerName};

/// How a whole run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum RunOutcome {
    Succeeded,
    Failed(String),
    Aborted,
}

/// What happened to one sell-list item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ItemStatus {
    /// The run ended before the item was processed.
    NotReached,
    AlreadyListed,
    Missing,
    Listed { price: u32 },
    Cancelled { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_id: ItemId,
    pub item_name: String,
    #[serde(flatten)]
    pub status: ItemStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainerReport {
    pub retainer_id: RetainerId,
    pub retainer_name: RetainerName,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub retainers: Vec<RetainerReport>,
}

impl RunReport {
    pub fn listed_count(&self) -> usize {
        self.items()
            .filter(|item| matches!(item.status, ItemStatus::Listed { .. }))
            .count()
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemReport> {
        self.retainers.iter().flat_map(|retainer| retainer.items.iter())
    }
}

/// Identifier for a run started at `started_at` (sortable, filesystem-safe).
pub fn new_run_id(started_at: DateTime<Utc>) -> String {
    started_at.format("run-%Y%m%dT%H%M%S%.3fZ").to_string()
}

pub fn run_report_path(runs_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir.join(format!("{run_id}.json"))
}

/// Write `report` into `runs_dir`, creating the directory if needed.
pub fn write_run_report(runs_dir: &Path, report: &RunReport) -> Result<PathBuf> {
    let path = run_report_path(runs_dir, &report.run_id);
    fs::create_dir_all(runs_dir)
        .with_context(|| format!("create run dir {}", runs_dir.display()))?;
    let mut buf = serde_json::to_string_pretty(report).context("serialize run report")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
    debug!(path = %path.display(), run_id = %report.run_id, "run report written");
    Ok(path)
}

pub fn load_run_report(path: &Path) -> Result<RunReport> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse run report {}", path.display()))
}
