//! [`RunReport`] – what a run did, step by step.
//!
//! One report per invocation, persisted as pretty JSON to
//! `<state_dir>/last-run.json` whether the run succeeded or not.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use rigup_types::{ConvergenceOutcome, ResourceKind, RigError, RunMode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How one planned step ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Not attempted, e.g. `--skip-install`.
    Skipped { reason: String },
    Finished { outcome: ConvergenceOutcome },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position in the run order.
    pub step: usize,
    pub resource: String,
    pub kind: ResourceKind,
    pub status: StepStatus,
    /// Convergence actions executed for this step.
    pub actions: usize,
    /// Failure of an optional step does not abort the run.
    pub optional: bool,
}

impl StepRecord {
    pub fn outcome(&self) -> Option<&ConvergenceOutcome> {
        match &self.status {
            StepStatus::Finished { outcome } => Some(outcome),
            StepStatus::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `None` when the run was rejected before the mode was resolved.
    pub mode: Option<RunMode>,
    pub steps: Vec<StepRecord>,
    /// The error that aborted the run.
    pub failure: Option<RigError>,
}

impl RunReport {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            mode: None,
            steps: Vec::new(),
            failure: None,
        }
    }

    pub fn push(&mut self, record: StepRecord) {
        self.steps.push(record);
    }

    pub fn finish(&mut self, failure: Option<RigError>) {
        self.failure = failure;
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn total_actions(&self) -> usize {
        self.steps.iter().map(|s| s.actions).sum()
    }

    /// Steps that converged with a warning or failed without aborting.
    pub fn attention(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| {
            matches!(
                s.outcome(),
                Some(ConvergenceOutcome::ConvergedWithWarning(_) | ConvergenceOutcome::Failed(_))
            )
        })
    }

    /// Write the report, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), RigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RigError::io(parent, &e))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| RigError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
            remedy: Vec::new(),
        })?;
        fs::write(path, json).map_err(|e| RigError::io(path, &e))
    }

    pub fn load(path: &Path) -> Result<Self, RigError> {
        let raw = fs::read_to_string(path).map_err(|e| RigError::io(path, &e))?;
        serde_json::from_str(&raw).map_err(|e| RigError::Io {
            path: path.display().to_string(),
            details: e.to_string(),
            remedy: vec![format!("rm -f {}", path.display())],
        })
    }
}
