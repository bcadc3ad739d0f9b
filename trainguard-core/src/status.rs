//! Training status ledger: why a run last stopped.
//!
//! The ledger is a single `status.txt` holding one of `TRAINING`, `COMPLETE`,
//! `RESOURCE` or `NAN`. It is read before anything else so that a completed
//! run can be short-circuited without touching the snapshot lineages.

use crate::error::{Result, TrainguardError};
use crate::persistence::atomic_write;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Outcome recorded for a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingStatus {
    /// Created or resumable.
    Training,
    /// The completion rule fired; further `train()` calls are no-ops.
    Complete,
    /// The training loop ran out of device or host memory.
    ResourceExhausted,
    /// A monitored value became NaN or infinite.
    NanDiverged,
}

impl TrainingStatus {
    /// Value persisted in `status.txt`.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Training => "TRAINING",
            TrainingStatus::Complete => "COMPLETE",
            TrainingStatus::ResourceExhausted => "RESOURCE",
            TrainingStatus::NanDiverged => "NAN",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, TrainingStatus::Complete)
    }

    /// Stopped by a failure condition rather than by finishing.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TrainingStatus::ResourceExhausted | TrainingStatus::NanDiverged
        )
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "TRAINING" => Ok(TrainingStatus::Training),
            "COMPLETE" => Ok(TrainingStatus::Complete),
            "RESOURCE" => Ok(TrainingStatus::ResourceExhausted),
            "NAN" => Ok(TrainingStatus::NanDiverged),
            other => Err(format!("unknown training status: {other:?}")),
        }
    }
}

/// Durable status record of one run.
#[derive(Debug, Clone)]
pub struct StatusLedger {
    path: PathBuf,
}

impl StatusLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the recorded status.
    ///
    /// A missing record is `NotFound`; unparseable contents are `CorruptStatus`.
    pub fn read(&self) -> Result<TrainingStatus> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrainguardError::not_found(format!(
                    "status record {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        raw.parse().map_err(|_| TrainguardError::CorruptStatus {
            path: self.path.clone(),
            value: raw,
        })
    }

    /// Atomically replace the recorded status.
    pub fn write(&self, status: TrainingStatus) -> Result<()> {
        atomic_write(&self.path, status.as_str().as_bytes())?;
        debug!(path = %self.path.display(), %status, "Status recorded");
        Ok(())
    }
}
