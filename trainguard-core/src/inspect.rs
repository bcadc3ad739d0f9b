//! Read-only reports over persisted runs.
//!
//! Inspection never repairs anything: interrupted publishes and partial
//! lineages are reported as they are found on disk.

use crate::error::TrainguardError;
use crate::layout::{RunIdentity, RunLayout};
use crate::snapshot::{Lineage, SnapshotStore};
use crate::status::{StatusLedger, TrainingStatus};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LineageReport {
    Present { epoch: u64 },
    Absent,
    Corrupt { reason: String },
}

impl fmt::Display for LineageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineageReport::Present { epoch } => write!(f, "epoch {epoch}"),
            LineageReport::Absent => f.write_str("absent"),
            LineageReport::Corrupt { reason } => write!(f, "corrupt ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusReport {
    Recorded { status: TrainingStatus },
    Missing,
    Corrupt { value: String },
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusReport::Recorded { status } => write!(f, "{status}"),
            StatusReport::Missing => f.write_str("not created"),
            StatusReport::Corrupt { value } => write!(f, "corrupt ({value:?})"),
        }
    }
}

/// State of one split run as found on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitReport {
    pub split: usize,
    pub dir: PathBuf,
    pub status: StatusReport,
    pub latest: LineageReport,
    pub best: LineageReport,
}

impl SplitReport {
    pub fn inspect(out_dir: &Path, identity: &RunIdentity) -> Self {
        let layout = RunLayout::new(out_dir, identity);
        let store = SnapshotStore::new(layout.dir());
        let ledger = StatusLedger::new(layout.status_path());

        let status = match ledger.read() {
            Ok(status) => StatusReport::Recorded { status },
            Err(TrainguardError::NotFound(_)) => StatusReport::Missing,
            Err(TrainguardError::CorruptStatus { value, .. }) => StatusReport::Corrupt { value },
            Err(other) => StatusReport::Corrupt {
                value: other.to_string(),
            },
        };

        Self {
            split: identity.split,
            dir: layout.dir().to_path_buf(),
            status,
            latest: lineage_report(&store, Lineage::Latest),
            best: lineage_report(&store, Lineage::Best),
        }
    }
}

fn lineage_report(store: &SnapshotStore, lineage: Lineage) -> LineageReport {
    match store.read(lineage) {
        Ok(snapshot) => LineageReport::Present {
            epoch: snapshot.epoch,
        },
        Err(TrainguardError::SnapshotAbsent { .. }) => LineageReport::Absent,
        Err(TrainguardError::CorruptSnapshot { reason, .. }) => LineageReport::Corrupt { reason },
        Err(other) => LineageReport::Corrupt {
            reason: other.to_string(),
        },
    }
}
