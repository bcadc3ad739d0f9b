//! Run identity and on-disk layout.
//!
//! A run is addressed by its [`RunIdentity`]; two runs with identical keys
//! resolve to the same directory:
//!
//! ```text
//! <out>/<arch>-<dataset>-<loss>-<optimizer>/<epochs>-<patience>/<split>/
//!     status.txt
//!     log.csv
//!     predictions.txt
//!     latest/  best/
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

const STATUS_FILE: &str = "status.txt";
const LOG_FILE: &str = "log.csv";
const PREDICTIONS_FILE: &str = "predictions.txt";

/// Epoch target and scheduler patience of a run; both are part of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunTarget {
    /// 0 means "until the monitored metric stops improving".
    pub epochs: u64,
    pub patience: u64,
}

/// Identity key of one (architecture, split) training run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    pub architecture: String,
    pub dataset: String,
    pub loss: String,
    pub optimizer: String,
    pub split: usize,
    /// Total-epoch target; 0 means "until the monitored metric stops improving".
    pub epochs: u64,
    /// Plateau-scheduler patience.
    pub patience: u64,
}

impl RunIdentity {
    /// Directory of this run relative to the output root.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}-{}-{}-{}",
            self.architecture, self.dataset, self.loss, self.optimizer
        ))
        .join(format!("{}-{}", self.epochs, self.patience))
        .join(self.split.to_string())
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}/{}-{}/{}",
            self.architecture,
            self.dataset,
            self.loss,
            self.optimizer,
            self.epochs,
            self.patience,
            self.split
        )
    }
}

/// Filesystem paths of one run.
#[derive(Debug, Clone)]
pub struct RunLayout {
    dir: PathBuf,
}

impl RunLayout {
    pub fn new(out_dir: &Path, identity: &RunIdentity) -> Self {
        Self {
            dir: out_dir.join(identity.relative_dir()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.dir.join(PREDICTIONS_FILE)
    }
}
