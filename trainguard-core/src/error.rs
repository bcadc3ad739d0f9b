//! Error types for the trainguard-core crate.

use crate::snapshot::Lineage;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TrainguardError>;

/// Top-level error type for checkpoint and orchestration operations.
#[derive(Debug, Error)]
pub enum TrainguardError {
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No model loaded for {0}; call load() first")]
    NotLoaded(String),

    #[error("Corrupt {lineage} snapshot at {}: {reason}", .path.display())]
    CorruptSnapshot {
        lineage: Lineage,
        path: PathBuf,
        reason: String,
    },

    #[error("No {lineage} snapshot at {}", .path.display())]
    SnapshotAbsent { lineage: Lineage, path: PathBuf },

    #[error("Corrupt status record at {}: {value:?}", .path.display())]
    CorruptStatus { path: PathBuf, value: String },

    #[error("Inconsistent metrics: {0}")]
    InconsistentMetrics(String),

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TrainguardError {
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn corrupt(lineage: Lineage, path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptSnapshot {
            lineage,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for the legitimate "lineage not yet created" condition.
    pub fn is_snapshot_absent(&self) -> bool {
        matches!(self, Self::SnapshotAbsent { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_snapshot_display() {
        let err = TrainguardError::corrupt(Lineage::Best, "/tmp/run/best", "missing lr.dill");
        assert_eq!(
            err.to_string(),
            "Corrupt best snapshot at /tmp/run/best: missing lr.dill"
        );
    }

    #[test]
    fn test_snapshot_absent_is_distinguishable() {
        let err = TrainguardError::SnapshotAbsent {
            lineage: Lineage::Latest,
            path: PathBuf::from("/tmp/run/latest"),
        };
        assert!(err.is_snapshot_absent());
        assert!(!TrainguardError::not_found("x").is_snapshot_absent());
    }
}
