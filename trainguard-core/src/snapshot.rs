//! Snapshot lineages: durable weights + scheduler + policy + epoch bundles.
//!
//! Each run keeps two independent lineages, `latest` and `best`. A lineage
//! directory holds exactly four artifacts:
//!
//! | file         | contents                                              |
//! |--------------|-------------------------------------------------------|
//! | `weights.h5` | model parameter bytes                                 |
//! | `lr.dill`    | [`PlateauScheduler`] state (JSON)                     |
//! | `mcp.dill`   | [`PolicyState`] (JSON)                                |
//! | `epoch.dill` | next epoch + SHA-256 of the three other files (JSON)  |
//!
//! Writes go to a staging directory first and are published by directory
//! renames, so readers only ever see a complete lineage or none at all.

use crate::error::{Result, TrainguardError};
use crate::persistence::{sha256_hex, sync_dir, write_synced};
use crate::policy::PolicyState;
use crate::scheduler::PlateauScheduler;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const WEIGHTS_FILE: &str = "weights.h5";
pub const SCHEDULER_FILE: &str = "lr.dill";
pub const POLICY_FILE: &str = "mcp.dill";
pub const EPOCH_FILE: &str = "epoch.dill";

const ARTIFACTS: [&str; 4] = [WEIGHTS_FILE, SCHEDULER_FILE, POLICY_FILE, EPOCH_FILE];

/// One of the two snapshot histories of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lineage {
    Latest,
    Best,
}

impl Lineage {
    pub const ALL: [Lineage; 2] = [Lineage::Latest, Lineage::Best];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Lineage::Latest => "latest",
            Lineage::Best => "best",
        }
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// In-memory view of a lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Next epoch index to resume from.
    pub epoch: u64,
    pub weights: Vec<u8>,
    pub scheduler: PlateauScheduler,
    pub policy: PolicyState,
}

/// Contents of `epoch.dill`, written last as the commit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EpochRecord {
    epoch: u64,
    written_at: DateTime<Utc>,
    digests: ArtifactDigests,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ArtifactDigests {
    weights: String,
    scheduler: String,
    policy: String,
}

/// Owner of the lineage directories of one run.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Store rooted at a run directory, without touching the filesystem.
    ///
    /// Suitable for read-only inspection; writers should use [`SnapshotStore::open`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the store for writing, rolling back any publish that was
    /// interrupted by a crash.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(root);
        store.recover()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lineage_dir(&self, lineage: Lineage) -> PathBuf {
        self.root.join(lineage.dir_name())
    }

    fn staging_dir(&self, lineage: Lineage) -> PathBuf {
        self.root.join(format!(".{}.staging", lineage.dir_name()))
    }

    fn retired_dir(&self, lineage: Lineage) -> PathBuf {
        self.root.join(format!(".{}.retired", lineage.dir_name()))
    }

    /// True iff all four artifacts of the lineage are present.
    pub fn exists(&self, lineage: Lineage) -> bool {
        let dir = self.lineage_dir(lineage);
        ARTIFACTS.iter().all(|name| dir.join(name).is_file())
    }

    /// Write a complete lineage and publish it atomically.
    pub fn write(&self, lineage: Lineage, snapshot: &Snapshot) -> Result<()> {
        let staging = self.staging_dir(lineage);
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir_all(&staging)?;

        let scheduler = serde_json::to_vec_pretty(&snapshot.scheduler)?;
        let policy = serde_json::to_vec_pretty(&snapshot.policy)?;

        write_synced(&staging.join(WEIGHTS_FILE), &snapshot.weights)?;
        write_synced(&staging.join(SCHEDULER_FILE), &scheduler)?;
        write_synced(&staging.join(POLICY_FILE), &policy)?;

        let record = EpochRecord {
            epoch: snapshot.epoch,
            written_at: Utc::now(),
            digests: ArtifactDigests {
                weights: sha256_hex(&snapshot.weights),
                scheduler: sha256_hex(&scheduler),
                policy: sha256_hex(&policy),
            },
        };
        write_synced(
            &staging.join(EPOCH_FILE),
            &serde_json::to_vec_pretty(&record)?,
        )?;
        sync_dir(&staging);

        self.publish(lineage, &staging)?;
        debug!(
            lineage = %lineage,
            epoch = snapshot.epoch,
            dir = %self.lineage_dir(lineage).display(),
            "Snapshot published"
        );
        Ok(())
    }

    fn publish(&self, lineage: Lineage, staging: &Path) -> Result<()> {
        let target = self.lineage_dir(lineage);
        let retired = self.retired_dir(lineage);

        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }
        if target.exists() {
            std::fs::rename(&target, &retired)?;
        }
        std::fs::rename(staging, &target)?;
        sync_dir(&self.root);
        if retired.exists() {
            std::fs::remove_dir_all(&retired)?;
        }
        Ok(())
    }

    /// Read and verify a lineage.
    ///
    /// `SnapshotAbsent` when none of the artifacts exist; `CorruptSnapshot`
    /// when only some exist, a digest disagrees, or a file does not parse.
    pub fn read(&self, lineage: Lineage) -> Result<Snapshot> {
        let dir = self.lineage_dir(lineage);
        let missing: Vec<&str> = ARTIFACTS
            .iter()
            .copied()
            .filter(|name| !dir.join(name).is_file())
            .collect();

        if missing.len() == ARTIFACTS.len() {
            return Err(TrainguardError::SnapshotAbsent { lineage, path: dir });
        }
        if !missing.is_empty() {
            return Err(TrainguardError::corrupt(
                lineage,
                dir,
                format!("missing {}", missing.join(", ")),
            ));
        }

        let record_bytes = std::fs::read(dir.join(EPOCH_FILE))?;
        let record: EpochRecord = serde_json::from_slice(&record_bytes).map_err(|e| {
            TrainguardError::corrupt(lineage, &dir, format!("unreadable {EPOCH_FILE}: {e}"))
        })?;

        let weights = std::fs::read(dir.join(WEIGHTS_FILE))?;
        let scheduler_bytes = std::fs::read(dir.join(SCHEDULER_FILE))?;
        let policy_bytes = std::fs::read(dir.join(POLICY_FILE))?;

        let checks = [
            (WEIGHTS_FILE, &weights, &record.digests.weights),
            (SCHEDULER_FILE, &scheduler_bytes, &record.digests.scheduler),
            (POLICY_FILE, &policy_bytes, &record.digests.policy),
        ];
        for (name, bytes, expected) in checks {
            if sha256_hex(bytes) != *expected {
                return Err(TrainguardError::corrupt(
                    lineage,
                    &dir,
                    format!("{name} does not match epoch {} record", record.epoch),
                ));
            }
        }

        let scheduler: PlateauScheduler = serde_json::from_slice(&scheduler_bytes).map_err(|e| {
            TrainguardError::corrupt(lineage, &dir, format!("unreadable {SCHEDULER_FILE}: {e}"))
        })?;
        let policy: PolicyState = serde_json::from_slice(&policy_bytes).map_err(|e| {
            TrainguardError::corrupt(lineage, &dir, format!("unreadable {POLICY_FILE}: {e}"))
        })?;

        Ok(Snapshot {
            epoch: record.epoch,
            weights,
            scheduler,
            policy,
        })
    }

    /// Roll back publishes interrupted between the two renames and drop
    /// abandoned staging directories.
    fn recover(&self) -> Result<()> {
        for lineage in Lineage::ALL {
            let target = self.lineage_dir(lineage);
            let retired = self.retired_dir(lineage);
            let staging = self.staging_dir(lineage);

            if retired.exists() {
                if target.exists() {
                    std::fs::remove_dir_all(&retired)?;
                } else {
                    warn!(
                        lineage = %lineage,
                        dir = %target.display(),
                        "Restoring previous snapshot after interrupted publish"
                    );
                    std::fs::rename(&retired, &target)?;
                }
            }
            if staging.exists() {
                debug!(lineage = %lineage, "Removing abandoned staging directory");
                std::fs::remove_dir_all(&staging)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::policy::{CheckpointPolicy, MonitorMode, PolicyParams};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn snapshot(epoch: u64, weights: &[u8]) -> Snapshot {
        let policy = CheckpointPolicy::new(&PolicyParams {
            monitor: "val_loss".into(),
            mode: MonitorMode::Auto,
            period: 1,
            total_epochs: 20,
            early_stop_patience: 10,
        });
        Snapshot {
            epoch,
            weights: weights.to_vec(),
            scheduler: PlateauScheduler::new(&SchedulerConfig::default(), 5, 0.001),
            policy: policy.into_state(),
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let snap = snapshot(4, b"weights-v4");

        store.write(Lineage::Latest, &snap).unwrap();
        assert!(store.exists(Lineage::Latest));
        assert!(!store.exists(Lineage::Best));
        assert_eq!(store.read(Lineage::Latest).unwrap(), snap);
    }

    #[test]
    fn test_overwrite_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.write(Lineage::Best, &snapshot(1, b"a")).unwrap();
        store.write(Lineage::Best, &snapshot(2, b"b")).unwrap();

        let read = store.read(Lineage::Best).unwrap();
        assert_eq!(read.epoch, 2);
        assert_eq!(read.weights, b"b".to_vec());
        assert!(!dir.path().join(".best.retired").exists());
        assert!(!dir.path().join(".best.staging").exists());
    }

    #[test]
    fn test_absent_lineage() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        let err = store.read(Lineage::Latest).unwrap_err();
        assert!(err.is_snapshot_absent());
    }

    #[test]
    fn test_each_missing_file_is_corruption() {
        for name in ARTIFACTS {
            let dir = TempDir::new().unwrap();
            let store = SnapshotStore::open(dir.path()).unwrap();
            store.write(Lineage::Latest, &snapshot(3, b"w")).unwrap();
            std::fs::remove_file(store.lineage_dir(Lineage::Latest).join(name)).unwrap();

            assert!(!store.exists(Lineage::Latest));
            match store.read(Lineage::Latest) {
                Err(TrainguardError::CorruptSnapshot { reason, .. }) => {
                    assert!(reason.contains(name), "{reason}")
                }
                other => panic!("expected corruption for missing {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_mismatched_artifact_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.write(Lineage::Latest, &snapshot(3, b"w")).unwrap();
        std::fs::write(
            store.lineage_dir(Lineage::Latest).join(WEIGHTS_FILE),
            b"other weights",
        )
        .unwrap();

        assert!(matches!(
            store.read(Lineage::Latest),
            Err(TrainguardError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_recover_rolls_back_interrupted_publish() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path()).unwrap();
        store.write(Lineage::Latest, &snapshot(5, b"five")).unwrap();

        // Crash after the old lineage was retired but before staging was renamed.
        std::fs::rename(
            store.lineage_dir(Lineage::Latest),
            dir.path().join(".latest.retired"),
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join(".latest.staging")).unwrap();
        std::fs::write(dir.path().join(".latest.staging").join(WEIGHTS_FILE), b"six").unwrap();

        let reopened = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read(Lineage::Latest).unwrap().epoch, 5);
        assert!(!dir.path().join(".latest.staging").exists());
        assert!(!dir.path().join(".latest.retired").exists());
    }
}
