//! Evaluation results and the per-epoch CSV log.

use crate::error::{Result, TrainguardError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metric name → value, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Evaluation(BTreeMap<String, f64>);

impl Evaluation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// False if any value is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.0.values().all(|v| v.is_finite())
    }

    /// Metric-wise arithmetic mean.
    ///
    /// Every evaluation must carry exactly the same metric names.
    pub fn mean(evaluations: &[Evaluation]) -> Result<Evaluation> {
        let Some((first, rest)) = evaluations.split_first() else {
            return Err(TrainguardError::InconsistentMetrics(
                "cannot average zero evaluations".into(),
            ));
        };

        for (i, other) in rest.iter().enumerate() {
            if !first.0.keys().eq(other.0.keys()) {
                return Err(TrainguardError::InconsistentMetrics(format!(
                    "evaluation {} has metrics [{}], expected [{}]",
                    i + 1,
                    other.keys().collect::<Vec<_>>().join(", "),
                    first.keys().collect::<Vec<_>>().join(", "),
                )));
            }
        }

        let count = evaluations.len() as f64;
        Ok(first
            .0
            .keys()
            .map(|name| {
                let sum: f64 = evaluations.iter().map(|e| e.0[name]).sum();
                (name.clone(), sum / count)
            })
            .collect())
    }
}

impl FromIterator<(String, f64)> for Evaluation {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

const EPOCH_COLUMN: &str = "epoch";
const LR_COLUMN: &str = "lr";

/// Append-only `log.csv` writer, one row per finished epoch.
///
/// The header is written when the file is created. Later sessions reuse the
/// existing header so resumed runs line up with earlier rows. The header is
/// read once per logger; metrics without a column are reported, not written.
#[derive(Debug, Clone)]
pub struct EpochLogger {
    path: PathBuf,
    header: Option<Vec<String>>,
    /// Metrics already reported as missing a column.
    unlogged: BTreeSet<String>,
}

impl EpochLogger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            header: None,
            unlogged: BTreeSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metrics seen in logs that the file has no column for.
    pub fn unlogged(&self) -> &BTreeSet<String> {
        &self.unlogged
    }

    pub fn append(&mut self, epoch: u64, logs: &Evaluation, learning_rate: f64) -> Result<()> {
        if self.header.is_none() {
            self.header = self.read_header()?;
        }
        let is_new = self.header.is_none();
        let header = self.header.get_or_insert_with(|| {
            std::iter::once(EPOCH_COLUMN.to_string())
                .chain(logs.keys().filter(|k| *k != LR_COLUMN).map(str::to_string))
                .chain(std::iter::once(LR_COLUMN.to_string()))
                .collect()
        });

        for name in logs.keys() {
            if header.iter().any(|column| column == name) || self.unlogged.contains(name) {
                continue;
            }
            warn!(
                path = %self.path.display(),
                metric = name,
                epoch,
                "Metric has no column in the epoch log; not recorded"
            );
            self.unlogged.insert(name.to_string());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(header.iter())?;
        }
        let row: Vec<String> = header
            .iter()
            .map(|column| match column.as_str() {
                EPOCH_COLUMN => epoch.to_string(),
                LR_COLUMN => learning_rate.to_string(),
                name => logs.get(name).map(|v| v.to_string()).unwrap_or_default(),
            })
            .collect();
        writer.write_record(&row)?;
        writer.flush()?;

        debug!(path = %self.path.display(), epoch, "Epoch logged");
        Ok(())
    }

    fn read_header(&self) -> Result<Option<Vec<String>>> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        Ok((!header.is_empty()).then_some(header))
    }
}
