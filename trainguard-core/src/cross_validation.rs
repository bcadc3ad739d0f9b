//! K-fold cross-validation over one architecture and dataset.

use crate::collab::{Architecture, Dataset};
use crate::config::TrainguardConfig;
use crate::error::{Result, TrainguardError};
use crate::layout::RunTarget;
use crate::metrics::Evaluation;
use crate::split::SplitTrainer;
use crate::status::TrainingStatus;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How a cross-validation training pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CrossValidationOutcome {
    /// Every split reached COMPLETE.
    Complete { splits: usize },
    /// `split` stopped with `status`; later splits were not attempted.
    Aborted { split: usize, status: TrainingStatus },
}

impl CrossValidationOutcome {
    pub fn status(&self) -> TrainingStatus {
        match self {
            CrossValidationOutcome::Complete { .. } => TrainingStatus::Complete,
            CrossValidationOutcome::Aborted { status, .. } => *status,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, CrossValidationOutcome::Complete { .. })
    }
}

pub struct CrossValidationRunner<'a> {
    architecture: &'a dyn Architecture,
    dataset: &'a dyn Dataset,
    config: &'a TrainguardConfig,
    target: RunTarget,
}

impl<'a> CrossValidationRunner<'a> {
    /// Fails with `InvalidSpec` unless the architecture and dataset agree on
    /// a non-zero number of outputs and the dataset has at least one split.
    pub fn new(
        architecture: &'a dyn Architecture,
        dataset: &'a dyn Dataset,
        config: &'a TrainguardConfig,
        target: RunTarget,
    ) -> Result<Self> {
        let arch_outputs = architecture.output_count();
        let data_outputs = dataset.output_count();
        if arch_outputs == 0 {
            return Err(TrainguardError::invalid_spec(format!(
                "architecture {} declares no outputs",
                architecture.name()
            )));
        }
        if data_outputs == 0 {
            return Err(TrainguardError::invalid_spec(format!(
                "dataset {} declares no outputs",
                dataset.name()
            )));
        }
        if arch_outputs != data_outputs {
            return Err(TrainguardError::invalid_spec(format!(
                "architecture {} has {arch_outputs} outputs but dataset {} has {data_outputs}",
                architecture.name(),
                dataset.name()
            )));
        }
        if dataset.split_count() == 0 {
            return Err(TrainguardError::invalid_spec(format!(
                "dataset {} has no splits",
                dataset.name()
            )));
        }
        Ok(Self {
            architecture,
            dataset,
            config,
            target,
        })
    }

    pub fn split_count(&self) -> usize {
        self.dataset.split_count()
    }

    /// Trainer for split `index`, preparing the dataset on first use.
    pub fn split(&self, index: usize) -> Result<SplitTrainer<'a>> {
        if index >= self.split_count() {
            return Err(TrainguardError::invalid_spec(format!(
                "split {index} out of range for dataset {} with {} splits",
                self.dataset.name(),
                self.split_count()
            )));
        }
        if !self.dataset.exists() {
            info!(dataset = self.dataset.name(), "Preparing dataset splits");
            self.dataset.prepare()?;
        }
        let split = self.dataset.split(index)?;
        Ok(SplitTrainer::new(self.architecture, split, self.config, self.target))
    }

    /// Train splits in order, stopping at the first that does not complete.
    pub fn train(&self) -> Result<CrossValidationOutcome> {
        let splits = self.split_count();
        for index in 0..splits {
            info!(split = index, of = splits, "Training split");
            let status = self.split(index)?.train()?;
            if !status.is_complete() {
                warn!(split = index, %status, "Cross-validation aborted");
                return Ok(CrossValidationOutcome::Aborted {
                    split: index,
                    status,
                });
            }
        }
        info!(splits, "Cross-validation training complete");
        Ok(CrossValidationOutcome::Complete { splits })
    }

    pub fn evaluate_training_set(&self) -> Result<Evaluation> {
        self.mean_over_splits(|trainer| trainer.evaluate_training_set())
    }

    pub fn validate(&self) -> Result<Evaluation> {
        self.mean_over_splits(|trainer| trainer.validate())
    }

    pub fn test(&self) -> Result<Evaluation> {
        self.mean_over_splits(|trainer| trainer.test())
    }

    fn mean_over_splits<F>(&self, op: F) -> Result<Evaluation>
    where
        F: Fn(&SplitTrainer<'a>) -> Result<Evaluation>,
    {
        let evaluations = (0..self.split_count())
            .map(|index| op(&self.split(index)?))
            .collect::<Result<Vec<_>>>()?;
        Evaluation::mean(&evaluations)
    }
}
