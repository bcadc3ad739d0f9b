//! Create-if-missing adapter over [`TrainingOrchestrator`].
//!
//! Every operation builds a fresh orchestrator, creates the run when it has
//! never been saved, loads the appropriate lineage and drops the model again
//! before returning.

use crate::collab::{Architecture, DataSplit, Predictions};
use crate::config::TrainguardConfig;
use crate::error::{Result, TrainguardError};
use crate::layout::RunTarget;
use crate::metrics::Evaluation;
use crate::orchestrator::TrainingOrchestrator;
use crate::status::TrainingStatus;
use tracing::info;

pub struct SplitTrainer<'a> {
    architecture: &'a dyn Architecture,
    split: Box<dyn DataSplit>,
    config: &'a TrainguardConfig,
    target: RunTarget,
}

impl<'a> SplitTrainer<'a> {
    pub fn new(
        architecture: &'a dyn Architecture,
        split: Box<dyn DataSplit>,
        config: &'a TrainguardConfig,
        target: RunTarget,
    ) -> Self {
        Self {
            architecture,
            split,
            config,
            target,
        }
    }

    pub fn index(&self) -> usize {
        self.split.index()
    }

    /// An orchestrator for this split, without creating or loading anything.
    pub fn orchestrator(&self) -> Result<TrainingOrchestrator<'_>> {
        TrainingOrchestrator::new(self.architecture, self.split.as_ref(), self.config, self.target)
    }

    fn prepared(&self, use_best: bool) -> Result<TrainingOrchestrator<'_>> {
        let mut orchestrator = self.orchestrator()?;
        match orchestrator.ensure_saved() {
            Ok(()) => {}
            Err(TrainguardError::NotFound(_)) => {
                info!(run = %orchestrator.identity(), "No saved run; creating");
                orchestrator.create()?;
            }
            Err(e) => return Err(e),
        }
        orchestrator.load(use_best)?;
        Ok(orchestrator)
    }

    /// Train from the latest lineage.
    pub fn train(&self) -> Result<TrainingStatus> {
        self.prepared(false)?.train()
    }

    pub fn evaluate_training_set(&self) -> Result<Evaluation> {
        self.prepared(self.config.checkpoint.evaluate_best)?
            .evaluate_training_set()
    }

    pub fn validate(&self) -> Result<Evaluation> {
        self.prepared(self.config.checkpoint.evaluate_best)?.validate()
    }

    pub fn test(&self) -> Result<Evaluation> {
        self.prepared(self.config.checkpoint.evaluate_best)?.test()
    }

    pub fn predict(&self, inputs: &[Vec<f32>]) -> Result<Predictions> {
        self.prepared(self.config.checkpoint.evaluate_best)?
            .predict(inputs)
    }
}
