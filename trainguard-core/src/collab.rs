//! External collaborators: the model, its architecture and the dataset.
//!
//! Numeric compilation, data loading and the gradient-descent loop all live
//! behind these traits. Implementations report failures through `anyhow`; the
//! training loop additionally distinguishes resource exhaustion so that the
//! orchestrator can record it.

use crate::error::Result;
use crate::metrics::Evaluation;
use crate::persistence::atomic_write;
use std::path::Path;
use thiserror::Error;

/// Inputs and targets of one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    pub x: Vec<Vec<f32>>,
    pub y: Vec<Vec<f32>>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// Human-readable predictions, one line per input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predictions(pub Vec<String>);

impl Predictions {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = self.0.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        atomic_write(path, text.as_bytes())?;
        Ok(())
    }
}

/// Failure raised from inside the training loop.
#[derive(Debug, Error)]
pub enum LoopError {
    /// Device or host memory ran out; the run may be resumed later.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// One invocation of the training loop.
#[derive(Debug, Clone, Copy)]
pub struct FitPlan<'a> {
    pub train: &'a SampleSet,
    pub validation: &'a SampleSet,
    /// First epoch index to run.
    pub initial_epoch: u64,
    /// Exclusive upper bound on epoch indices.
    pub epochs: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochControl {
    Continue,
    Stop,
}

/// Returned by [`EpochHooks::on_epoch_end`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochDirective {
    pub control: EpochControl,
    /// Learning rate to use from the next epoch on, if it changed.
    pub learning_rate: Option<f64>,
}

impl EpochDirective {
    pub fn stop() -> Self {
        Self {
            control: EpochControl::Stop,
            learning_rate: None,
        }
    }
}

/// Serialized parameters of a model.
pub trait WeightSource {
    fn save_weights(&self) -> anyhow::Result<Vec<u8>>;
}

/// Per-epoch callbacks the training loop must honor.
pub trait EpochHooks {
    /// Called before epoch `epoch` runs with the rate it will use.
    fn on_epoch_begin(&mut self, epoch: u64, learning_rate: f64) -> EpochControl;

    /// Called after epoch `epoch` with its logs. `model` gives access to the
    /// weights as they stand after the epoch.
    fn on_epoch_end(
        &mut self,
        epoch: u64,
        logs: &Evaluation,
        model: &dyn WeightSource,
    ) -> EpochDirective;
}

/// A compiled, trainable model.
///
/// `fit` runs epochs `plan.initial_epoch..plan.epochs` in order. Before each
/// epoch it calls `on_epoch_begin` and after it `on_epoch_end`, applying any
/// returned learning rate and halting as soon as either hook says `Stop`.
pub trait Model: WeightSource {
    fn load_weights(&mut self, weights: &[u8]) -> anyhow::Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, learning_rate: f64);

    fn fit(
        &mut self,
        plan: FitPlan<'_>,
        hooks: &mut dyn EpochHooks,
    ) -> std::result::Result<(), LoopError>;

    fn evaluate(&self, samples: &SampleSet) -> anyhow::Result<Evaluation>;

    /// Raw network outputs, one row per input.
    fn predict(&self, inputs: &[Vec<f32>]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// A model definition that can be compiled into a fresh [`Model`].
pub trait Architecture {
    fn name(&self) -> &str;

    fn loss(&self) -> &str;

    fn optimizer(&self) -> &str;

    /// Width of the output layer.
    fn output_count(&self) -> usize;

    /// Names of custom losses or layers the compiled graph depends on.
    fn custom_objects(&self) -> Vec<String> {
        Vec::new()
    }

    /// Build a freshly initialized model. Used for both creation and loading,
    /// so persisted weights always attach to an identical graph.
    fn compile(&self) -> anyhow::Result<Box<dyn Model>>;
}

/// One cross-validation split of a dataset.
pub trait DataSplit {
    fn dataset(&self) -> &str;

    fn index(&self) -> usize;

    fn train(&self) -> anyhow::Result<SampleSet>;

    fn validation(&self) -> anyhow::Result<SampleSet>;

    fn test(&self) -> anyhow::Result<SampleSet>;

    /// Turn raw outputs into printable predictions.
    fn translate_predictions(&self, outputs: &[Vec<f32>]) -> Vec<String>;
}

/// A dataset partitioned into K splits.
pub trait Dataset {
    fn name(&self) -> &str;

    fn split_count(&self) -> usize;

    fn output_count(&self) -> usize;

    /// Whether the on-disk split layout is already in place.
    fn exists(&self) -> bool;

    /// Lay out the splits on disk.
    fn prepare(&self) -> anyhow::Result<()>;

    fn split(&self, index: usize) -> anyhow::Result<Box<dyn DataSplit>>;
}
