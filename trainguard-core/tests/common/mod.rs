//! Deterministic collaborators for integration tests.
//!
//! The fake model has a single parameter `w` that moves toward `TARGET` by
//! `lr * (w - TARGET)` each epoch, so its trajectory depends only on the
//! starting weight and the learning-rate schedule.

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use trainguard_core::config::TrainguardConfig;
use trainguard_core::{
    Architecture, DataSplit, Dataset, EpochControl, EpochHooks, Evaluation, FitPlan, LoopError,
    Model, SampleSet, WeightSource,
};

pub const TARGET: f64 = 1.0;
pub const INITIAL_WEIGHT: f64 = 5.0;

/// Failure injection and bookkeeping shared by every model compiled from one
/// architecture.
#[derive(Debug, Default)]
pub struct Behavior {
    /// Raise resource exhaustion on (fit call, epoch). Consumed when it fires.
    pub resource_at: Option<(usize, u64)>,
    /// Report a NaN loss at this epoch. Consumed when it fires.
    pub nan_at: Option<u64>,
    /// Return from `fit` right after this epoch, as if the process died.
    pub crash_after: Option<u64>,
    /// Report a tenfold `val_loss` at this epoch, on every pass.
    pub spike_at: Option<u64>,
    pub fit_calls: usize,
    pub epochs_run: Vec<u64>,
    pub compiles: usize,
}

pub type Shared = Rc<RefCell<Behavior>>;

pub struct FakeModel {
    w: f64,
    lr: f64,
    behavior: Shared,
}

impl FakeModel {
    fn loss(&self) -> f64 {
        (self.w - TARGET).powi(2)
    }
}

impl WeightSource for FakeModel {
    fn save_weights(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.w.to_le_bytes().to_vec())
    }
}

impl Model for FakeModel {
    fn load_weights(&mut self, weights: &[u8]) -> anyhow::Result<()> {
        let bytes: [u8; 8] = weights
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected 8 weight bytes, got {}", weights.len()))?;
        self.w = f64::from_le_bytes(bytes);
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.lr = learning_rate;
    }

    fn fit(&mut self, plan: FitPlan<'_>, hooks: &mut dyn EpochHooks) -> Result<(), LoopError> {
        let call = {
            let mut b = self.behavior.borrow_mut();
            b.fit_calls += 1;
            b.fit_calls - 1
        };

        for epoch in plan.initial_epoch..plan.epochs {
            if hooks.on_epoch_begin(epoch, self.lr) == EpochControl::Stop {
                break;
            }

            {
                let mut b = self.behavior.borrow_mut();
                if b.resource_at == Some((call, epoch)) {
                    b.resource_at = None;
                    return Err(LoopError::ResourceExhausted(format!(
                        "OOM when allocating tensor at epoch {epoch}"
                    )));
                }
            }

            self.w -= self.lr * (self.w - TARGET);
            let mut loss = self.loss();
            let mut val_loss = loss * 1.5;
            {
                let mut b = self.behavior.borrow_mut();
                if b.spike_at == Some(epoch) {
                    val_loss *= 10.0;
                }
                if b.nan_at == Some(epoch) {
                    b.nan_at = None;
                    loss = f64::NAN;
                    val_loss = f64::NAN;
                }
                b.epochs_run.push(epoch);
            }

            let mut logs = Evaluation::new();
            logs.insert("loss", loss);
            logs.insert("val_loss", val_loss);

            let directive = hooks.on_epoch_end(epoch, &logs, &*self);
            if let Some(lr) = directive.learning_rate {
                self.lr = lr;
            }
            if directive.control == EpochControl::Stop {
                break;
            }

            let mut b = self.behavior.borrow_mut();
            if b.crash_after == Some(epoch) {
                b.crash_after = None;
                return Ok(());
            }
        }
        Ok(())
    }

    fn evaluate(&self, samples: &SampleSet) -> anyhow::Result<Evaluation> {
        anyhow::ensure!(!samples.is_empty(), "no samples to evaluate");
        let loss = samples
            .y
            .iter()
            .map(|y| (self.w - f64::from(y[0])).powi(2))
            .sum::<f64>()
            / samples.len() as f64;
        let mut eval = Evaluation::new();
        eval.insert("loss", loss);
        eval.insert("acc", 1.0 / (1.0 + loss));
        Ok(eval)
    }

    fn predict(&self, inputs: &[Vec<f32>]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|x| vec![(self.w * f64::from(x[0])) as f32])
            .collect())
    }
}

pub struct FakeArchitecture {
    pub name: String,
    pub outputs: usize,
    pub learning_rate: f64,
    pub behavior: Shared,
}

impl FakeArchitecture {
    pub fn new() -> Self {
        Self {
            name: "mlp".into(),
            outputs: 1,
            learning_rate: 0.1,
            behavior: Shared::default(),
        }
    }

    pub fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior: Rc::new(RefCell::new(behavior)),
            ..Self::new()
        }
    }

    pub fn epochs_run(&self) -> Vec<u64> {
        self.behavior.borrow().epochs_run.clone()
    }

    pub fn fit_calls(&self) -> usize {
        self.behavior.borrow().fit_calls
    }
}

impl Architecture for FakeArchitecture {
    fn name(&self) -> &str {
        &self.name
    }

    fn loss(&self) -> &str {
        "mse"
    }

    fn optimizer(&self) -> &str {
        "sgd"
    }

    fn output_count(&self) -> usize {
        self.outputs
    }

    fn compile(&self) -> anyhow::Result<Box<dyn Model>> {
        self.behavior.borrow_mut().compiles += 1;
        Ok(Box::new(FakeModel {
            w: INITIAL_WEIGHT,
            lr: self.learning_rate,
            behavior: Rc::clone(&self.behavior),
        }))
    }
}

pub struct FakeSplit {
    dataset: String,
    index: usize,
}

impl FakeSplit {
    pub fn new(index: usize) -> Self {
        Self {
            dataset: "toy".into(),
            index,
        }
    }

    fn samples(&self, value: f32) -> SampleSet {
        SampleSet {
            x: vec![vec![1.0], vec![2.0]],
            y: vec![vec![value], vec![value]],
        }
    }
}

impl DataSplit for FakeSplit {
    fn dataset(&self) -> &str {
        &self.dataset
    }

    fn index(&self) -> usize {
        self.index
    }

    fn train(&self) -> anyhow::Result<SampleSet> {
        Ok(self.samples(TARGET as f32))
    }

    fn validation(&self) -> anyhow::Result<SampleSet> {
        Ok(self.samples(TARGET as f32))
    }

    /// Test targets differ per split so that means are observable.
    fn test(&self) -> anyhow::Result<SampleSet> {
        Ok(self.samples(self.index as f32))
    }

    fn translate_predictions(&self, outputs: &[Vec<f32>]) -> Vec<String> {
        outputs.iter().map(|o| format!("{:.3}", o[0])).collect()
    }
}

pub struct FakeDataset {
    pub splits: usize,
    pub outputs: usize,
    marker: PathBuf,
}

impl FakeDataset {
    pub fn new(root: &Path, splits: usize) -> Self {
        Self {
            splits,
            outputs: 1,
            marker: root.join("data").join("toy").join(".prepared"),
        }
    }
}

impl Dataset for FakeDataset {
    fn name(&self) -> &str {
        "toy"
    }

    fn split_count(&self) -> usize {
        self.splits
    }

    fn output_count(&self) -> usize {
        self.outputs
    }

    fn exists(&self) -> bool {
        self.marker.is_file()
    }

    fn prepare(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.marker, b"ok")?;
        Ok(())
    }

    fn split(&self, index: usize) -> anyhow::Result<Box<dyn DataSplit>> {
        anyhow::ensure!(self.exists(), "dataset not prepared");
        Ok(Box::new(FakeSplit::new(index)))
    }
}

/// Config rooted in a temporary directory.
pub fn config(root: &Path) -> TrainguardConfig {
    let mut config = TrainguardConfig::default();
    config.out_dir = root.join("out");
    config.terminate.path = root.join("gen").join("terminate.txt");
    config
}
