//! Plateau learning-rate scheduler.
//!
//! Reduces the learning rate by `factor` once the monitored metric has not
//! improved for `patience` epochs, then waits `cooldown` epochs before it
//! starts counting again. The whole controller is plain data so that it can
//! be persisted in every snapshot (`lr.dill`) and rehydrated on resume.

use crate::config::SchedulerConfig;
use crate::policy::Direction;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Persisted plateau scheduler state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauScheduler {
    pub monitor: String,
    pub direction: Direction,
    pub factor: f64,
    pub patience: u64,
    pub cooldown: u64,
    pub min_delta: f64,
    pub min_lr: f64,
    pub best: Option<f64>,
    pub wait: u64,
    pub cooldown_counter: u64,
    /// Learning rate the model should train the next epoch with.
    pub learning_rate: f64,
}

impl PlateauScheduler {
    pub fn new(config: &SchedulerConfig, patience: u64, learning_rate: f64) -> Self {
        Self {
            monitor: config.monitor.clone(),
            direction: config.mode.resolve(&config.monitor),
            factor: config.factor,
            patience,
            cooldown: config.cooldown,
            min_delta: config.min_delta,
            min_lr: config.min_lr,
            best: None,
            wait: 0,
            cooldown_counter: 0,
            learning_rate,
        }
    }

    pub fn in_cooldown(&self) -> bool {
        self.cooldown_counter > 0
    }

    /// Feed the monitored value of a finished epoch.
    ///
    /// Returns the new learning rate when a reduction happened.
    pub fn step(&mut self, epoch: u64, current: f64) -> Option<f64> {
        if !current.is_finite() {
            warn!(epoch, monitor = %self.monitor, "Monitored value is not finite; skipping plateau update");
            return None;
        }

        if self.in_cooldown() {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if self.direction.improves(current, self.best, self.min_delta) {
            self.best = Some(current);
            self.wait = 0;
            return None;
        }

        if self.in_cooldown() {
            return None;
        }

        self.wait += 1;
        if self.wait < self.patience || self.learning_rate <= self.min_lr {
            return None;
        }

        let old_lr = self.learning_rate;
        let new_lr = (old_lr * self.factor).max(self.min_lr);
        self.learning_rate = new_lr;
        self.cooldown_counter = self.cooldown;
        self.wait = 0;
        info!(
            epoch,
            monitor = %self.monitor,
            old_lr,
            new_lr,
            "Reducing learning rate on plateau"
        );
        Some(new_lr)
    }
}
