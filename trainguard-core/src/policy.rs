//! Checkpoint policy: the epoch-level state machine.
//!
//! After every epoch the policy decides which of the [`PolicyEvent`]s fire.
//! A non-finite monitored value terminates the run (`NanInf`) without
//! advancing any counter. Otherwise the epoch is a save boundary when `period`
//! epochs have passed since the last save or the completion rule is met, and
//! on a save boundary the events fire in this order:
//!
//! 1. `Period`: the latest lineage is written;
//! 2. `Improvement`: the monitored metric beat the best seen so far;
//! 3. `Completion`: the run is finished.
//!
//! `latest` is always published before `best` for the same epoch, so an
//! interrupted epoch can never leave `best` ahead of `latest`.
//!
//! The policy only decides. Persisting snapshots, updating the status ledger
//! and stopping the loop are the job of the handlers registered on the
//! [`EventBus`](crate::events::EventBus).

use crate::events::PolicyEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How the monitored metric is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    GreaterIsBetter,
    LessIsBetter,
}

impl Direction {
    /// Strict improvement test with an optional margin.
    ///
    /// With no best value recorded yet any finite value is an improvement.
    pub fn improves(self, current: f64, best: Option<f64>, min_delta: f64) -> bool {
        if !current.is_finite() {
            return false;
        }
        match best {
            None => true,
            Some(best) => match self {
                Direction::GreaterIsBetter => current > best + min_delta,
                Direction::LessIsBetter => current < best - min_delta,
            },
        }
    }
}

/// Configured optimization mode of a monitored metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    /// Infer from the metric name, see [`infer_direction`].
    #[default]
    Auto,
    Min,
    Max,
}

impl MonitorMode {
    /// Resolve to a concrete direction. An explicit mode always wins over
    /// the name-based inference.
    pub fn resolve(self, monitor: &str) -> Direction {
        match self {
            MonitorMode::Min => Direction::LessIsBetter,
            MonitorMode::Max => Direction::GreaterIsBetter,
            MonitorMode::Auto => infer_direction(monitor),
        }
    }
}

/// Infer the comparison direction from a metric name.
///
/// Accuracy-like names (`acc`, `val_acc`, `categorical_accuracy`, `fmeasure`)
/// are greater-is-better; everything else (losses, errors) is less-is-better.
pub fn infer_direction(monitor: &str) -> Direction {
    let name = monitor.to_ascii_lowercase();
    if name.contains("acc") || name.starts_with("fmeasure") {
        Direction::GreaterIsBetter
    } else {
        Direction::LessIsBetter
    }
}

/// When a run counts as finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CompletionRule {
    /// Finish after a fixed number of epochs.
    Epochs { total: u64 },
    /// Finish once the monitored metric has not improved for `patience`
    /// consecutive epochs.
    Patience {
        patience: u64,
        best: Option<f64>,
        wait: u64,
    },
}

impl CompletionRule {
    /// Rule for an epoch target; a target of 0 selects patience-based completion.
    pub fn for_target(total_epochs: u64, early_stop_patience: u64) -> Self {
        if total_epochs > 0 {
            CompletionRule::Epochs {
                total: total_epochs,
            }
        } else {
            CompletionRule::Patience {
                patience: early_stop_patience.max(1),
                best: None,
                wait: 0,
            }
        }
    }

    /// Epoch count handed to the training loop.
    pub fn loop_epochs(&self) -> u64 {
        match self {
            CompletionRule::Epochs { total } => *total,
            CompletionRule::Patience { .. } => u64::MAX,
        }
    }
}

/// Lifecycle phase of the policy. Everything but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPhase {
    Running,
    Complete,
    TerminatedResource,
    TerminatedNan,
}

impl PolicyPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PolicyPhase::Running)
    }
}

/// Construction parameters for a fresh policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyParams {
    pub monitor: String,
    pub mode: MonitorMode,
    pub period: u64,
    pub total_epochs: u64,
    pub early_stop_patience: u64,
}

/// Persisted policy state (`mcp.dill`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    pub monitor: String,
    pub direction: Direction,
    pub period: u64,
    pub epochs_since_last_save: u64,
    pub best: Option<f64>,
    /// Snapshot epoch at which `best` was recorded.
    #[serde(default)]
    pub best_epoch: Option<u64>,
    pub completion: CompletionRule,
    pub phase: PolicyPhase,
}

impl PolicyState {
    pub fn is_complete(&self) -> bool {
        self.phase == PolicyPhase::Complete
    }
}

/// Result of feeding one epoch into the policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EpochDecision {
    /// Events in dispatch order.
    pub events: Vec<PolicyEvent>,
    /// The policy reached a terminal phase; the loop must halt.
    pub stop: bool,
}

impl EpochDecision {
    /// True if any event needs the model weights.
    pub fn needs_snapshot(&self) -> bool {
        self.events.iter().any(|e| e.persists_snapshot())
    }

    pub fn fired(&self, event: PolicyEvent) -> bool {
        self.events.contains(&event)
    }
}

/// The checkpoint state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointPolicy {
    state: PolicyState,
}

impl CheckpointPolicy {
    pub fn new(params: &PolicyParams) -> Self {
        Self {
            state: PolicyState {
                monitor: params.monitor.clone(),
                direction: params.mode.resolve(&params.monitor),
                period: params.period.max(1),
                epochs_since_last_save: 0,
                best: None,
                best_epoch: None,
                completion: CompletionRule::for_target(
                    params.total_epochs,
                    params.early_stop_patience,
                ),
                phase: PolicyPhase::Running,
            },
        }
    }

    /// Rehydrate from a persisted state.
    pub fn from_state(state: PolicyState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    pub fn into_state(self) -> PolicyState {
        self.state
    }

    pub fn phase(&self) -> PolicyPhase {
        self.state.phase
    }

    pub fn monitor(&self) -> &str {
        &self.state.monitor
    }

    /// Record that the training loop failed with resource exhaustion.
    pub fn mark_resource_exhausted(&mut self) {
        if !self.state.phase.is_terminal() {
            self.state.phase = PolicyPhase::TerminatedResource;
        }
    }

    /// Advance the state machine for the epoch with index `epoch` (0-based).
    ///
    /// `metric` is the monitored value if the loop reported it; `diverged` is
    /// set when any reported value was NaN or infinite.
    pub fn on_epoch_end(&mut self, epoch: u64, metric: Option<f64>, diverged: bool) -> EpochDecision {
        if self.state.phase.is_terminal() {
            warn!(epoch, phase = ?self.state.phase, "Epoch reported after policy reached a terminal phase");
            return EpochDecision {
                events: Vec::new(),
                stop: true,
            };
        }

        if diverged || metric.is_some_and(|m| !m.is_finite()) {
            self.state.phase = PolicyPhase::TerminatedNan;
            warn!(epoch, monitor = %self.state.monitor, "Non-finite value reported, terminating");
            return EpochDecision {
                events: vec![PolicyEvent::NanInf],
                stop: true,
            };
        }

        self.state.epochs_since_last_save += 1;

        let completed = self.check_completion(epoch, metric);
        let save_due = completed || self.state.epochs_since_last_save >= self.state.period;
        if !save_due {
            return EpochDecision::default();
        }

        self.state.epochs_since_last_save = 0;
        let mut events = vec![PolicyEvent::Period];

        // Improvement is only judged where a latest snapshot is also written,
        // so the best lineage never runs ahead of the latest one.
        match metric {
            Some(current) if self.state.direction.improves(current, self.state.best, 0.0) => {
                info!(
                    epoch,
                    monitor = %self.state.monitor,
                    previous = ?self.state.best,
                    current,
                    "Monitored metric improved"
                );
                self.state.best = Some(current);
                self.state.best_epoch = Some(epoch + 1);
                events.push(PolicyEvent::Improvement);
            }
            Some(current) => {
                debug!(epoch, monitor = %self.state.monitor, best = ?self.state.best, current, "No improvement");
            }
            None => {
                warn!(epoch, monitor = %self.state.monitor, "Monitored metric missing from epoch logs");
            }
        }

        if completed {
            self.state.phase = PolicyPhase::Complete;
            events.push(PolicyEvent::Completion);
        }

        EpochDecision {
            events,
            stop: completed,
        }
    }

    fn check_completion(&mut self, epoch: u64, metric: Option<f64>) -> bool {
        let direction = self.state.direction;
        match &mut self.state.completion {
            CompletionRule::Epochs { total } => epoch + 1 >= *total,
            CompletionRule::Patience {
                patience,
                best,
                wait,
            } => {
                match metric {
                    Some(current) if direction.improves(current, *best, 0.0) => {
                        *best = Some(current);
                        *wait = 0;
                    }
                    _ => *wait += 1,
                }
                *wait >= *patience
            }
        }
    }
}
