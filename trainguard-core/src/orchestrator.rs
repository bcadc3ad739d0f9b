//! Training orchestrator: lifecycle of one (architecture, split) run.
//!
//! `create` → `load` → `train` / `evaluate` / `predict`. The orchestrator
//! never creates a run on its own; see [`SplitTrainer`](crate::split::SplitTrainer)
//! for the create-if-missing adapter.
//!
//! `train` hands the opaque training loop a set of [`EpochHooks`]. All
//! checkpoint decisions happen inside those hooks: the loop itself only runs
//! epochs and reports logs.

use crate::collab::{
    Architecture, DataSplit, EpochControl, EpochDirective, EpochHooks, FitPlan, LoopError, Model,
    Predictions, SampleSet, WeightSource,
};
use crate::config::TrainguardConfig;
use crate::error::{Result, TrainguardError};
use crate::events::{
    EventBus, EventContext, HandlerOutcome, PolicyEvent, SnapshotHandler, StatusHandler,
    StopHandler,
};
use crate::layout::{RunIdentity, RunLayout, RunTarget};
use crate::metrics::{EpochLogger, Evaluation};
use crate::policy::{CheckpointPolicy, PolicyParams, PolicyState};
use crate::scheduler::PlateauScheduler;
use crate::snapshot::{Lineage, Snapshot, SnapshotStore};
use crate::status::{StatusLedger, TrainingStatus};
use crate::terminate::TerminateOnDemand;
use tracing::{debug, info, warn};

/// Resumable state read from a lineage at the start of `train()`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingState {
    /// Next epoch index to run.
    pub epoch: u64,
    pub scheduler: PlateauScheduler,
    pub policy: PolicyState,
}

impl From<Snapshot> for TrainingState {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            epoch: snapshot.epoch,
            scheduler: snapshot.scheduler,
            policy: snapshot.policy,
        }
    }
}

pub struct TrainingOrchestrator<'a> {
    architecture: &'a dyn Architecture,
    split: &'a dyn DataSplit,
    config: &'a TrainguardConfig,
    identity: RunIdentity,
    layout: RunLayout,
    store: SnapshotStore,
    ledger: StatusLedger,
    model: Option<Box<dyn Model>>,
    loaded_from: Option<Lineage>,
}

impl<'a> TrainingOrchestrator<'a> {
    pub fn new(
        architecture: &'a dyn Architecture,
        split: &'a dyn DataSplit,
        config: &'a TrainguardConfig,
        target: RunTarget,
    ) -> Result<Self> {
        let identity = RunIdentity {
            architecture: architecture.name().to_string(),
            dataset: split.dataset().to_string(),
            loss: architecture.loss().to_string(),
            optimizer: architecture.optimizer().to_string(),
            split: split.index(),
            epochs: target.epochs,
            patience: target.patience,
        };
        let layout = RunLayout::new(&config.out_dir, &identity);
        let store = SnapshotStore::open(layout.dir())?;
        let ledger = StatusLedger::new(layout.status_path());
        Ok(Self {
            architecture,
            split,
            config,
            identity,
            layout,
            store,
            ledger,
            model: None,
            loaded_from: None,
        })
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Lineage the current model was loaded from, if any.
    pub fn loaded_from(&self) -> Option<Lineage> {
        self.loaded_from
    }

    /// True iff the status record and both lineages fully exist.
    pub fn is_saved(&self) -> bool {
        self.ledger.exists() && Lineage::ALL.iter().all(|l| self.store.exists(*l))
    }

    pub fn status(&self) -> Result<TrainingStatus> {
        self.ledger.read()
    }

    /// `Ok` if the run is saved, `CorruptSnapshot` if a lineage is partial,
    /// `NotFound` otherwise.
    pub fn ensure_saved(&self) -> Result<()> {
        if self.is_saved() {
            return Ok(());
        }
        self.check_lineages()?;
        Err(TrainguardError::not_found(format!(
            "training run {}; create it first",
            self.identity
        )))
    }

    /// Fail on the first lineage that is present but not intact.
    fn check_lineages(&self) -> Result<()> {
        for lineage in Lineage::ALL {
            match self.store.read(lineage) {
                Ok(_) => {}
                Err(e) if e.is_snapshot_absent() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Finish a `best` publish cut short after its epoch's `latest` landed.
    ///
    /// `latest` records the epoch that last improved; when that is its own
    /// epoch and `best` lags behind, `latest` is the missing best snapshot.
    fn reconcile_best(&self) -> Result<()> {
        let latest = self.store.read(Lineage::Latest)?;
        if latest.policy.best_epoch != Some(latest.epoch) {
            return Ok(());
        }
        let best = self.store.read(Lineage::Best)?;
        if best.epoch < latest.epoch {
            warn!(
                run = %self.identity,
                best_epoch = best.epoch,
                latest_epoch = latest.epoch,
                "Best snapshot lags its improving epoch; republishing from latest"
            );
            self.store.write(Lineage::Best, &latest)?;
        }
        Ok(())
    }

    /// Start a new run: TRAINING status and both lineages at epoch 0.
    pub fn create(&mut self) -> Result<()> {
        if self.is_saved() {
            return Err(TrainguardError::already_exists(format!(
                "training run {}",
                self.identity
            )));
        }
        self.check_lineages()?;

        self.ledger.write(TrainingStatus::Training)?;

        let mut model = self.compile()?;
        if let Some(lr) = self.config.initial_lr {
            model.set_learning_rate(lr);
        }
        let snapshot = Snapshot {
            epoch: 0,
            weights: model.save_weights()?,
            scheduler: PlateauScheduler::new(
                &self.config.scheduler,
                self.identity.patience,
                model.learning_rate(),
            ),
            policy: CheckpointPolicy::new(&self.policy_params()).into_state(),
        };
        for lineage in Lineage::ALL {
            self.store.write(lineage, &snapshot)?;
        }

        info!(run = %self.identity, dir = %self.layout.dir().display(), "Training run created");
        Ok(())
    }

    /// Compile the architecture and load weights from one lineage.
    pub fn load(&mut self, use_best: bool) -> Result<()> {
        self.ensure_saved()?;
        self.reconcile_best()?;
        let lineage = if use_best { Lineage::Best } else { Lineage::Latest };
        let snapshot = self.store.read(lineage)?;
        let status = self.ledger.read()?;

        // Release the previous model before compiling the next one.
        self.release();
        let mut model = self.compile()?;
        model.load_weights(&snapshot.weights)?;
        self.model = Some(model);
        self.loaded_from = Some(lineage);

        info!(
            run = %self.identity,
            lineage = %lineage,
            epoch = snapshot.epoch,
            %status,
            "Model loaded"
        );
        Ok(())
    }

    /// Resume training from the loaded lineage until the run reaches a
    /// terminal state, is stopped, or the loop fails.
    pub fn train(&mut self) -> Result<TrainingStatus> {
        self.ensure_saved()?;

        let status = self.ledger.read()?;
        if status.is_complete() {
            info!(run = %self.identity, "Training already complete");
            return Ok(status);
        }

        let (Some(model), Some(lineage)) = (self.model.as_mut(), self.loaded_from) else {
            return Err(TrainguardError::NotLoaded(self.identity.to_string()));
        };

        let state = TrainingState::from(self.store.read(lineage)?);
        if state.policy.is_complete() {
            // The final snapshot was published but the status write was lost.
            self.ledger.write(TrainingStatus::Complete)?;
            info!(run = %self.identity, "Training already complete; status repaired");
            return Ok(TrainingStatus::Complete);
        }
        if status.is_failure() {
            info!(run = %self.identity, previous = %status, epoch = state.epoch, "Resuming after failure");
            self.ledger.write(TrainingStatus::Training)?;
        }

        let train_set = self.split.train()?;
        let validation_set = self.split.validation()?;

        model.set_learning_rate(state.scheduler.learning_rate);
        let plan = FitPlan {
            train: &train_set,
            validation: &validation_set,
            initial_epoch: state.epoch,
            epochs: state.policy.completion.loop_epochs(),
            batch_size: self.config.batch_size,
        };

        info!(
            run = %self.identity,
            lineage = %lineage,
            initial_epoch = plan.initial_epoch,
            learning_rate = state.scheduler.learning_rate,
            "Training started"
        );

        let mut hooks = CheckpointHooks {
            policy: CheckpointPolicy::from_state(state.policy),
            scheduler: state.scheduler,
            bus: standard_bus(&self.store, &self.ledger),
            logger: self
                .config
                .log_csv
                .then(|| EpochLogger::new(self.layout.log_path())),
            terminate: TerminateOnDemand::from_config(&self.config.terminate),
            failure: None,
        };

        match model.fit(plan, &mut hooks) {
            Ok(()) => {}
            Err(LoopError::ResourceExhausted(reason)) => {
                hooks.policy.mark_resource_exhausted();
                warn!(run = %self.identity, %reason, "Training loop ran out of resources");
                self.ledger.write(TrainingStatus::ResourceExhausted)?;
                return Ok(TrainingStatus::ResourceExhausted);
            }
            Err(LoopError::Failed(e)) => return Err(TrainguardError::Collaborator(e)),
        }

        if let Some(err) = hooks.failure.take() {
            return Err(err);
        }

        let status = self.ledger.read()?;
        info!(run = %self.identity, %status, phase = ?hooks.policy.phase(), "Training stopped");
        Ok(status)
    }

    pub fn evaluate(&self, samples: &SampleSet) -> Result<Evaluation> {
        Ok(self.loaded_model()?.evaluate(samples)?)
    }

    pub fn evaluate_training_set(&self) -> Result<Evaluation> {
        self.evaluate(&self.split.train()?)
    }

    pub fn validate(&self) -> Result<Evaluation> {
        self.evaluate(&self.split.validation()?)
    }

    pub fn test(&self) -> Result<Evaluation> {
        self.evaluate(&self.split.test()?)
    }

    /// Predict and write the translated predictions to `predictions.txt`.
    pub fn predict(&self, inputs: &[Vec<f32>]) -> Result<Predictions> {
        let outputs = self.loaded_model()?.predict(inputs)?;
        let predictions = Predictions(self.split.translate_predictions(&outputs));
        predictions.save(&self.layout.predictions_path())?;
        debug!(count = predictions.len(), path = %self.layout.predictions_path().display(), "Predictions written");
        Ok(predictions)
    }

    fn loaded_model(&self) -> Result<&dyn Model> {
        self.model
            .as_deref()
            .ok_or_else(|| TrainguardError::NotLoaded(self.identity.to_string()))
    }

    fn compile(&self) -> Result<Box<dyn Model>> {
        let custom = self.architecture.custom_objects();
        debug!(architecture = self.architecture.name(), custom = ?custom, "Compiling model");
        Ok(self.architecture.compile()?)
    }

    fn policy_params(&self) -> PolicyParams {
        PolicyParams {
            monitor: self.config.checkpoint.monitor.clone(),
            mode: self.config.checkpoint.mode,
            period: self.config.checkpoint.period,
            total_epochs: self.identity.epochs,
            early_stop_patience: self.config.checkpoint.early_stop_patience,
        }
    }

    fn release(&mut self) {
        if self.model.take().is_some() {
            debug!(run = %self.identity, "Model released");
        }
        self.loaded_from = None;
    }
}

impl Drop for TrainingOrchestrator<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Handlers wired for every `train()` call.
/// Handlers run in subscription order per event; the policy emits `Period`
/// on every save boundary, so `Completion` only records the status.
fn standard_bus(store: &SnapshotStore, ledger: &StatusLedger) -> EventBus {
    let mut bus = EventBus::new();
    bus.subscribe(
        PolicyEvent::Improvement,
        Box::new(SnapshotHandler::new(store.clone(), Lineage::Best)),
    );
    bus.subscribe(
        PolicyEvent::Period,
        Box::new(SnapshotHandler::new(store.clone(), Lineage::Latest)),
    );
    bus.subscribe(
        PolicyEvent::Completion,
        Box::new(StatusHandler::new(ledger.clone(), TrainingStatus::Complete)),
    );
    bus.subscribe(
        PolicyEvent::NanInf,
        Box::new(StatusHandler::new(ledger.clone(), TrainingStatus::NanDiverged)),
    );
    bus.subscribe(PolicyEvent::NanInf, Box::new(StopHandler));
    bus
}

/// Epoch hooks carrying the checkpoint state machine into the training loop.
///
/// Errors cannot cross the loop boundary, so the first failure is parked in
/// `failure`, the loop is told to stop, and `train()` surfaces it afterwards.
struct CheckpointHooks {
    policy: CheckpointPolicy,
    scheduler: PlateauScheduler,
    bus: EventBus,
    logger: Option<EpochLogger>,
    terminate: TerminateOnDemand,
    failure: Option<TrainguardError>,
}

impl CheckpointHooks {
    fn fail(&mut self, err: TrainguardError) -> EpochDirective {
        warn!(error = %err, "Checkpoint hook failed; stopping training");
        self.failure.get_or_insert(err);
        EpochDirective::stop()
    }

    fn stop_requested(&self, epoch: u64) -> bool {
        let requested = self.terminate.requested();
        if requested {
            info!(epoch, path = %self.terminate.path().display(), "Termination requested");
        }
        requested
    }
}

impl EpochHooks for CheckpointHooks {
    fn on_epoch_begin(&mut self, epoch: u64, learning_rate: f64) -> EpochControl {
        if self.failure.is_some() || self.policy.phase().is_terminal() {
            return EpochControl::Stop;
        }
        info!(epoch, learning_rate, "Epoch started");
        if self.stop_requested(epoch) {
            return EpochControl::Stop;
        }
        EpochControl::Continue
    }

    fn on_epoch_end(
        &mut self,
        epoch: u64,
        logs: &Evaluation,
        model: &dyn WeightSource,
    ) -> EpochDirective {
        if self.failure.is_some() {
            return EpochDirective::stop();
        }

        let diverged = !logs.is_finite();
        let epoch_lr = self.scheduler.learning_rate;

        let mut new_lr = None;
        if !diverged {
            match logs.get(&self.scheduler.monitor) {
                Some(value) => new_lr = self.scheduler.step(epoch, value),
                None => debug!(epoch, monitor = %self.scheduler.monitor, "Scheduler monitor missing from logs"),
            }
        }

        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.append(epoch, logs, epoch_lr) {
                return self.fail(e);
            }
        }

        let metric = logs.get(self.policy.monitor());
        let decision = self.policy.on_epoch_end(epoch, metric, diverged);

        let weights = if decision.needs_snapshot() {
            match model.save_weights() {
                Ok(weights) => Some(weights),
                Err(e) => return self.fail(TrainguardError::Collaborator(e)),
            }
        } else {
            None
        };

        let mut stop = decision.stop;
        for event in &decision.events {
            let ctx = EventContext {
                event: *event,
                epoch,
                weights: weights.as_deref(),
                scheduler: &self.scheduler,
                policy: self.policy.state(),
                logs,
            };
            match self.bus.dispatch(&ctx) {
                Ok(HandlerOutcome::StopTraining) => stop = true,
                Ok(HandlerOutcome::Continue) => {}
                Err(e) => return self.fail(e),
            }
        }

        if !stop && self.stop_requested(epoch) {
            stop = true;
        }

        EpochDirective {
            control: if stop {
                EpochControl::Stop
            } else {
                EpochControl::Continue
            },
            learning_rate: new_lr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, TerminateConfig};
    use crate::policy::{MonitorMode, PolicyPhase};
    use std::path::Path;
    use tempfile::TempDir;

    struct FixedWeights(&'static [u8]);

    impl WeightSource for FixedWeights {
        fn save_weights(&self) -> anyhow::Result<Vec<u8>> {
            Ok(self.0.to_vec())
        }
    }

    struct BrokenWeights;

    impl WeightSource for BrokenWeights {
        fn save_weights(&self) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("device lost")
        }
    }

    fn fixture(root: &Path, total_epochs: u64, period: u64) -> (CheckpointHooks, SnapshotStore, StatusLedger) {
        let store = SnapshotStore::open(root.join("run")).unwrap();
        let ledger = StatusLedger::new(root.join("run").join("status.txt"));
        ledger.write(TrainingStatus::Training).unwrap();
        let policy = CheckpointPolicy::new(&PolicyParams {
            monitor: "val_loss".into(),
            mode: MonitorMode::Auto,
            period,
            total_epochs,
            early_stop_patience: 10,
        });
        let hooks = CheckpointHooks {
            policy,
            scheduler: PlateauScheduler::new(&SchedulerConfig::default(), 2, 0.1),
            bus: standard_bus(&store, &ledger),
            logger: Some(EpochLogger::new(root.join("run").join("log.csv"))),
            terminate: TerminateOnDemand::from_config(&TerminateConfig {
                path: root.join("terminate.txt"),
                token: "die".into(),
            }),
            failure: None,
        };
        (hooks, store, ledger)
    }

    fn logs(val_loss: f64) -> Evaluation {
        [("loss".to_string(), val_loss), ("val_loss".to_string(), val_loss)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_period_and_improvement_write_both_lineages() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, store, _) = fixture(dir.path(), 10, 1);

        let directive = hooks.on_epoch_end(0, &logs(0.5), &FixedWeights(b"e0"));
        assert_eq!(directive.control, EpochControl::Continue);
        assert_eq!(store.read(Lineage::Latest).unwrap().epoch, 1);
        assert_eq!(store.read(Lineage::Best).unwrap().epoch, 1);

        // Worse metric: only latest moves.
        hooks.on_epoch_end(1, &logs(0.9), &FixedWeights(b"e1"));
        assert_eq!(store.read(Lineage::Latest).unwrap().epoch, 2);
        assert_eq!(store.read(Lineage::Best).unwrap().weights, b"e0".to_vec());
    }

    #[test]
    fn test_completion_writes_status_and_stops() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, store, ledger) = fixture(dir.path(), 2, 1);

        hooks.on_epoch_end(0, &logs(0.5), &FixedWeights(b"e0"));
        let directive = hooks.on_epoch_end(1, &logs(0.4), &FixedWeights(b"e1"));
        assert_eq!(directive.control, EpochControl::Stop);
        assert_eq!(ledger.read().unwrap(), TrainingStatus::Complete);

        let latest = store.read(Lineage::Latest).unwrap();
        assert_eq!(latest.epoch, 2);
        assert_eq!(latest.policy.phase, PolicyPhase::Complete);
    }

    #[test]
    fn test_completion_off_period_publishes_latest_once() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, store, ledger) = fixture(dir.path(), 2, 5);
        assert_eq!(hooks.bus.handler_count(PolicyEvent::Completion), 1);
        assert_eq!(hooks.bus.handler_count(PolicyEvent::Period), 1);

        hooks.on_epoch_end(0, &logs(0.5), &FixedWeights(b"e0"));
        assert!(!store.exists(Lineage::Latest));

        let directive = hooks.on_epoch_end(1, &logs(0.4), &FixedWeights(b"e1"));
        assert_eq!(directive.control, EpochControl::Stop);
        assert_eq!(ledger.read().unwrap(), TrainingStatus::Complete);
        let latest = store.read(Lineage::Latest).unwrap();
        let best = store.read(Lineage::Best).unwrap();
        assert_eq!(latest.epoch, 2);
        assert_eq!(latest.policy.phase, PolicyPhase::Complete);
        assert_eq!(best.epoch, 2);
        assert_eq!(best.weights, b"e1".to_vec());
    }

    #[test]
    fn test_failed_latest_publish_never_advances_best() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, store, ledger) = fixture(dir.path(), 10, 1);
        hooks.on_epoch_end(0, &logs(0.5), &FixedWeights(b"e0"));

        // A non-directory staging entry makes the next latest publish fail.
        std::fs::write(dir.path().join("run").join(".latest.staging"), b"x").unwrap();
        let directive = hooks.on_epoch_end(1, &logs(0.4), &FixedWeights(b"e1"));
        assert_eq!(directive.control, EpochControl::Stop);
        assert!(matches!(hooks.failure, Some(TrainguardError::Io(_))));

        let latest = store.read(Lineage::Latest).unwrap();
        let best = store.read(Lineage::Best).unwrap();
        assert_eq!(latest.epoch, 1);
        assert_eq!(best.epoch, 1);
        assert_eq!(best.weights, b"e0".to_vec());
        assert_eq!(ledger.read().unwrap(), TrainingStatus::Training);
    }

    #[test]
    fn test_failed_best_publish_is_recoverable_from_latest() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, store, _) = fixture(dir.path(), 10, 1);
        hooks.on_epoch_end(0, &logs(0.5), &FixedWeights(b"e0"));

        std::fs::write(dir.path().join("run").join(".best.staging"), b"x").unwrap();
        hooks.on_epoch_end(1, &logs(0.4), &FixedWeights(b"e1"));
        assert!(hooks.failure.is_some());

        let latest = store.read(Lineage::Latest).unwrap();
        let best = store.read(Lineage::Best).unwrap();
        assert_eq!(latest.epoch, 2);
        assert_eq!(latest.policy.best_epoch, Some(2));
        assert_eq!(best.epoch, 1);
    }

    #[test]
    fn test_nan_records_status_without_snapshot() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, store, ledger) = fixture(dir.path(), 10, 1);

        let directive = hooks.on_epoch_end(0, &logs(f64::NAN), &BrokenWeights);
        assert_eq!(directive.control, EpochControl::Stop);
        assert!(hooks.failure.is_none());
        assert_eq!(ledger.read().unwrap(), TrainingStatus::NanDiverged);
        assert!(!store.exists(Lineage::Latest));
        assert_eq!(hooks.on_epoch_begin(1, 0.1), EpochControl::Stop);
    }

    #[test]
    fn test_weight_failure_is_parked() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, _, _) = fixture(dir.path(), 10, 1);

        let directive = hooks.on_epoch_end(0, &logs(0.5), &BrokenWeights);
        assert_eq!(directive.control, EpochControl::Stop);
        assert!(matches!(hooks.failure, Some(TrainguardError::Collaborator(_))));
    }

    #[test]
    fn test_terminate_file_stops_at_boundaries() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, _, ledger) = fixture(dir.path(), 10, 1);
        assert_eq!(hooks.on_epoch_begin(0, 0.1), EpochControl::Continue);

        hooks.terminate.request().unwrap();
        let directive = hooks.on_epoch_end(0, &logs(0.5), &FixedWeights(b"e0"));
        assert_eq!(directive.control, EpochControl::Stop);
        assert_eq!(hooks.on_epoch_begin(1, 0.1), EpochControl::Stop);
        assert_eq!(ledger.read().unwrap(), TrainingStatus::Training);
    }

    #[test]
    fn test_plateau_reduction_is_returned_and_persisted() {
        let dir = TempDir::new().unwrap();
        let (mut hooks, store, _) = fixture(dir.path(), 10, 1);

        hooks.on_epoch_end(0, &logs(0.5), &FixedWeights(b"w"));
        hooks.on_epoch_end(1, &logs(0.5), &FixedWeights(b"w"));
        let directive = hooks.on_epoch_end(2, &logs(0.5), &FixedWeights(b"w"));
        let reduced = directive.learning_rate.unwrap();
        assert!((reduced - 0.01).abs() < 1e-12);
        assert_eq!(
            store.read(Lineage::Latest).unwrap().scheduler.learning_rate,
            reduced
        );
    }
}
