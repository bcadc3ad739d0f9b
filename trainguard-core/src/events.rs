//! Policy events and the handler registry they are dispatched through.
//!
//! The set of event kinds is fixed; what happens when one fires is decided by
//! the handlers registered for it, in registration order.

use crate::error::{Result, TrainguardError};
use crate::metrics::Evaluation;
use crate::policy::PolicyState;
use crate::scheduler::PlateauScheduler;
use crate::snapshot::{Lineage, Snapshot, SnapshotStore};
use crate::status::{StatusLedger, TrainingStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Events fired by the checkpoint policy at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEvent {
    Period,
    Improvement,
    Completion,
    NanInf,
}

impl PolicyEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyEvent::Period => "on_period",
            PolicyEvent::Improvement => "on_improvement",
            PolicyEvent::Completion => "on_completion",
            PolicyEvent::NanInf => "on_nan_inf",
        }
    }

    /// Whether handlers of this event need the current model weights.
    pub fn persists_snapshot(&self) -> bool {
        !matches!(self, PolicyEvent::NanInf)
    }
}

/// Everything a handler may look at when an event fires.
pub struct EventContext<'a> {
    pub event: PolicyEvent,
    /// 0-based index of the epoch that just finished.
    pub epoch: u64,
    /// Weights after the epoch; only fetched when a snapshot is needed.
    pub weights: Option<&'a [u8]>,
    pub scheduler: &'a PlateauScheduler,
    pub policy: &'a PolicyState,
    pub logs: &'a Evaluation,
}

impl EventContext<'_> {
    /// Epoch index training resumes from after this one.
    pub fn next_epoch(&self) -> u64 {
        self.epoch + 1
    }
}

/// What the loop should do after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Continue,
    StopTraining,
}

/// Observer registered for one or more policy events.
pub trait EventHandler {
    fn name(&self) -> &str;

    fn handle(&mut self, ctx: &EventContext<'_>) -> Result<HandlerOutcome>;
}

/// Event kind → ordered handler list.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<PolicyEvent, Vec<Box<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, event: PolicyEvent, handler: Box<dyn EventHandler>) {
        debug!(event = event.name(), handler = handler.name(), "Handler subscribed");
        self.handlers.entry(event).or_default().push(handler);
    }

    pub fn handler_count(&self, event: PolicyEvent) -> usize {
        self.handlers.get(&event).map_or(0, Vec::len)
    }

    /// Run every handler of `ctx.event` in order.
    ///
    /// The first failing handler aborts the dispatch. Returns `StopTraining`
    /// if any handler asked for it.
    pub fn dispatch(&mut self, ctx: &EventContext<'_>) -> Result<HandlerOutcome> {
        let mut outcome = HandlerOutcome::Continue;
        let Some(handlers) = self.handlers.get_mut(&ctx.event) else {
            return Ok(outcome);
        };
        for handler in handlers.iter_mut() {
            debug!(event = ctx.event.name(), handler = handler.name(), epoch = ctx.epoch, "Dispatching");
            if handler.handle(ctx)? == HandlerOutcome::StopTraining {
                outcome = HandlerOutcome::StopTraining;
            }
        }
        Ok(outcome)
    }
}

/// Persists weights, scheduler, policy and next epoch to one lineage as a
/// single transaction.
pub struct SnapshotHandler {
    store: SnapshotStore,
    lineage: Lineage,
    name: String,
}

impl SnapshotHandler {
    pub fn new(store: SnapshotStore, lineage: Lineage) -> Self {
        Self {
            store,
            lineage,
            name: format!("snapshot:{lineage}"),
        }
    }
}

impl EventHandler for SnapshotHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, ctx: &EventContext<'_>) -> Result<HandlerOutcome> {
        let weights = ctx.weights.ok_or_else(|| {
            TrainguardError::training(format!(
                "{} fired without model weights for the {} lineage",
                ctx.event.name(),
                self.lineage
            ))
        })?;
        let snapshot = Snapshot {
            epoch: ctx.next_epoch(),
            weights: weights.to_vec(),
            scheduler: ctx.scheduler.clone(),
            policy: ctx.policy.clone(),
        };
        self.store.write(self.lineage, &snapshot)?;
        info!(
            lineage = %self.lineage,
            event = ctx.event.name(),
            next_epoch = snapshot.epoch,
            "Checkpoint saved"
        );
        Ok(HandlerOutcome::Continue)
    }
}

/// Records a terminal status in the ledger.
pub struct StatusHandler {
    ledger: StatusLedger,
    status: TrainingStatus,
}

impl StatusHandler {
    pub fn new(ledger: StatusLedger, status: TrainingStatus) -> Self {
        Self { ledger, status }
    }
}

impl EventHandler for StatusHandler {
    fn name(&self) -> &str {
        "status"
    }

    fn handle(&mut self, ctx: &EventContext<'_>) -> Result<HandlerOutcome> {
        self.ledger.write(self.status)?;
        info!(status = %self.status, epoch = ctx.epoch, "Training status updated");
        Ok(HandlerOutcome::Continue)
    }
}

/// Asks the training loop to halt.
pub struct StopHandler;

impl EventHandler for StopHandler {
    fn name(&self) -> &str {
        "stop"
    }

    fn handle(&mut self, ctx: &EventContext<'_>) -> Result<HandlerOutcome> {
        info!(event = ctx.event.name(), epoch = ctx.epoch, "Stopping training loop");
        Ok(HandlerOutcome::StopTraining)
    }
}
