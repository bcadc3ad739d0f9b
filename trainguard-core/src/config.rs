//! Configuration for trainguard.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Files are read
//! from `~/.config/trainguard/config.toml` and `.trainguard/config.toml` in the
//! workspace directory.

use crate::policy::MonitorMode;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainguardConfig {
    /// Root of the per-run output tree.
    pub out_dir: PathBuf,
    pub checkpoint: CheckpointConfig,
    pub scheduler: SchedulerConfig,
    pub terminate: TerminateConfig,
    /// Mini-batch size handed to the training loop.
    pub batch_size: usize,
    /// Learning rate for freshly created runs. Unset keeps whatever the
    /// compiled model starts with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_lr: Option<f64>,
    /// Append one row per epoch to `log.csv`.
    pub log_csv: bool,
}

impl Default for TrainguardConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("out"),
            checkpoint: CheckpointConfig::default(),
            scheduler: SchedulerConfig::default(),
            terminate: TerminateConfig::default(),
            batch_size: 10,
            initial_lr: None,
            log_csv: true,
        }
    }
}

impl TrainguardConfig {
    /// Reject values no run could work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.checkpoint.period == 0 {
            return Err("checkpoint.period must be at least 1".into());
        }
        if self.checkpoint.monitor.trim().is_empty() {
            return Err("checkpoint.monitor must not be empty".into());
        }
        if self.scheduler.monitor.trim().is_empty() {
            return Err("scheduler.monitor must not be empty".into());
        }
        if !(self.scheduler.factor > 0.0 && self.scheduler.factor < 1.0) {
            return Err(format!(
                "scheduler.factor must be in (0, 1), got {}",
                self.scheduler.factor
            ));
        }
        if self.scheduler.min_lr < 0.0 {
            return Err("scheduler.min_lr must not be negative".into());
        }
        if let Some(lr) = self.initial_lr {
            if !(lr.is_finite() && lr > 0.0) {
                return Err(format!("initial_lr must be positive, got {lr}"));
            }
        }
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".into());
        }
        if self.terminate.token.trim().is_empty() {
            return Err("terminate.token must not be empty".into());
        }
        Ok(())
    }
}

/// Checkpoint policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Epochs between periodic saves of the latest lineage.
    pub period: u64,
    /// Metric compared for the best lineage.
    pub monitor: String,
    pub mode: MonitorMode,
    /// Epochs without improvement that complete a run with no epoch target.
    pub early_stop_patience: u64,
    /// Evaluate and predict from the best lineage instead of the latest.
    pub evaluate_best: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            period: 1,
            monitor: "val_loss".into(),
            mode: MonitorMode::Auto,
            early_stop_patience: 10,
            evaluate_best: true,
        }
    }
}

/// Plateau learning-rate scheduler settings. Patience comes from the run
/// settings since it is part of the run identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub monitor: String,
    pub mode: MonitorMode,
    pub factor: f64,
    pub cooldown: u64,
    pub min_delta: f64,
    pub min_lr: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            monitor: "val_loss".into(),
            mode: MonitorMode::Auto,
            factor: 0.1,
            cooldown: 0,
            min_delta: 1e-4,
            min_lr: 0.0,
        }
    }
}

/// Manual stop file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateConfig {
    pub path: PathBuf,
    pub token: String,
}

impl Default for TerminateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("gen").join("terminate.txt"),
            token: "die".into(),
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "trainguard", "trainguard")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from defaults, config files and environment variables.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TrainguardConfig>,
) -> Result<TrainguardConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrainguardConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".trainguard").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (TRAINGUARD_OUT_DIR, TRAINGUARD_CHECKPOINT__PERIOD, ...)
    figment = figment.merge(Env::prefixed("TRAINGUARD_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Config files that would contribute to [`load_config`], in merge order.
pub fn config_sources(workspace: Option<&Path>) -> Vec<PathBuf> {
    let mut sources = Vec::new();
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            sources.push(user_config);
        }
    }
    if let Some(ws) = workspace {
        let ws_config = ws.join(".trainguard").join("config.toml");
        if ws_config.exists() {
            sources.push(ws_config);
        }
    }
    sources
}
