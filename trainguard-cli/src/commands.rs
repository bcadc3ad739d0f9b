//! Subcommand handlers.

use anyhow::Context;
use std::path::{Path, PathBuf};
use trainguard_core::TrainguardConfig;
use trainguard_core::inspect::SplitReport;
use trainguard_core::{RunLayout, RunSettings, TerminateOnDemand};

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Show status and snapshot epochs of every split of a run
    Status {
        /// Run settings JSON file
        settings: PathBuf,
        /// Number of cross-validation splits
        #[arg(short, long, default_value_t = 1)]
        splits: usize,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask running training loops to stop at the next epoch boundary
    Stop,
    /// Withdraw a pending stop request
    Resume,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the run directory of every split
    Paths {
        /// Run settings JSON file
        settings: PathBuf,
        /// Number of cross-validation splits
        #[arg(short, long, default_value_t = 1)]
        splits: usize,
    },
}

#[derive(clap::Subcommand, Debug)]
pub enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective configuration
    Show,
}

pub fn handle_command(
    command: Commands,
    workspace: &Path,
    config: &TrainguardConfig,
) -> anyhow::Result<()> {
    match command {
        Commands::Status {
            settings,
            splits,
            json,
        } => handle_status(&settings, splits, json, config),
        Commands::Stop => {
            let terminate = TerminateOnDemand::from_config(&config.terminate);
            terminate.request()?;
            println!("Stop requested via {}", terminate.path().display());
            Ok(())
        }
        Commands::Resume => {
            let terminate = TerminateOnDemand::from_config(&config.terminate);
            if terminate.clear()? {
                println!("Stop request withdrawn");
            } else {
                println!("No pending stop request");
            }
            Ok(())
        }
        Commands::Config { action } => handle_config(action, workspace, config),
        Commands::Paths { settings, splits } => {
            let settings = RunSettings::load(&settings)?;
            for split in split_indices(&settings, splits) {
                let layout = RunLayout::new(&config.out_dir, &settings.identity(split));
                println!("{}", layout.dir().display());
            }
            Ok(())
        }
    }
}

/// Resolve relative paths in the configuration against the workspace.
pub fn anchor_paths(mut config: TrainguardConfig, workspace: &Path) -> TrainguardConfig {
    if config.out_dir.is_relative() {
        config.out_dir = workspace.join(&config.out_dir);
    }
    if config.terminate.path.is_relative() {
        config.terminate.path = workspace.join(&config.terminate.path);
    }
    config
}

fn split_indices(settings: &RunSettings, splits: usize) -> Vec<usize> {
    match settings.split {
        Some(split) => vec![split],
        None => (0..splits.max(1)).collect(),
    }
}

fn handle_status(
    settings_path: &Path,
    splits: usize,
    json: bool,
    config: &TrainguardConfig,
) -> anyhow::Result<()> {
    let settings = RunSettings::load(settings_path)
        .with_context(|| format!("loading {}", settings_path.display()))?;
    let reports: Vec<SplitReport> = split_indices(&settings, splits)
        .into_iter()
        .map(|split| SplitReport::inspect(&config.out_dir, &settings.identity(split)))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print!("{}", render_status(&settings, &reports));
    }
    Ok(())
}

fn render_status(settings: &RunSettings, reports: &[SplitReport]) -> String {
    let mut out = format!(
        "{}-{}-{}-{} ({} epochs, patience {}",
        settings.architecture,
        settings.dataset,
        settings.loss,
        settings.optimizer,
        if settings.epochs == 0 {
            "open-ended".to_string()
        } else {
            settings.epochs.to_string()
        },
        settings.patience
    );
    if let Some(metrics) = &settings.metrics {
        out.push_str(&format!(", metrics {metrics}"));
    }
    out.push_str(")\n");
    for report in reports {
        out.push_str(&format!(
            "  split {:<3} {:<12} latest: {:<12} best: {}\n",
            report.split,
            report.status.to_string(),
            report.latest.to_string(),
            report.best
        ));
    }
    out
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: &TrainguardConfig,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".trainguard");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = TrainguardConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            for source in trainguard_core::config::config_sources(Some(workspace)) {
                println!("# from {}", source.display());
            }
            println!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
    }
}
