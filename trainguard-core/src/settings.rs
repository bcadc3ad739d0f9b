//! Run settings file.
//!
//! A settings file names the combination being trained:
//!
//! ```json
//! {
//!   "architecture": "vgg16",
//!   "dataset": "ccc",
//!   "loss": "categorical_crossentropy",
//!   "optimizer": "adam",
//!   "metrics": "accuracy",
//!   "epochs": 20,
//!   "patience": 5
//! }
//! ```

use crate::error::{Result, TrainguardError};
use crate::layout::{RunIdentity, RunTarget};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_patience() -> u64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub architecture: String,
    pub dataset: String,
    pub loss: String,
    pub optimizer: String,
    /// Metrics the architecture reports besides its loss. Descriptive only:
    /// not part of the run identity, so changing it never moves a run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<String>,
    /// Epoch target; 0 trains until the monitored metric plateaus.
    #[serde(default)]
    pub epochs: u64,
    /// Plateau-scheduler patience.
    #[serde(default = "default_patience")]
    pub patience: u64,
    /// Restrict work to a single split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<usize>,
}

impl RunSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TrainguardError::not_found(format!("settings file {}", path.display()))
            } else {
                e.into()
            }
        })?;
        let settings: Self = serde_json::from_slice(&data)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("architecture", &self.architecture),
            ("dataset", &self.dataset),
            ("loss", &self.loss),
            ("optimizer", &self.optimizer),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(TrainguardError::invalid_spec(format!("{field} must not be empty")));
            }
            if value.contains(['/', '\\']) {
                return Err(TrainguardError::invalid_spec(format!(
                    "{field} must not contain path separators: {value:?}"
                )));
            }
        }
        if self.patience == 0 {
            return Err(TrainguardError::invalid_spec("patience must be at least 1"));
        }
        Ok(())
    }

    pub fn target(&self) -> RunTarget {
        RunTarget {
            epochs: self.epochs,
            patience: self.patience,
        }
    }

    pub fn identity(&self, split: usize) -> RunIdentity {
        RunIdentity {
            architecture: self.architecture.clone(),
            dataset: self.dataset.clone(),
            loss: self.loss.clone(),
            optimizer: self.optimizer.clone(),
            split,
            epochs: self.epochs,
            patience: self.patience,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"architecture":"vgg16","dataset":"ccc","loss":"mse","optimizer":"sgd"}"#,
        )
        .unwrap();

        let settings = RunSettings::load(&path).unwrap();
        assert_eq!(settings.epochs, 0);
        assert_eq!(settings.patience, 5);
        assert_eq!(settings.split, None);
        assert_eq!(
            settings.identity(1).relative_dir(),
            Path::new("vgg16-ccc-mse-sgd/0-5/1")
        );
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RunSettings::load(&dir.path().join("nope.json")),
            Err(TrainguardError::NotFound(_))
        ));
    }

    #[test]
    fn test_rejects_path_separators() {
        let settings = RunSettings {
            architecture: "../vgg16".into(),
            dataset: "ccc".into(),
            loss: "mse".into(),
            optimizer: "sgd".into(),
            metrics: None,
            epochs: 10,
            patience: 5,
            split: None,
        };
        assert!(matches!(
            settings.validate(),
            Err(TrainguardError::InvalidSpec(_))
        ));
    }
}
