//! Manual stop requests through a well-known file.
//!
//! Writing the stop token (default `die`) to the terminate file asks a running
//! training loop to halt at the next epoch boundary.

use crate::config::TerminateConfig;
use crate::persistence::atomic_write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TerminateOnDemand {
    path: PathBuf,
    token: String,
}

impl TerminateOnDemand {
    pub fn new(path: impl Into<PathBuf>, token: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &TerminateConfig) -> Self {
        Self::new(config.path.clone(), config.token.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the file holds the stop token. A missing or unreadable file
    /// means "keep going".
    pub fn requested(&self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents.trim() == self.token,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Could not read terminate file");
                false
            }
        }
    }

    pub fn request(&self) -> std::io::Result<()> {
        atomic_write(&self.path, self.token.as_bytes())?;
        info!(path = %self.path.display(), "Stop requested");
        Ok(())
    }

    /// Remove a pending stop request. Returns whether one was present.
    pub fn clear(&self) -> std::io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
