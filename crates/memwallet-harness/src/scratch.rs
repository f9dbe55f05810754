//! Temporary directories owned by a harness.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::warn;

use crate::disposable::Disposable;

/// A temporary directory removed on dispose.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl ScratchDir {
    pub fn new(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .context("failed to create scratch directory")?;
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Disposable for ScratchDir {
    fn name(&self) -> String {
        format!("scratch({})", self.path.display())
    }

    fn dispose(&self) {
        if let Some(dir) = self.dir.lock().take() {
            if let Err(e) = dir.close() {
                warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispose_removes_directory() {
        let scratch = ScratchDir::new("memwallet-test").unwrap();
        std::fs::write(scratch.path().join("report.json"), b"{}").unwrap();
        assert!(scratch.path().exists());

        scratch.dispose();
        assert!(!scratch.path().exists());
        scratch.dispose();
    }
}
