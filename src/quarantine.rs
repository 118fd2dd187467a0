//! Quarantine: terminal storage for undeliverable objects.
//!
//! Objects land here when a permanent failure makes retrying pointless:
//! a manifest that cannot be parsed, a payload the anonymizer rejected, a
//! destination that reported a hard error. Nothing leaves the quarantine
//! without operator intervention.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::error::Result;

/// A quarantine directory with collision-safe intake.
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of quarantined files.
    pub fn file_count(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0)
    }

    /// Move a file into the quarantine under a timestamp-prefixed name.
    ///
    /// The prefix keeps entries unique when queue elements for the same
    /// logical object, bound for different destinations, are quarantined in
    /// separate events. If the target name nevertheless already exists, the
    /// incoming file is deleted rather than overwriting the prior entry, so
    /// repeated quarantine attempts stay idempotent and never hang the queue.
    pub fn intake(&self, file: &Path) -> Result<PathBuf> {
        self.intake_stamped(file, &Utc::now().format("%Y%m%d%H%M%S%3f").to_string())
    }

    /// Intake with an explicit stamp; split out so collision handling is
    /// testable without racing the clock.
    pub fn intake_stamped(&self, file: &Path, stamp: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let target = self.dir.join(format!("{}-{}", stamp, name));

        if target.exists() {
            warn!(
                "Quarantine entry {} already exists; dropping duplicate {}",
                target.display(),
                file.display()
            );
            fs::remove_file(file)?;
            return Ok(target);
        }

        fs::rename(file, &target)?;
        Ok(target)
    }
}
