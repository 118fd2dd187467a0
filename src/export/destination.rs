//! Export destinations.
//!
//! A destination is an address plus its own slice of the filesystem: a FIFO
//! queue directory of pointer files, a quarantine, and a single backoff
//! watermark shared by every element bound for it. The watermark lives on
//! the destination value, never in a process-wide static, so independent
//! destinations (and tests) cannot interfere with each other.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Result, StationError};
use crate::fsutil::count_files;
use crate::quarantine::Quarantine;
use crate::transport::Address;

/// Per-destination "next eligible time" watermark.
///
/// One failed element can mean the whole destination is down, so eligibility
/// is checked once per poll cycle for the entire queue.
#[derive(Debug)]
pub struct Backoff {
    next_eligible: Mutex<Instant>,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next_eligible: Mutex::new(Instant::now()),
        }
    }

    /// Whether attempts may proceed right now.
    ///
    /// A poisoned lock is recovered, not propagated: the watermark holds a
    /// plain `Instant`, so whatever the panicking holder left behind is
    /// still a usable value and the worker loop must keep running.
    pub fn eligible(&self) -> bool {
        let next = self
            .next_eligible
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *next <= Instant::now()
    }

    /// Suspend attempts for `delay` from now.
    pub fn hold_for(&self, delay: Duration) {
        let mut next = self
            .next_eligible
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *next = Instant::now() + delay;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// One delivery target and its on-disk queue.
#[derive(Debug)]
pub struct ExportDestination {
    name: String,
    address: Address,
    queue_dir: PathBuf,
    quarantine: Quarantine,
    /// Optional "transmitted" archive; when set, delivered payloads are
    /// copied here for the record.
    archive_dir: Option<PathBuf>,
    backoff: Backoff,
}

impl ExportDestination {
    /// Create the destination's queue and quarantine directories under
    /// `export_root/<name>/` and return the destination value.
    pub fn open(
        export_root: &Path,
        name: impl Into<String>,
        address: Address,
        archive_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let name = name.into();
        let queue_dir = export_root.join(&name);
        let quarantine_dir = queue_dir.join("quarantine");
        std::fs::create_dir_all(&quarantine_dir).map_err(|e| {
            StationError::config(format!(
                "cannot create export directories for '{}': {}",
                name, e
            ))
        })?;
        Ok(Self {
            name,
            address,
            queue_dir,
            quarantine: Quarantine::new(quarantine_dir),
            archive_dir,
            backoff: Backoff::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    pub fn quarantine(&self) -> &Quarantine {
        &self.quarantine
    }

    pub fn archive_dir(&self) -> Option<&Path> {
        self.archive_dir.as_deref()
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Depth of this destination's queue (directory entries are the truth).
    pub fn queue_depth(&self) -> usize {
        count_files(&self.queue_dir)
    }
}
