//! Time-based garbage collection for the store.
//!
//! Instances are never deleted by normal processing — several manifests may
//! reference the same instance — so a periodic sweep reclaims them once they
//! have outlived the TTL and no live manifest still needs them. Expired
//! manifests are purged first: an expired, unprocessed manifest forfeits its
//! instances' protection.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fsutil::snapshot_dir;
use crate::object::ClassifiedObject;
use crate::store::Store;

const SERVICE: &str = "GarbageCollector";

/// Floor for the sweep interval; sweeping more often than this buys nothing.
pub const MIN_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Clamp a configured sweep interval into a sane range: at least
/// [`MIN_GC_INTERVAL`], at most one TTL (any longer and files would age far
/// past their deadline before the next sweep).
pub fn clamp_interval(interval: Duration, ttl: Duration) -> Duration {
    interval.clamp(MIN_GC_INTERVAL, ttl.max(MIN_GC_INTERVAL))
}

impl Store {
    /// Remove expired files, preserving referential integrity.
    ///
    /// Pass 1 deletes manifests older than the TTL. Pass 2 collects the
    /// protected set: every instance ID referenced by a manifest still in
    /// the queue or (post-purge) manifests directories. Pass 3 deletes
    /// instances that are both expired and unprotected.
    ///
    /// A manifest that fails to parse contributes nothing to the protected
    /// set — fail-open toward deletion. If the file is only transiently
    /// corrupt its instances may be collected out from under it; the skip is
    /// logged so operators can spot it.
    ///
    /// Returns the number of files deleted.
    pub fn remove_expired_files(&self, ttl: Duration) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut deleted = 0;

        for path in snapshot_dir(self.manifests_dir()) {
            if is_older_than(&path, cutoff) {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        info!("Expired manifest deleted: {}", path.display());
                        deleted += 1;
                    }
                    Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
                }
            }
        }

        let mut protected: HashSet<String> = HashSet::new();
        for dir in [self.queue_dir(), self.manifests_dir()] {
            for path in snapshot_dir(dir) {
                match self.classifier().classify(&path) {
                    Ok(ClassifiedObject::Manifest(doc)) => {
                        protected.extend(doc.instances);
                    }
                    // A corrupt manifest still classifies as a plain
                    // readable file; it protects nothing either way.
                    Ok(_) => {
                        warn!(
                            "Manifest {} no longer parses as a manifest; its instances are unprotected",
                            path.display()
                        );
                        self.events().emit(
                            SERVICE,
                            format!("Unprotected during sweep: {}", path.display()),
                        );
                    }
                    Err(e) => {
                        warn!(
                            "Manifest {} unparseable during sweep; its instances are unprotected: {}",
                            path.display(),
                            e
                        );
                        self.events().emit(
                            SERVICE,
                            format!("Unprotected during sweep: {}", path.display()),
                        );
                    }
                }
            }
        }

        for path in snapshot_dir(self.instances_dir()) {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if is_older_than(&path, cutoff) && !protected.contains(&name) {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        info!("Expired instance deleted: {}", name);
                        deleted += 1;
                    }
                    Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
                }
            }
        }

        if deleted > 0 {
            self.events()
                .emit(SERVICE, format!("Deleted {} expired files", deleted));
        } else {
            self.events().emit(SERVICE, "Found no expired files");
        }
        deleted
    }
}

/// Delete staging-pool payloads older than the TTL.
///
/// Pool files are payloads the processor already fanned out as queue
/// elements; no store manifest references them, so age is the only
/// criterion. A payload still queued for a destination slower than one TTL
/// is lost to that destination; its element quarantines on resolve.
pub fn remove_expired_pool_files(pool_dir: &Path, ttl: Duration) -> usize {
    let cutoff = SystemTime::now()
        .checked_sub(ttl)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut deleted = 0;
    for path in snapshot_dir(pool_dir) {
        if is_older_than(&path, cutoff) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Expired pool payload deleted: {}", path.display());
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
            }
        }
    }
    deleted
}

fn is_older_than(path: &Path, cutoff: SystemTime) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|mtime| mtime < cutoff)
        .unwrap_or(false)
}

/// Periodic sweep worker owned by the store.
pub struct GarbageCollector {
    store: Arc<Store>,
    ttl: Duration,
    interval: Duration,
    /// Staging pool swept alongside the store; delivered payloads otherwise
    /// accumulate there forever.
    pool_dir: Option<PathBuf>,
}

impl GarbageCollector {
    pub fn new(store: Arc<Store>, ttl: Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval: clamp_interval(interval, ttl),
            pool_dir: None,
        }
    }

    /// Also sweep the export staging pool on each pass.
    pub fn with_pool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pool_dir = Some(dir.into());
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Worker loop: sleep first, then sweep, until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("GarbageCollector started (interval {:?})", self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
            self.store.remove_expired_files(self.ttl);
            if let Some(pool) = &self.pool_dir {
                remove_expired_pool_files(pool, self.ttl);
            }
        }
        info!("GarbageCollector stopped");
    }
}
