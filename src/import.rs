//! Inbound drop-directory poller.
//!
//! The wire-level receiver (DICOM SCP, HTTP upload handler, a human with
//! `cp`) lands files in the import directory; this service feeds them to the
//! store. A file that fails to classify is logged and deleted — malformed
//! input is dropped, never queued.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Result, StationError};
use crate::events::EventBus;
use crate::fsutil::list_sorted_files;
use crate::store::Store;

const SERVICE: &str = "ImportService";

pub struct ImportService {
    store: Arc<Store>,
    import_dir: PathBuf,
    poll_interval: Duration,
    events: EventBus,
}

impl ImportService {
    pub fn new(
        store: Arc<Store>,
        import_dir: PathBuf,
        poll_interval: Duration,
        events: EventBus,
    ) -> Result<Self> {
        fs::create_dir_all(&import_dir).map_err(|e| {
            StationError::config(format!(
                "cannot create import dir {}: {}",
                import_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            store,
            import_dir,
            poll_interval,
            events,
        })
    }

    pub fn import_dir(&self) -> &std::path::Path {
        &self.import_dir
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("ImportService started on {}", self.import_dir.display());
        loop {
            self.process_inbound();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }
        info!("ImportService stopped");
    }

    /// One pass over the import directory, oldest first.
    pub fn process_inbound(&self) {
        for path in list_sorted_files(&self.import_dir) {
            if !path.exists() {
                continue;
            }
            if let Err(e) = self.store.on_object_received(&path) {
                warn!("Object failed to parse, dropping {}: {}", path.display(), e);
                self.events.emit(
                    SERVICE,
                    format!("Object failed to parse: {}", path.display()),
                );
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to drop {}: {}", path.display(), e);
                }
            }
        }
    }
}
