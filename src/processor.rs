//! The object processor: bridge from the store's queue to the export layer.
//!
//! Takes completed manifests oldest-first, pushes the manifest payload and
//! every referenced instance through the anonymizer into the export pool,
//! and fans each pool file out as one queue element per destination. The
//! manifest file is only deleted once every destination has been enqueued,
//! which keeps its instances protected from the garbage collector until the
//! hand-off is complete. Instances themselves are never deleted here —
//! other manifests may reference them; the TTL flushes them out later.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::anonymizer::{Anonymizer, AnonymizerOutcome};
use crate::error::{Result, StationError};
use crate::events::EventBus;
use crate::export::destination::ExportDestination;
use crate::object::ClassifiedObject;
use crate::quarantine::Quarantine;
use crate::queue::QueueElement;
use crate::store::Store;

const SERVICE: &str = "ObjectProcessor";

enum FileVerdict {
    Continue,
    /// The anonymizer condemned this payload; the whole manifest must be
    /// quarantined and the rest of its references skipped.
    Abort(String),
}

pub struct ObjectProcessor {
    store: Arc<Store>,
    anonymizer: Arc<dyn Anonymizer>,
    destinations: Vec<Arc<ExportDestination>>,
    /// Staging pool for anonymized payloads; destination queues hold only
    /// pointer files into this pool.
    pool_dir: PathBuf,
    quarantine: Quarantine,
    /// Send the manifest before its instances, or after them. One flag,
    /// applied uniformly; references are never interleaved arbitrarily.
    manifest_first: bool,
    poll_interval: Duration,
    events: EventBus,
}

impl ObjectProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        anonymizer: Arc<dyn Anonymizer>,
        destinations: Vec<Arc<ExportDestination>>,
        pool_dir: PathBuf,
        quarantine: Quarantine,
        manifest_first: bool,
        poll_interval: Duration,
        events: EventBus,
    ) -> Result<Self> {
        fs::create_dir_all(&pool_dir).map_err(|e| {
            StationError::config(format!("cannot create pool dir {}: {}", pool_dir.display(), e))
        })?;
        Ok(Self {
            store,
            anonymizer,
            destinations,
            pool_dir,
            quarantine,
            manifest_first,
            poll_interval,
            events,
        })
    }

    /// Worker loop: drain the queue, then sleep, until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("ObjectProcessor started");
        self.events.emit(SERVICE, "ObjectProcessor started");
        loop {
            self.process_queued().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }
        info!("ObjectProcessor stopped");
    }

    /// One pass over the queued manifests, oldest first. A failure on one
    /// manifest quarantines that manifest and moves on to the next.
    pub async fn process_queued(&self) {
        for path in self.store.queued_manifests() {
            if !path.exists() {
                continue;
            }
            if let Err(e) = self.process_manifest(&path).await {
                warn!("Error during processing of {}: {}", path.display(), e);
                self.quarantine_manifest(&path, &e.to_string());
            }
            // If the manifest survived processing, something is stuck on it;
            // quarantine it rather than loop on a poison message forever.
            if path.exists() {
                warn!("Forced quarantine: {}", path.display());
                self.quarantine_manifest(&path, "file still present after processing");
            }
            tokio::task::yield_now().await;
        }
    }

    async fn process_manifest(&self, path: &Path) -> Result<()> {
        let doc = match self.store.classifier().classify(path)? {
            ClassifiedObject::Manifest(doc) => doc,
            _ => {
                return Err(StationError::classify(format!(
                    "queued file is not a manifest: {}",
                    path.display()
                )))
            }
        };

        if self.manifest_first {
            if let FileVerdict::Abort(reason) = self.process_file(path).await? {
                self.quarantine_manifest(path, &reason);
                return Ok(());
            }
        }
        for id in &doc.instances {
            let instance = self.store.instance_file(id);
            if let FileVerdict::Abort(reason) = self.process_file(&instance).await? {
                self.quarantine_manifest(path, &reason);
                return Ok(());
            }
        }
        if !self.manifest_first {
            if let FileVerdict::Abort(reason) = self.process_file(path).await? {
                self.quarantine_manifest(path, &reason);
                return Ok(());
            }
        }

        // Everything is enqueued for every destination; only now may the
        // manifest leave the store.
        fs::remove_file(path)?;
        info!("Processing complete: {}", doc.id);
        self.events
            .emit(SERVICE, format!("Processing complete: {}", doc.id));
        Ok(())
    }

    // Anonymize one file into the pool and fan it out to every destination.
    async fn process_file(&self, file: &Path) -> Result<FileVerdict> {
        let pool_file = self.pool_file_for(file);
        let outcome = self.anonymizer.anonymize(file, &pool_file).await;

        match outcome {
            Ok(AnonymizerOutcome::Clean) => {}
            Ok(AnonymizerOutcome::Warnings(warnings)) => {
                for warning in &warnings {
                    warn!("Anonymization exception for {}: {}", file.display(), warning);
                }
                self.events.emit(
                    SERVICE,
                    format!("Anonymization exceptions: {}", file.display()),
                );
            }
            Ok(AnonymizerOutcome::Quarantine) => {
                let _ = fs::remove_file(&pool_file);
                return Ok(FileVerdict::Abort(format!(
                    "anonymizer quarantine call for {}",
                    file.display()
                )));
            }
            Ok(AnonymizerOutcome::Error(reason)) => {
                let _ = fs::remove_file(&pool_file);
                return Ok(FileVerdict::Abort(format!(
                    "anonymizer error for {}: {}",
                    file.display(),
                    reason
                )));
            }
            Err(e) => {
                let _ = fs::remove_file(&pool_file);
                return Err(e);
            }
        }

        for destination in &self.destinations {
            match QueueElement::create(&pool_file)
                .and_then(|element| element.enqueue(destination.queue_dir()))
            {
                Ok(_) => {}
                Err(e) => {
                    // One destination's queue failing does not stop the
                    // others; the miss is logged for the operator.
                    warn!(
                        "{} export failed for {}: {}",
                        destination.name(),
                        file.display(),
                        e
                    );
                    self.events.emit(
                        SERVICE,
                        format!("{} export failed: {}", destination.name(), file.display()),
                    );
                }
            }
        }
        Ok(FileVerdict::Continue)
    }

    fn pool_file_for(&self, file: &Path) -> PathBuf {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "object".to_string());
        self.pool_dir.join(format!("an-{}-{}", Uuid::new_v4(), name))
    }

    fn quarantine_manifest(&self, path: &Path, reason: &str) {
        warn!("Manifest quarantined: {}: {}", path.display(), reason);
        match self.quarantine.intake(path) {
            Ok(_) => self.events.emit(
                SERVICE,
                format!("Manifest quarantined: {}", path.display()),
            ),
            Err(e) => warn!("Quarantine failed for {}: {}", path.display(), e),
        }
    }
}
