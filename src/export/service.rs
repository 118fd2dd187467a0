//! The export service: one worker per destination.
//!
//! Each cycle drains the destination's queue oldest-first, resolving pointer
//! files to payloads and delivering them through the transport. Failures are
//! split three ways: connection-level trouble backs the whole destination
//! off for ten minutes, a busy remote backs it off for five seconds, and
//! everything else condemns the element to the quarantine. A backoff stalls
//! the rest of that destination's queue for the cycle — head-of-line
//! blocking, by design.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::EventBus;
use crate::export::destination::ExportDestination;
use crate::fsutil::list_sorted_files;
use crate::queue::QueueElement;
use crate::transport::{SendOutcome, Transport};

/// How long a destination rests after a connection-level failure.
pub const CONNECTION_BACKOFF: Duration = Duration::from_secs(600);
/// How long a destination rests after a resource-unavailable response.
pub const RESOURCE_BACKOFF: Duration = Duration::from_secs(5);
/// Default poll interval between queue passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct ExportService {
    destination: Arc<ExportDestination>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    poll_interval: Duration,
    service_name: String,
}

impl ExportService {
    pub fn new(
        destination: Arc<ExportDestination>,
        transport: Arc<dyn Transport>,
        events: EventBus,
        poll_interval: Duration,
    ) -> Self {
        let service_name = format!("ExportService[{}]", destination.name());
        Self {
            destination,
            transport,
            events,
            poll_interval,
            service_name,
        }
    }

    pub fn destination(&self) -> &ExportDestination {
        &self.destination
    }

    /// Worker loop: one queue pass, then sleep, until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("{} started", self.service_name);
        self.events.emit(&self.service_name, "Export service started");
        loop {
            self.process_queue().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }
        info!("{} stopped", self.service_name);
    }

    /// One pass over the destination's queue.
    ///
    /// Skipped entirely while the destination's backoff watermark is in the
    /// future: a destination that appears down is not hammered per-element.
    pub async fn process_queue(&self) {
        if !self.destination.backoff().eligible() {
            return;
        }

        for path in list_sorted_files(self.destination.queue_dir()) {
            // Somebody may have cleared the queue under us; try again on
            // the next cycle.
            if !path.exists() {
                return;
            }
            let element = QueueElement::open(&path);
            let payload = match element.resolve() {
                Ok(payload) => payload,
                Err(e) => {
                    // The payload can never be located again: permanent.
                    warn!("{}: unresolvable queue element: {}", self.service_name, e);
                    self.quarantine_element(&path);
                    continue;
                }
            };

            match self.transport.send(&payload).await {
                SendOutcome::Ok => {
                    self.archive_payload(&payload);
                    self.delete_element(&path);
                    info!(
                        "{}: Export successful: {}",
                        self.service_name,
                        payload.display()
                    );
                    self.events.emit(
                        &self.service_name,
                        format!("Export successful: {}", payload.display()),
                    );
                }
                SendOutcome::DuplicateObject => {
                    // The remote already has this object. Not an error, but
                    // worth recording distinctly.
                    self.delete_element(&path);
                    info!(
                        "{}: Destination already has {}; queue element dropped",
                        self.service_name,
                        payload.display()
                    );
                    self.events.emit(
                        &self.service_name,
                        format!("Duplicate at destination: {}", payload.display()),
                    );
                }
                SendOutcome::ResourceUnavailable => {
                    self.destination.backoff().hold_for(RESOURCE_BACKOFF);
                    info!(
                        "{}: Destination resources unavailable; requeued {}",
                        self.service_name,
                        payload.display()
                    );
                    self.events
                        .emit(&self.service_name, "Destination busy; short backoff");
                    return;
                }
                SendOutcome::ConnectionFailure(reason) => {
                    self.destination.backoff().hold_for(CONNECTION_BACKOFF);
                    warn!(
                        "{}: Connection failure ({}); backing off",
                        self.service_name, reason
                    );
                    self.events.emit(
                        &self.service_name,
                        format!("Connection failure: {}", reason),
                    );
                    return;
                }
                SendOutcome::OtherFailure(reason) => {
                    warn!(
                        "{}: Export failure: {}: {}",
                        self.service_name,
                        reason,
                        payload.display()
                    );
                    self.events
                        .emit(&self.service_name, format!("Export failure: {}", reason));
                    self.quarantine_element(&path);
                }
            }
            tokio::task::yield_now().await;
        }
    }

    fn delete_element(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(
                "{}: queue element {} could not be deleted: {}",
                self.service_name,
                path.display(),
                e
            );
        }
    }

    fn quarantine_element(&self, path: &Path) {
        match self.destination.quarantine().intake(path) {
            Ok(entry) => {
                info!(
                    "{}: Object quarantined: {}",
                    self.service_name,
                    entry.display()
                );
                self.events.emit(
                    &self.service_name,
                    format!("Object quarantined: {}", path.display()),
                );
            }
            Err(e) => warn!(
                "{}: Quarantine failed for {}: {}",
                self.service_name,
                path.display(),
                e
            ),
        }
    }

    // Keep a copy of a delivered payload when a transmitted-archive is
    // configured. The payload itself stays in the pool; other destinations
    // may still be pointing at it.
    fn archive_payload(&self, payload: &Path) {
        let Some(archive) = self.destination.archive_dir() else {
            return;
        };
        let result = std::fs::create_dir_all(archive).and_then(|_| {
            let name = payload
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "payload".to_string());
            std::fs::copy(payload, archive.join(name)).map(|_| ())
        });
        if let Err(e) = result {
            warn!(
                "{}: failed to archive {}: {}",
                self.service_name,
                payload.display(),
                e
            );
        }
    }
}
