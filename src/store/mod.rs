//! The Store: reconciliation between manifests and the instances they need.
//!
//! The store owns three directories. Inbound manifests wait in `manifests/`
//! until every instance they reference has appeared in `instances/`; a
//! completed manifest is renamed into `queue/`, where the object processor
//! picks it up. Directory entries are the only index — external receivers
//! write into the same tree, so an in-memory mirror would drift.

pub mod gc;

pub use gc::GarbageCollector;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::error::{Result, StationError};
use crate::events::EventBus;
use crate::fsutil::{count_files, list_sorted_files, move_file, snapshot_dir};
use crate::object::{ClassifiedObject, ManifestDoc, ObjectClassifier};

const SERVICE: &str = "Store";

pub const MANIFESTS_DIR: &str = "manifests";
pub const INSTANCES_DIR: &str = "instances";
pub const QUEUE_DIR: &str = "queue";

/// Store for received objects, split into manifests, instances, and the
/// queue of completed manifests.
pub struct Store {
    root: PathBuf,
    manifests: PathBuf,
    instances: PathBuf,
    queue: PathBuf,
    classifier: Arc<dyn ObjectClassifier>,
    events: EventBus,
    /// Minimum number of instances still missing across all incomplete
    /// manifests. Instance arrivals decrement this; a full recheck only runs
    /// once it could plausibly have completed some manifest. A stale value
    /// is harmless — a recheck that queues nothing just recomputes it.
    min_missing: AtomicUsize,
}

impl Store {
    /// Create (or reopen) a store rooted at `root`, creating the three
    /// subdirectories if needed, and reconcile whatever is already on disk.
    pub fn open(
        root: impl Into<PathBuf>,
        classifier: Arc<dyn ObjectClassifier>,
        events: EventBus,
    ) -> Result<Self> {
        let root = root.into();
        let manifests = root.join(MANIFESTS_DIR);
        let instances = root.join(INSTANCES_DIR);
        let queue = root.join(QUEUE_DIR);
        for dir in [&manifests, &instances, &queue] {
            fs::create_dir_all(dir).map_err(|e| {
                StationError::config(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        let store = Self {
            root,
            manifests,
            instances,
            queue,
            classifier,
            events,
            min_missing: AtomicUsize::new(usize::MAX),
        };
        // Files may have survived a restart.
        store.check_manifests();
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File an inbound object.
    ///
    /// Manifests move into `manifests/` under their own ID and trigger a
    /// recheck. Instances move into `instances/` and only trigger a recheck
    /// once the missing-instance watermark has been exhausted. A file that
    /// cannot be classified is left where it is and reported to the caller;
    /// retry or quarantine of malformed input is the receiver's problem.
    pub fn on_object_received(&self, path: &Path) -> Result<()> {
        match self.classifier.classify(path)? {
            ClassifiedObject::Manifest(doc) => {
                info!("Manifest received: {}", doc.id);
                self.events
                    .emit(SERVICE, format!("Manifest received: {}", doc.id));
                move_file(path, &self.manifests.join(&doc.id))?;
                self.check_manifests();
                Ok(())
            }
            ClassifiedObject::Instance { id } => {
                info!("Instance received: {}", id);
                self.events
                    .emit(SERVICE, format!("Instance received: {}", id));
                move_file(path, &self.instances.join(&id))?;
                let prev = self
                    .min_missing
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                        Some(v.saturating_sub(1))
                    })
                    .unwrap_or(usize::MAX);
                if prev.saturating_sub(1) == 0 {
                    self.check_manifests();
                }
                Ok(())
            }
            ClassifiedObject::Unrecognized => Err(StationError::classify(format!(
                "unrecognized object: {}",
                path.display()
            ))),
        }
    }

    /// Reconcile every manifest currently waiting: queue the complete ones
    /// and recompute the missing-instance watermark from the rest. Oldest
    /// manifests are checked first, so manifests completed by the same
    /// arrival enter the queue in receipt order.
    pub fn check_manifests(&self) {
        let mut min = usize::MAX;
        for path in list_sorted_files(&self.manifests) {
            let doc = match self.classifier.classify(&path) {
                Ok(ClassifiedObject::Manifest(doc)) => doc,
                Ok(_) => {
                    debug!("Non-manifest in manifests dir: {}", path.display());
                    continue;
                }
                // Files may vanish mid-scan; that is a benign race.
                Err(e) => {
                    debug!("Skipping manifest {}: {}", path.display(), e);
                    continue;
                }
            };
            let missing = self.count_missing_instances(&doc);
            if missing == 0 {
                if let Err(e) = self.queue_manifest(&path, &doc) {
                    warn!("Failed to queue manifest {}: {}", doc.id, e);
                }
            } else if missing < min {
                min = missing;
            }
        }
        self.min_missing.store(min, Ordering::SeqCst);
    }

    fn count_missing_instances(&self, doc: &ManifestDoc) -> usize {
        doc.instances
            .iter()
            .filter(|id| !self.instances.join(id.as_str()).exists())
            .count()
    }

    // Touch, then rename into the queue; the queue's FIFO order is
    // arrival-into-queue time, not original receipt time.
    fn queue_manifest(&self, path: &Path, doc: &ManifestDoc) -> Result<()> {
        let file = fs::File::options().write(true).open(path)?;
        file.set_modified(SystemTime::now())?;
        drop(file);
        move_file(path, &self.queue.join(&doc.id))?;
        info!("Manifest completed and queued: {}", doc.id);
        self.events
            .emit(SERVICE, format!("Manifest completed and queued: {}", doc.id));
        Ok(())
    }

    /// Queue entries sorted oldest-first by modification time: the order in
    /// which the processor must take them.
    pub fn queued_manifests(&self) -> Vec<PathBuf> {
        list_sorted_files(&self.queue)
    }

    /// Path where an instance with this ID would live. No I/O.
    pub fn instance_file(&self, id: &str) -> PathBuf {
        self.instances.join(id)
    }

    pub fn manifest_count(&self) -> usize {
        count_files(&self.manifests)
    }

    pub fn queued_count(&self) -> usize {
        count_files(&self.queue)
    }

    pub fn instance_count(&self) -> usize {
        count_files(&self.instances)
    }

    /// Operator reset: drop everything in all three directories.
    pub fn delete_all_files(&self) {
        for dir in [&self.manifests, &self.instances, &self.queue] {
            for path in snapshot_dir(dir) {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to delete {}: {}", path.display(), e);
                }
            }
        }
    }

    pub(crate) fn manifests_dir(&self) -> &Path {
        &self.manifests
    }

    pub(crate) fn instances_dir(&self) -> &Path {
        &self.instances
    }

    pub(crate) fn queue_dir(&self) -> &Path {
        &self.queue
    }

    pub(crate) fn classifier(&self) -> &Arc<dyn ObjectClassifier> {
        &self.classifier
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    #[cfg(test)]
    pub(crate) fn min_missing(&self) -> usize {
        self.min_missing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::JsonManifestClassifier;

    fn test_store(root: &Path) -> Store {
        Store::open(
            root,
            Arc::new(JsonManifestClassifier),
            EventBus::default(),
        )
        .unwrap()
    }

    fn drop_manifest(dir: &Path, id: &str, instances: &[&str]) -> PathBuf {
        let path = dir.join(format!("in-{}", id));
        let doc = serde_json::json!({ "id": id, "instances": instances });
        fs::write(&path, doc.to_string()).unwrap();
        path
    }

    fn drop_instance(dir: &Path, id: &str) -> PathBuf {
        let path = dir.join(id);
        fs::write(&path, b"\x00pixels").unwrap();
        path
    }

    #[test]
    fn test_manifest_waits_for_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(&tmp.path().join("store"));

        let m = drop_manifest(tmp.path(), "m1", &["i1", "i2"]);
        store.on_object_received(&m).unwrap();

        assert_eq!(store.manifest_count(), 1);
        assert_eq!(store.queued_count(), 0);
        assert_eq!(store.min_missing(), 2);
    }

    #[test]
    fn test_manifest_queues_when_last_instance_arrives() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(&tmp.path().join("store"));

        let m = drop_manifest(tmp.path(), "m1", &["i1", "i2"]);
        store.on_object_received(&m).unwrap();

        let i1 = drop_instance(tmp.path(), "i1");
        store.on_object_received(&i1).unwrap();
        assert_eq!(store.queued_count(), 0);
        assert_eq!(store.min_missing(), 1);

        let i2 = drop_instance(tmp.path(), "i2");
        store.on_object_received(&i2).unwrap();
        assert_eq!(store.queued_count(), 1);
        assert_eq!(store.manifest_count(), 0);
    }

    #[test]
    fn test_manifest_with_no_references_queues_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(&tmp.path().join("store"));

        let m = drop_manifest(tmp.path(), "m0", &[]);
        store.on_object_received(&m).unwrap();
        assert_eq!(store.queued_count(), 1);
    }

    #[test]
    fn test_reopen_reconciles_existing_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("store");
        {
            let store = test_store(&root);
            let m = drop_manifest(tmp.path(), "m1", &["i1"]);
            store.on_object_received(&m).unwrap();
        }
        // Instance lands while the store is "down".
        fs::write(root.join(INSTANCES_DIR).join("i1"), b"\x00pixels").unwrap();

        let store = test_store(&root);
        assert_eq!(store.queued_count(), 1);
    }

    #[test]
    fn test_queued_manifests_sorted_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(&tmp.path().join("store"));

        for id in ["m1", "m2", "m3"] {
            let m = drop_manifest(tmp.path(), id, &[]);
            store.on_object_received(&m).unwrap();
            // Distinct mtimes.
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let names: Vec<String> = store
            .queued_manifests()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn test_recheck_queues_completed_manifests_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let events = EventBus::new();
        let store = Store::open(
            tmp.path().join("store"),
            Arc::new(JsonManifestClassifier),
            events.clone(),
        )
        .unwrap();

        // Receipt order is the reverse of name order, so a name-ordered or
        // unordered scan would queue these differently.
        let older = drop_manifest(tmp.path(), "zzz", &["shared"]);
        store.on_object_received(&older).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let newer = drop_manifest(tmp.path(), "aaa", &["shared"]);
        store.on_object_received(&newer).unwrap();

        let mut rx = events.subscribe();
        let i = drop_instance(tmp.path(), "shared");
        store.on_object_received(&i).unwrap();

        let mut queued = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Some(id) = event.message.strip_prefix("Manifest completed and queued: ") {
                queued.push(id.to_string());
            }
        }
        assert_eq!(queued, vec!["zzz", "aaa"]);
    }

    #[test]
    fn test_shared_instance_completes_both_manifests() {
        let tmp = tempfile::tempdir().unwrap();
        let store = test_store(&tmp.path().join("store"));

        let m1 = drop_manifest(tmp.path(), "m1", &["shared"]);
        let m2 = drop_manifest(tmp.path(), "m2", &["shared"]);
        store.on_object_received(&m1).unwrap();
        store.on_object_received(&m2).unwrap();

        let i = drop_instance(tmp.path(), "shared");
        store.on_object_received(&i).unwrap();

        assert_eq!(store.queued_count(), 2);
        // The instance is never consumed by queueing.
        assert!(store.instance_file("shared").exists());
    }
}
