use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use waystation::events::EventBus;
use waystation::export::{ExportDestination, ExportService};
use waystation::queue::QueueElement;
use waystation::transport::{Address, SendOutcome, Transport};

/// Replays a fixed script of outcomes and records every payload offered.
struct ScriptedTransport {
    script: Mutex<VecDeque<SendOutcome>>,
    sent: Mutex<Vec<PathBuf>>,
}

impl ScriptedTransport {
    fn new(script: Vec<SendOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<PathBuf> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, payload: &Path) -> SendOutcome {
        self.sent.lock().unwrap().push(payload.to_path_buf());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SendOutcome::Ok)
    }
}

fn destination(tmp: &TempDir, archive: bool) -> Arc<ExportDestination> {
    let archive_dir = archive.then(|| tmp.path().join("archive"));
    Arc::new(
        ExportDestination::open(
            &tmp.path().join("export"),
            "pacs",
            Address::parse("https://pacs.example.org/upload").unwrap(),
            archive_dir,
        )
        .expect("Failed to open destination"),
    )
}

fn enqueue_payload(tmp: &TempDir, dest: &ExportDestination, name: &str) -> PathBuf {
    let payload = tmp.path().join("pool").join(name);
    fs::create_dir_all(payload.parent().unwrap()).unwrap();
    fs::write(&payload, name).unwrap();
    QueueElement::create(&payload)
        .expect("Failed to create queue element")
        .enqueue(dest.queue_dir())
        .expect("Failed to enqueue");
    payload
}

fn service(dest: Arc<ExportDestination>, transport: Arc<ScriptedTransport>) -> ExportService {
    ExportService::new(dest, transport, EventBus::new(), Duration::from_secs(1))
}

#[tokio::test]
async fn test_successful_send_deletes_element_and_keeps_payload() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, false);
    let payload = enqueue_payload(&tmp, &dest, "obj-1");

    let transport = ScriptedTransport::new(vec![SendOutcome::Ok]);
    service(dest.clone(), transport.clone()).process_queue().await;

    assert_eq!(transport.sent(), vec![payload.clone()]);
    assert_eq!(dest.queue_depth(), 0);
    // Pointer indirection: another destination may still need the payload.
    assert!(payload.exists());
}

#[tokio::test]
async fn test_successful_send_archives_payload_copy() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, true);
    enqueue_payload(&tmp, &dest, "obj-1");

    let transport = ScriptedTransport::new(vec![SendOutcome::Ok]);
    service(dest.clone(), transport).process_queue().await;

    let archived = tmp.path().join("archive").join("obj-1");
    assert!(archived.exists());
    assert_eq!(fs::read_to_string(archived).unwrap(), "obj-1");
}

#[tokio::test]
async fn test_connection_failure_blocks_whole_queue() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, false);
    enqueue_payload(&tmp, &dest, "e1");
    std::thread::sleep(Duration::from_millis(20));
    enqueue_payload(&tmp, &dest, "e2");

    let transport = ScriptedTransport::new(vec![SendOutcome::ConnectionFailure(
        "connection refused".into(),
    )]);
    let svc = service(dest.clone(), transport.clone());

    svc.process_queue().await;
    assert_eq!(transport.sent().len(), 1, "e2 must wait behind e1");
    assert_eq!(dest.queue_depth(), 2, "nothing was consumed");

    // Still within the backoff window: the whole pass is skipped, e2
    // included.
    svc.process_queue().await;
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_resource_unavailable_retries_same_element() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, false);
    let payload = enqueue_payload(&tmp, &dest, "obj-1");

    let transport = ScriptedTransport::new(vec![SendOutcome::ResourceUnavailable, SendOutcome::Ok]);
    let svc = service(dest.clone(), transport.clone());

    svc.process_queue().await;
    assert_eq!(dest.queue_depth(), 1, "element stays queued during backoff");

    // Simulate the short backoff having elapsed.
    dest.backoff().hold_for(Duration::ZERO);
    svc.process_queue().await;

    assert_eq!(transport.sent(), vec![payload.clone(), payload]);
    assert_eq!(dest.queue_depth(), 0);
}

#[tokio::test]
async fn test_duplicate_object_is_dropped_not_quarantined() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, false);
    enqueue_payload(&tmp, &dest, "obj-1");

    let transport = ScriptedTransport::new(vec![SendOutcome::DuplicateObject]);
    service(dest.clone(), transport).process_queue().await;

    assert_eq!(dest.queue_depth(), 0);
    assert_eq!(dest.quarantine().file_count(), 0);
}

#[tokio::test]
async fn test_permanent_failure_quarantines_element() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, false);
    enqueue_payload(&tmp, &dest, "bad-obj");
    std::thread::sleep(Duration::from_millis(20));
    let good = enqueue_payload(&tmp, &dest, "good-obj");

    let transport = ScriptedTransport::new(vec![
        SendOutcome::OtherFailure("Server: unprocessable".into()),
        SendOutcome::Ok,
    ]);
    service(dest.clone(), transport.clone()).process_queue().await;

    // The bad element is out of the way and the rest of the queue drained.
    assert_eq!(dest.queue_depth(), 0);
    assert_eq!(dest.quarantine().file_count(), 1);
    assert_eq!(transport.sent().last().unwrap(), &good);
}

#[tokio::test]
async fn test_unresolvable_element_goes_to_quarantine_without_send() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, false);
    let payload = enqueue_payload(&tmp, &dest, "obj-1");
    fs::remove_file(&payload).unwrap();

    let transport = ScriptedTransport::new(vec![]);
    service(dest.clone(), transport.clone()).process_queue().await;

    assert!(transport.sent().is_empty(), "nothing sendable existed");
    assert_eq!(dest.queue_depth(), 0);
    assert_eq!(dest.quarantine().file_count(), 1);
}

#[tokio::test]
async fn test_fifo_across_passes() {
    let tmp = TempDir::new().unwrap();
    let dest = destination(&tmp, false);
    let first = enqueue_payload(&tmp, &dest, "first");
    std::thread::sleep(Duration::from_millis(20));
    let second = enqueue_payload(&tmp, &dest, "second");

    let transport = ScriptedTransport::new(vec![SendOutcome::Ok, SendOutcome::Ok]);
    service(dest.clone(), transport.clone()).process_queue().await;

    assert_eq!(transport.sent(), vec![first, second]);
}
