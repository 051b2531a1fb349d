//! Verification Worker Pool: classifies each dequeued file against the
//! catalog and either terminates it or hands it off for upload
//! (spec.md §4.E).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::cancel::CancelToken;
use crate::catalog::{CatalogClient, CatalogError};
use crate::events::{ConnectionState, EventBus, PipelineEvent, Severity};
use crate::model::{DatasetRef, FileRecord, ItemStatus, LocalFile};
use crate::progress::StatusBus;

use super::TransferMode;
use super::coordinator::Tracker;
use super::uploader::UploadTask;

/// One local file submitted for verification against the catalog
/// (spec.md §3, `VerificationTask`).
#[derive(Debug, Clone)]
pub struct VerificationTask {
    pub local_file: LocalFile,
    pub dataset: DatasetRef,
    /// Dry-run hook: suppresses `requestVerify` (spec.md §6, SPEC_FULL.md §3).
    pub test_run: bool,
}

pub(crate) type VerificationRx = Arc<Mutex<mpsc::UnboundedReceiver<Option<VerificationTask>>>>;
pub(crate) type UploadTx = mpsc::UnboundedSender<Option<UploadTask>>;

pub(crate) struct VerifierPool;

impl VerifierPool {
    /// Spawns `count` verifier workers sharing `rx` (spec.md §4.E: "Workers
    /// share a FIFO verification queue").
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        count: usize,
        catalog: CatalogClient,
        status: Arc<StatusBus>,
        events: EventBus,
        cancel: CancelToken,
        mode: TransferMode,
        rx: VerificationRx,
        upload_tx: UploadTx,
        replica_endpoint_missing: Arc<AtomicBool>,
        tracker: Arc<Tracker>,
        fake_digest: Option<String>,
    ) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|_| {
                let catalog = catalog.clone();
                let status = Arc::clone(&status);
                let events = events.clone();
                let cancel = cancel.clone();
                let rx = Arc::clone(&rx);
                let upload_tx = upload_tx.clone();
                let replica_endpoint_missing = Arc::clone(&replica_endpoint_missing);
                let tracker = Arc::clone(&tracker);
                let fake_digest = fake_digest.clone();
                tokio::spawn(async move {
                    run_worker(
                        catalog,
                        status,
                        events,
                        cancel,
                        mode,
                        rx,
                        upload_tx,
                        replica_endpoint_missing,
                        tracker,
                        fake_digest,
                    )
                    .await;
                })
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    catalog: CatalogClient,
    status: Arc<StatusBus>,
    events: EventBus,
    cancel: CancelToken,
    mode: TransferMode,
    rx: VerificationRx,
    upload_tx: UploadTx,
    replica_endpoint_missing: Arc<AtomicBool>,
    tracker: Arc<Tracker>,
    fake_digest: Option<String>,
) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        match task {
            None => break,
            Some(None) => break,
            Some(Some(task)) => {
                let handed_off = process_task(
                    &task,
                    &catalog,
                    &status,
                    &events,
                    &cancel,
                    mode,
                    &upload_tx,
                    &replica_endpoint_missing,
                    fake_digest.as_deref(),
                )
                .await;
                if !handed_off {
                    tracker.complete_one();
                }
            }
        }
    }
}

/// Runs the §4.E state machine for one task. Returns `true` if the task
/// was handed off to the upload queue (the tracker's outstanding count
/// should not be decremented in that case, since the file's lifecycle
/// continues under an uploader).
#[instrument(skip(task, catalog, status, events, cancel, upload_tx, replica_endpoint_missing, fake_digest), fields(file_id = %task.local_file.id))]
#[allow(clippy::too_many_arguments)]
async fn process_task(
    task: &VerificationTask,
    catalog: &CatalogClient,
    status: &StatusBus,
    events: &EventBus,
    cancel: &CancelToken,
    mode: TransferMode,
    upload_tx: &UploadTx,
    replica_endpoint_missing: &Arc<AtomicBool>,
    fake_digest: Option<&str>,
) -> bool {
    let file_id = task.local_file.id;
    let size = task.local_file.size;
    status.begin_verification(file_id, size);

    if cancel.is_canceled() {
        status.set_status(file_id, ItemStatus::Canceled, "canceled");
        return false;
    }

    let directory = &task.local_file.relative_directory;
    let filename = task.local_file.filename();

    match catalog.find(&task.dataset.uri, directory, filename).await {
        Err(CatalogError::NotFound { .. }) => {
            status.set_status(file_id, ItemStatus::NotFound, "no server record");
            send_upload(upload_tx, task, None, None, status, cancel)
        }
        Err(CatalogError::MultipleRecords { count, .. }) => {
            status.mark_duplicate_failed(
                file_id,
                format!("{count} duplicate records found on server"),
            );
            false
        }
        Err(err) => {
            if err.is_connection_flap() {
                events.publish(PipelineEvent::ConnectionStatus {
                    url: task.dataset.uri.clone(),
                    state: ConnectionState::Disconnected,
                });
            }
            status.set_status(file_id, ItemStatus::Failed, err.to_string());
            false
        }
        Ok(record) => {
            classify_record(
                task,
                &record,
                catalog,
                status,
                events,
                cancel,
                mode,
                upload_tx,
                replica_endpoint_missing,
                fake_digest,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn classify_record(
    task: &VerificationTask,
    record: &FileRecord,
    catalog: &CatalogClient,
    status: &StatusBus,
    events: &EventBus,
    cancel: &CancelToken,
    mode: TransferMode,
    upload_tx: &UploadTx,
    replica_endpoint_missing: &Arc<AtomicBool>,
    fake_digest: Option<&str>,
) -> bool {
    let file_id = task.local_file.id;

    if record.has_verified_replica() {
        status.set_status(file_id, ItemStatus::FoundVerified, "verified on server");
        return false;
    }

    match mode {
        TransferMode::Post => {
            status.set_status(
                file_id,
                ItemStatus::FoundUnverifiedFullSize,
                "unverified, requesting server check",
            );
            request_verify(catalog, record, task, task.test_run, fake_digest).await;
            false
        }
        TransferMode::Staging => {
            let Some(replica) = record.primary_replica() else {
                status.set_status(
                    file_id,
                    ItemStatus::FoundUnverifiedNoReplica,
                    "no replica on server",
                );
                request_verify(catalog, record, task, task.test_run, fake_digest).await;
                return false;
            };

            if replica_endpoint_missing.load(Ordering::SeqCst) {
                status.set_status(
                    file_id,
                    ItemStatus::FoundUnverifiedFullSize,
                    "treating as full size: replica endpoint unavailable this run",
                );
                request_verify(catalog, record, task, task.test_run, fake_digest).await;
                return false;
            }

            match catalog.bytes_on_staging(replica.id).await {
                Ok(bytes) if bytes >= record.size => {
                    status.set_status(
                        file_id,
                        ItemStatus::FoundUnverifiedFullSize,
                        "full size on staging, requesting server check",
                    );
                    request_verify(catalog, record, task, task.test_run, fake_digest).await;
                    false
                }
                Ok(bytes) => {
                    status.set_status(
                        file_id,
                        ItemStatus::FoundUnverifiedPartial,
                        format!("{bytes} of {} bytes on staging, resuming", record.size),
                    );
                    send_upload(
                        upload_tx,
                        task,
                        Some(record.clone()),
                        Some(bytes),
                        status,
                        cancel,
                    )
                }
                Err(CatalogError::MissingReplicaEndpoint) => {
                    if !replica_endpoint_missing.swap(true, Ordering::SeqCst) {
                        events.publish(PipelineEvent::ShowMessage {
                            title: "Staging replica status unavailable".into(),
                            message:
                                "Server does not advertise bytes-on-staging; treating unverified \
                                 replicas as unresumable for the rest of this run."
                                    .into(),
                            severity: Severity::Warning,
                        });
                    }
                    status.set_status(
                        file_id,
                        ItemStatus::FoundUnverifiedFullSize,
                        "treating as full size: replica endpoint unavailable",
                    );
                    request_verify(catalog, record, task, task.test_run, fake_digest).await;
                    false
                }
                Err(err) => {
                    status.set_status(file_id, ItemStatus::Failed, err.to_string());
                    false
                }
            }
        }
    }
}

/// Requests server-side replica verification for an existing, unverified
/// record. Suppressed entirely under `testRun` (spec.md §6).
///
/// Mirrors `VerificationModel.HandleFullSizeResumableUpload`/
/// `HandleUnresumableUpload` in the original source: when the existing
/// record's `md5sum` already equals the configured fake-digest sentinel
/// (a load-test fixture, not a real hash), the original logs a warning
/// and skips the `Verify()` call rather than asking the server to check a
/// digest it knows is fabricated. A failure from the real `requestVerify`
/// call is logged but does not fail the task: the file is already in a
/// correct terminal-ish state for this run.
async fn request_verify(
    catalog: &CatalogClient,
    record: &FileRecord,
    task: &VerificationTask,
    test_run: bool,
    fake_digest: Option<&str>,
) {
    if test_run {
        return;
    }
    if fake_digest.is_some_and(|fake| fake == record.md5sum) {
        warn!(
            path = %task.local_file.path.display(),
            md5sum = %record.md5sum,
            "server record carries the fake-digest sentinel, skipping requestVerify"
        );
        return;
    }
    if let Err(err) = catalog.request_verify(record.id).await {
        warn!(record_id = record.id, error = %err, "requestVerify failed");
    }
}

/// Hands a file off to the upload queue, unless the run was canceled while
/// this verification was in flight.
///
/// A verifier that started before `cancel()` was called can still reach
/// this point after the uploader pool has already drained its shutdown
/// sentinels (spec.md §4.G); enqueueing anyway would leave the task
/// unconsumed forever and `await_quiescence` would never return. Re-check
/// here, at the single point every classification branch funnels through,
/// rather than threading a check into each branch above (spec.md §3
/// invariant 6: "no new tasks begin" once canceled).
fn send_upload(
    upload_tx: &UploadTx,
    task: &VerificationTask,
    existing_record: Option<FileRecord>,
    bytes_already_on_staging: Option<u64>,
    status: &StatusBus,
    cancel: &CancelToken,
) -> bool {
    if cancel.is_canceled() {
        status.set_status(task.local_file.id, ItemStatus::Canceled, "canceled");
        return false;
    }
    let upload_task = UploadTask {
        local_file: task.local_file.clone(),
        dataset: task.dataset.clone(),
        existing_record,
        bytes_already_on_staging,
    };
    let _ = upload_tx.send(Some(upload_task));
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use wiremock::matchers::{method, path as wiremock_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::credentials::Credentials;
    use crate::model::LocalFileId;

    fn creds() -> Credentials {
        Credentials {
            username: "alice".into(),
            api_key: "key".into(),
            staging_host: "staging.example.org".into(),
            staging_username: "mydata".into(),
            private_key_path: "/dev/null".into(),
        }
    }

    fn local_file(size: u64) -> LocalFile {
        LocalFile {
            id: LocalFileId {
                folder_id: 0,
                file_index: 0,
            },
            path: PathBuf::from("/data/a.txt"),
            size,
            created_time: SystemTime::now(),
            relative_directory: String::new(),
        }
    }

    fn task(size: u64) -> VerificationTask {
        VerificationTask {
            local_file: local_file(size),
            dataset: DatasetRef {
                id: 1,
                uri: "dataset/1".into(),
            },
            test_run: true,
        }
    }

    #[tokio::test]
    async fn not_found_enqueues_upload_and_marks_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"total_count": 0},
                "objects": []
            })))
            .mount(&server)
            .await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let cancel = CancelToken::new();
        let (upload_tx, mut upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let t = task(10);
        let handed_off = process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            None,
        )
        .await;

        assert!(handed_off);
        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::NotFound
        );
        let enqueued = upload_rx.recv().await.unwrap().unwrap();
        assert!(enqueued.existing_record.is_none());
    }

    #[tokio::test]
    async fn multiple_records_marks_duplicate_failed() {
        let server = MockServer::start().await;
        let record = json!({
            "id": 1, "filename": "a.txt", "directory": "", "size": 10,
            "md5sum": "abc", "replicas": []
        });
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"total_count": 2},
                "objects": [record.clone(), record]
            })))
            .mount(&server)
            .await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let cancel = CancelToken::new();
        let (upload_tx, _upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let t = task(10);
        let handed_off = process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            None,
        )
        .await;

        assert!(!handed_off);
        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::Failed
        );
        assert_eq!(status.duplicate_count(), 1);
    }

    #[tokio::test]
    async fn verified_replica_is_terminal_with_no_upload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"total_count": 1},
                "objects": [{
                    "id": 1, "filename": "a.txt", "directory": "", "size": 10,
                    "md5sum": "abc",
                    "replicas": [{"id": 9, "uri": "staging://9", "verified": true}]
                }]
            })))
            .mount(&server)
            .await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let cancel = CancelToken::new();
        let (upload_tx, mut upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let t = task(10);
        let handed_off = process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            None,
        )
        .await;

        assert!(!handed_off);
        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::FoundVerified
        );
        assert!(upload_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn partial_staging_bytes_enqueues_resumable_upload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"total_count": 1},
                "objects": [{
                    "id": 1, "filename": "a.txt", "directory": "", "size": 10,
                    "md5sum": "abc",
                    "replicas": [{"id": 9, "uri": "staging://9", "verified": false}]
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/mydata_replica/9/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(CatalogClient::bytes_uploaded_body(4)),
            )
            .mount(&server)
            .await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let cancel = CancelToken::new();
        let (upload_tx, mut upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let t = task(10);
        let handed_off = process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            None,
        )
        .await;

        assert!(handed_off);
        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::FoundUnverifiedPartial
        );
        let enqueued = upload_rx.recv().await.unwrap().unwrap();
        assert_eq!(enqueued.bytes_already_on_staging, Some(4));
    }

    #[tokio::test]
    async fn fake_digest_sentinel_on_existing_record_skips_request_verify() {
        // Mirrors the original's HandleFullSizeResumableUpload: when the
        // existing record's md5sum already equals the configured
        // fake-digest sentinel, requestVerify must not be called at all.
        // No POST /verify/ mock is mounted, so a stray call would fail
        // against the mock server's unmatched-request behavior.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"total_count": 1},
                "objects": [{
                    "id": 1, "filename": "a.txt", "directory": "", "size": 10,
                    "md5sum": "fakemd5",
                    "replicas": [{"id": 9, "uri": "staging://9", "verified": false}]
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/mydata_replica/9/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(CatalogClient::bytes_uploaded_body(10)),
            )
            .mount(&server)
            .await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let cancel = CancelToken::new();
        let (upload_tx, _upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let mut t = task(10);
        t.test_run = false;
        let handed_off = process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            Some("fakemd5"),
        )
        .await;

        assert!(!handed_off);
        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::FoundUnverifiedFullSize
        );
    }

    #[tokio::test]
    async fn missing_replica_endpoint_degrades_once_and_shows_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "meta": {"total_count": 1},
                "objects": [{
                    "id": 1, "filename": "a.txt", "directory": "", "size": 10,
                    "md5sum": "abc",
                    "replicas": [{"id": 9, "uri": "staging://9", "verified": false}]
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/mydata_replica/9/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let cancel = CancelToken::new();
        let (upload_tx, _upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let t = task(10);
        process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            None,
        )
        .await;

        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::FoundUnverifiedFullSize
        );
        assert!(replica_endpoint_missing.load(Ordering::SeqCst));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PipelineEvent::ShowMessage { .. }
        ));
    }

    #[tokio::test]
    async fn already_canceled_task_is_canceled_without_network_call() {
        let server = MockServer::start().await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let (upload_tx, _upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let t = task(10);
        let handed_off = process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            None,
        )
        .await;

        assert!(!handed_off);
        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::Canceled
        );
    }

    #[tokio::test]
    async fn cancel_during_in_flight_find_suppresses_late_hand_off() {
        // A verifier that started before cancel() must not enqueue an
        // UploadTask after the run is canceled while its `find` call was
        // still in flight: by the time it would hand off, the uploader
        // pool may have already drained its shutdown sentinels, and an
        // upload task sent afterward would sit unconsumed forever.
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock_path("/api/v1/dataset_file/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "meta": {"total_count": 0},
                        "objects": []
                    }))
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .mount(&server)
            .await;

        let catalog = CatalogClient::new(server.uri(), creds());
        let status = StatusBus::new(EventBus::new());
        let events = EventBus::new();
        let cancel = CancelToken::new();
        let (upload_tx, mut upload_rx) = mpsc::unbounded_channel();
        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));

        let t = task(10);
        let cancel_for_task = cancel.clone();
        let canceler = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cancel_for_task.cancel();
        });

        let handed_off = process_task(
            &t,
            &catalog,
            &status,
            &events,
            &cancel,
            TransferMode::Staging,
            &upload_tx,
            &replica_endpoint_missing,
            None,
        )
        .await;
        canceler.await.unwrap();

        assert!(!handed_off);
        assert!(upload_rx.try_recv().is_err());
        assert_eq!(
            status.snapshot(t.local_file.id).unwrap().status,
            ItemStatus::Canceled
        );
    }
}
