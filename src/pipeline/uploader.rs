//! Upload Worker Pool: computes the digest and transfers bytes for files
//! that need it (spec.md §4.F).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::cancel::CancelToken;
use crate::catalog::CatalogClient;
use crate::digest::{self, DigestOutcome};
use crate::events::{EventBus, PipelineEvent, RunOutcome, Severity};
use crate::mime::MimeResolver;
use crate::model::{DatasetRef, FileRecord, ItemStatus, LocalFile, NewFileRecord};
use crate::progress::StatusBus;
use crate::transport::{PostTransport, StagingTransport, TransferOutcome};

use super::TransferMode;
use super::coordinator::Tracker;

/// One file handed off by a verifier for transfer (spec.md §3, `UploadTask`).
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub local_file: LocalFile,
    pub dataset: DatasetRef,
    pub existing_record: Option<FileRecord>,
    pub bytes_already_on_staging: Option<u64>,
}

pub(crate) type UploadRx = Arc<Mutex<mpsc::UnboundedReceiver<Option<UploadTask>>>>;

enum UploadResult {
    Completed,
    Canceled,
    Failed(String),
    /// Pipeline-fatal: the caller must also cancel the whole run
    /// (spec.md §7, `MISSING_STAGING_STORAGE`).
    Fatal(String),
}

pub(crate) struct UploaderPool;

impl UploaderPool {
    /// Spawns `count` uploader workers sharing `rx`. `count` is already
    /// clamped by [`TransferMode::clamp_upload_workers`] before this is
    /// called (spec.md §4.F: "forced to 1 under POST").
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        count: usize,
        catalog: CatalogClient,
        staging: Arc<StagingTransport>,
        post: Arc<PostTransport>,
        mode: TransferMode,
        status: Arc<StatusBus>,
        events: EventBus,
        cancel: CancelToken,
        rx: UploadRx,
        tracker: Arc<Tracker>,
    ) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|_| {
                let catalog = catalog.clone();
                let staging = Arc::clone(&staging);
                let post = Arc::clone(&post);
                let status = Arc::clone(&status);
                let events = events.clone();
                let cancel = cancel.clone();
                let rx = Arc::clone(&rx);
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    run_worker(catalog, staging, post, mode, status, events, cancel, rx, tracker)
                        .await;
                })
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    catalog: CatalogClient,
    staging: Arc<StagingTransport>,
    post: Arc<PostTransport>,
    mode: TransferMode,
    status: Arc<StatusBus>,
    events: EventBus,
    cancel: CancelToken,
    rx: UploadRx,
    tracker: Arc<Tracker>,
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
                process_task(&task, &catalog, &staging, &post, mode, &status, &events, &cancel)
                    .await;
                tracker.complete_one();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip(task, catalog, staging, post, status, events, cancel), fields(file_id = %task.local_file.id))]
async fn process_task(
    task: &UploadTask,
    catalog: &CatalogClient,
    staging: &StagingTransport,
    post: &PostTransport,
    mode: TransferMode,
    status: &StatusBus,
    events: &EventBus,
    cancel: &CancelToken,
) {
    let file_id = task.local_file.id;
    let size = task.local_file.size;

    if cancel.is_canceled() {
        status.set_status(file_id, ItemStatus::Canceled, "canceled");
        return;
    }

    status.set_status(file_id, ItemStatus::Uploading, "computing digest");
    status.reset_progress(file_id);

    let digest_hex = match compute_digest(task, status, cancel).await {
        Some(hex) => hex,
        None => {
            status.set_status(file_id, ItemStatus::Canceled, "canceled during digest");
            return;
        }
    };

    if size == 0 {
        status.set_status(file_id, ItemStatus::Failed, "server rejects empty file");
        return;
    }

    // Phase boundary: progress restarts at 0 for the transfer phase
    // (spec.md §3 invariant 5).
    status.reset_progress(file_id);

    let mimetype = MimeResolver::new().guess(&task.local_file.path);
    let metadata = NewFileRecord {
        dataset: task.dataset.uri.clone(),
        filename: task.local_file.filename().to_string(),
        directory: task.local_file.relative_directory.clone(),
        md5sum: digest_hex,
        size,
        mimetype,
        created_time: format_created_time(task.local_file.created_time),
    };

    let result = match mode {
        TransferMode::Post => upload_via_post(post, &metadata, task, status, cancel).await,
        TransferMode::Staging => {
            upload_via_staging(catalog, staging, &metadata, task, status, cancel).await
        }
    };

    match result {
        UploadResult::Completed => {
            status.set_status(file_id, ItemStatus::Completed, "Upload complete!");
        }
        UploadResult::Canceled => {
            status.set_status(file_id, ItemStatus::Canceled, "canceled");
        }
        UploadResult::Failed(message) => {
            status.set_status(file_id, ItemStatus::Failed, message);
        }
        UploadResult::Fatal(message) => {
            status.set_status(file_id, ItemStatus::Failed, message.clone());
            events.publish(PipelineEvent::ShowMessage {
                title: "Upload cannot continue".into(),
                message,
                severity: Severity::Error,
            });
            cancel.cancel();
            status.cancel_remaining();
            events.publish(PipelineEvent::UploadsComplete(RunOutcome::Failed));
        }
    }
}

/// Computes the content digest of the file being uploaded.
/// Returns `None` on cancellation.
async fn compute_digest(
    task: &UploadTask,
    status: &StatusBus,
    cancel: &CancelToken,
) -> Option<String> {
    let file_id = task.local_file.id;
    let size = task.local_file.size;
    let outcome = digest::digest(&task.local_file.path, size, cancel, |bytes_read| {
        status.set_digest_progress(file_id, bytes_read, size);
    })
    .await;

    match outcome {
        Ok(DigestOutcome::Hex(hex)) => Some(hex),
        Ok(DigestOutcome::Canceled) => None,
        Err(err) => {
            status.set_status(file_id, ItemStatus::Failed, err.to_string());
            None
        }
    }
}

async fn upload_via_post(
    post: &PostTransport,
    metadata: &NewFileRecord,
    task: &UploadTask,
    status: &StatusBus,
    cancel: &CancelToken,
) -> UploadResult {
    let file_id = task.local_file.id;
    let size = task.local_file.size;
    match post
        .create_and_upload(metadata, &task.local_file.path, cancel, |bytes_sent| {
            status.set_transfer_progress(file_id, bytes_sent, size);
        })
        .await
    {
        Ok((_, TransferOutcome::Completed)) => UploadResult::Completed,
        Ok((_, TransferOutcome::Canceled)) => UploadResult::Canceled,
        Err(err @ crate::transport::TransportError::MissingStagingStorage { .. }) => {
            UploadResult::Fatal(err.to_string())
        }
        Err(err) => UploadResult::Failed(err.to_string()),
    }
}

async fn upload_via_staging(
    catalog: &CatalogClient,
    staging: &StagingTransport,
    metadata: &NewFileRecord,
    task: &UploadTask,
    status: &StatusBus,
    cancel: &CancelToken,
) -> UploadResult {
    let file_id = task.local_file.id;
    let size = task.local_file.size;

    let replica_uri = match &task.existing_record {
        Some(record) => match record.primary_replica() {
            Some(replica) => replica.uri.clone(),
            None => return UploadResult::Failed("existing record has no replica".to_string()),
        },
        None => match catalog.create(metadata).await {
            Ok(record) => match record.primary_replica() {
                Some(replica) => replica.uri.clone(),
                None => {
                    return UploadResult::Failed(
                        "server created record without a replica".to_string(),
                    );
                }
            },
            Err(err) if matches!(err, crate::catalog::CatalogError::MissingStagingStorage { .. }) => {
                return UploadResult::Fatal(err.to_string());
            }
            Err(err) => return UploadResult::Failed(err.to_string()),
        },
    };

    match staging
        .upload_file(
            &task.local_file.path,
            size,
            &replica_uri,
            cancel,
            |bytes_sent| status.set_transfer_progress(file_id, bytes_sent, size),
        )
        .await
    {
        Ok(TransferOutcome::Completed) => UploadResult::Completed,
        Ok(TransferOutcome::Canceled) => UploadResult::Canceled,
        Err(err) => UploadResult::Failed(err.to_string()),
    }
}

/// Formats a filesystem creation time as RFC 3339 for upload metadata
/// (spec.md §6, `created_time`). Falls back to the Unix epoch if the
/// filesystem reports a time before it.
fn format_created_time(created: std::time::SystemTime) -> String {
    let datetime: DateTime<Utc> = created.into();
    datetime.to_rfc3339()
}
