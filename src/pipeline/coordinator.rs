//! Pipeline Coordinator: owns the queues, spawns and joins the worker
//! pools, negotiates `TransferMode`, and tracks quiescence (spec.md §4.G).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::catalog::CatalogClient;
use crate::credentials::Credentials;
use crate::events::{EventBus, PipelineEvent, RunOutcome, Severity};
use crate::model::{DatasetRef, ItemStatus, LocalFile};
use crate::progress::StatusBus;
use crate::transport::{PostTransport, StagingTransport};

use super::TransferMode;
use super::uploader::{UploadRx, UploadTask, UploaderPool};
use super::verifier::{VerificationRx, VerificationTask, VerifierPool};

/// Errors from coordinator construction. Pipeline-fatal conditions
/// encountered once workers are running are instead reported as
/// `RunOutcome::Failed` via [`PipelineEvent::UploadsComplete`]
/// (spec.md §7).
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to negotiate transfer mode: {0}")]
    Negotiation(String),
}

/// Run configuration (SPEC_FULL.md §2 component I, §6).
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pool size for verifiers (spec.md §4.E: default 25).
    pub num_verification_workers: usize,
    /// Pool size for uploaders before `TransferMode` clamping
    /// (spec.md §4.F: default 5, forced to 1 under POST).
    pub num_upload_workers: usize,
    /// Test/dry-run hook: a reserved digest string returned without
    /// reading the file (spec.md §6).
    pub fake_digest: Option<String>,
    /// Suppresses `requestVerify` network calls (spec.md §6).
    pub test_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_verification_workers: 25,
            num_upload_workers: 5,
            fake_digest: None,
            test_run: false,
        }
    }
}

/// Tracks in-flight task count for quiescence detection (spec.md §4.G:
/// "Await quiescence: both queues empty AND no in-flight tasks").
///
/// Uses the check-notified-check idiom so a `complete_one` that reaches
/// zero between a waiter's first check and its call to `notified()` is
/// never missed.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    outstanding: AtomicUsize,
    notify: Notify,
}

impl Tracker {
    fn new(initial: usize) -> Self {
        Self {
            outstanding: AtomicUsize::new(initial),
            notify: Notify::new(),
        }
    }

    pub(crate) fn add(&self, n: usize) {
        self.outstanding.fetch_add(n, Ordering::SeqCst);
    }

    pub(crate) fn complete_one(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.notify.notify_waiters();
        }
    }

    fn is_quiescent(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }

    async fn wait_quiescent(&self) {
        loop {
            if self.is_quiescent() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_quiescent() {
                return;
            }
            notified.await;
        }
    }
}

/// Owns one pipeline run: the queues, the worker pools, and the
/// coordination state described in spec.md §4.G.
pub struct Coordinator {
    status: Arc<StatusBus>,
    events: EventBus,
    cancel: CancelToken,
    mode: TransferMode,
    verification_tx: mpsc::UnboundedSender<Option<VerificationTask>>,
    upload_tx: mpsc::UnboundedSender<Option<UploadTask>>,
    verifier_handles: Vec<JoinHandle<()>>,
    uploader_handles: Vec<JoinHandle<()>>,
    num_verification_workers: usize,
    num_upload_workers: usize,
    tracker: Arc<Tracker>,
    shutting_down: AtomicBool,
}

impl Coordinator {
    /// Negotiates `TransferMode` against the catalog, spawns both worker
    /// pools, and returns a ready-to-use coordinator (spec.md §4.G).
    ///
    /// The original agent blocks on a user acknowledgment before falling
    /// back to POST; this engine has no interactive surface, so an
    /// unapproved staging account publishes a one-shot advisory
    /// [`PipelineEvent::ShowMessage`] and proceeds directly with `POST`
    /// (SPEC_FULL.md §9 open question).
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::Negotiation`] if the approval check itself
    /// cannot be completed (connection failure at startup).
    #[instrument(skip(catalog, credentials, events, options))]
    pub async fn start(
        catalog: CatalogClient,
        server_url: &str,
        credentials: Credentials,
        dataset_uri: &str,
        events: EventBus,
        options: RunOptions,
    ) -> Result<Self, CoordinatorError> {
        let approval = catalog
            .check_staging_approval(dataset_uri)
            .await
            .map_err(|e| CoordinatorError::Negotiation(e.to_string()))?;

        let mode = if approval.approved {
            TransferMode::Staging
        } else {
            events.publish(PipelineEvent::ShowMessage {
                title: "Staging uploads not approved".into(),
                message: "This account is not approved for staging uploads; falling back to \
                          direct HTTP upload for this run."
                    .into(),
                severity: Severity::Info,
            });
            TransferMode::Post
        };
        info!(?mode, "transfer mode negotiated");

        let staging_credentials = match (&approval.username, &approval.host) {
            (Some(username), Some(host)) => Credentials {
                staging_username: username.clone(),
                staging_host: host.clone(),
                ..credentials.clone()
            },
            _ => credentials.clone(),
        };

        let status = Arc::new(StatusBus::new(events.clone()));
        let cancel = CancelToken::new();
        let tracker = Arc::new(Tracker::new(0));

        let (verification_tx, verification_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();
        let verification_rx: VerificationRx = Arc::new(Mutex::new(verification_rx));
        let upload_rx: UploadRx = Arc::new(Mutex::new(upload_rx));

        let replica_endpoint_missing = Arc::new(AtomicBool::new(false));
        let num_verification_workers = options.num_verification_workers.max(1);
        let num_upload_workers = mode.clamp_upload_workers(options.num_upload_workers);

        let verifier_handles = VerifierPool::spawn(
            num_verification_workers,
            catalog.clone(),
            Arc::clone(&status),
            events.clone(),
            cancel.clone(),
            mode,
            verification_rx,
            upload_tx.clone(),
            replica_endpoint_missing,
            Arc::clone(&tracker),
            options.fake_digest,
        );

        let staging = Arc::new(StagingTransport::new(staging_credentials));
        let post = Arc::new(PostTransport::new(server_url, credentials));
        let uploader_handles = UploaderPool::spawn(
            num_upload_workers,
            catalog,
            staging,
            post,
            mode,
            Arc::clone(&status),
            events.clone(),
            cancel.clone(),
            upload_rx,
            Arc::clone(&tracker),
        );

        Ok(Self {
            status,
            events,
            cancel,
            mode,
            verification_tx,
            upload_tx,
            verifier_handles,
            uploader_handles,
            num_verification_workers,
            num_upload_workers,
            tracker,
            shutting_down: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    #[must_use]
    pub fn status(&self) -> &Arc<StatusBus> {
        &self.status
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Feeds the verification queue from a full folder scan or a specific
    /// subset, e.g. drag-and-drop additions (spec.md §4.G).
    ///
    /// If the run is already canceled, files are marked `CANCELED` directly
    /// and never reach the queue: every worker has already drained its
    /// shutdown sentinel by this point, so a task sent afterward would sit
    /// unconsumed forever and `await_quiescence` would never return
    /// (spec.md §3 invariant 6: "no new tasks begin" once canceled).
    pub fn enqueue(&self, files: impl IntoIterator<Item = LocalFile>, dataset: &DatasetRef) {
        if self.cancel.is_canceled() {
            for local_file in files {
                self.status.begin_verification(local_file.id, local_file.size);
                self.status
                    .set_status(local_file.id, ItemStatus::Canceled, "canceled");
            }
            return;
        }

        let mut count = 0usize;
        for local_file in files {
            count += 1;
            let task = VerificationTask {
                local_file,
                dataset: dataset.clone(),
                test_run: false,
            };
            let _ = self.verification_tx.send(Some(task));
        }
        self.tracker.add(count);
    }

    /// Waits until both queues are empty and no task is in flight, then
    /// publishes the aggregate completion event (spec.md §4.G).
    pub async fn await_quiescence(&self) -> RunOutcome {
        self.tracker.wait_quiescent().await;
        let outcome = if self.cancel.is_canceled() {
            RunOutcome::Canceled
        } else if self.status.failed_count() > 0 {
            RunOutcome::Failed
        } else {
            RunOutcome::Success
        };
        self.events
            .publish(PipelineEvent::UploadsComplete(outcome));
        outcome
    }

    /// Cancels the run: sets the shared flag, moves every non-terminal
    /// row to `CANCELED`, and wakes idle workers with a sentinel per
    /// worker per queue (spec.md §4.G). Idempotent.
    pub fn cancel(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        self.status.cancel_remaining();
        for _ in 0..self.num_verification_workers {
            let _ = self.verification_tx.send(None);
        }
        for _ in 0..self.num_upload_workers {
            let _ = self.upload_tx.send(None);
        }
    }

    /// Cancels (if not already shutting down) and joins every worker
    /// handle. Re-entrant: a second call after the first completes is a
    /// no-op beyond joining already-finished handles.
    pub async fn shutdown(mut self) {
        self.cancel();
        for handle in self.verifier_handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "verifier worker panicked");
            }
        }
        for handle in self.uploader_handles.drain(..) {
            if let Err(err) = handle.await {
                warn!(error = %err, "uploader worker panicked");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracker_reaches_quiescence_after_all_complete() {
        let tracker = Tracker::new(0);
        tracker.add(2);
        tracker.complete_one();
        assert!(!tracker.is_quiescent());
        tracker.complete_one();
        assert!(tracker.is_quiescent());
        tracker.wait_quiescent().await;
    }

    #[test]
    fn run_options_defaults_match_spec() {
        let options = RunOptions::default();
        assert_eq!(options.num_verification_workers, 25);
        assert_eq!(options.num_upload_workers, 5);
        assert!(options.fake_digest.is_none());
        assert!(!options.test_run);
    }
}
