//! Progress & Status Bus: per-file observable status and progress
//! (spec.md §4.H).
//!
//! Backed by `dashmap` for the concurrent per-file row map, mirroring the
//! teacher crate's use of a concurrent map for shared per-key state. Row
//! creation (the one operation spec.md §4.E requires to be serialized) goes
//! through a single `Mutex<u64>` row-id counter; all other mutations are
//! independent, per-row, lock-free operations.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::events::{EventBus, PipelineEvent};
use crate::model::{ItemStatus, LocalFileId};

/// One row of observable state for a live `VerificationTask` or
/// `UploadTask` (spec.md §4.H).
#[derive(Debug, Clone)]
pub struct StatusRow {
    /// Monotonic id assigned under the row-creation mutex (spec.md §4.E);
    /// used for stable display ordering, not for lookups.
    pub row_id: u64,
    pub file_id: LocalFileId,
    pub status: ItemStatus,
    pub message: String,
    /// Cumulative progress within the current phase, 0-100 (spec.md §3
    /// invariant 5).
    pub progress: u8,
    pub bytes_uploaded: u64,
    /// Local file size, captured at registration; needed to fold a
    /// completed row into `completed_size` (SPEC_FULL.md §3).
    size: u64,
}

/// Aggregate run statistics, updated atomically as rows reach a terminal
/// status (spec.md §4.H).
#[derive(Debug, Default)]
struct Counters {
    completed_count: AtomicU64,
    failed_count: AtomicU64,
    /// Files failed specifically because the catalog reported duplicate
    /// records, tracked separately from `failed_count` (spec.md §9;
    /// SPEC_FULL.md §3, §9).
    duplicate_count: AtomicU64,
    completed_size: AtomicU64,
}

/// Maps a cumulative byte count onto a 0-100 percentage of `total`. A
/// zero-size total reports 100 (nothing left to transfer).
fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let percent = (done.min(total) * 100) / total;
    u8::try_from(percent).unwrap_or(100)
}

/// The shared, concurrent status bus for one pipeline run (spec.md §4.H).
#[derive(Debug)]
pub struct StatusBus {
    rows: DashMap<LocalFileId, StatusRow>,
    next_row_id: Mutex<u64>,
    events: EventBus,
    counters: Counters,
}

impl StatusBus {
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            rows: DashMap::new(),
            next_row_id: Mutex::new(0),
            events,
            counters: Counters::default(),
        }
    }

    /// Allocates a row for a newly dequeued local file and marks it
    /// `Verifying`. ID allocation is serialized across all callers (spec.md
    /// §4.E: "Creation of the per-task status row must be serialized by a
    /// single mutex across all verifiers so that ID allocation is
    /// collision-free").
    pub fn begin_verification(&self, file_id: LocalFileId, size: u64) -> u64 {
        let row_id = {
            #[allow(clippy::expect_used)]
            let mut next = self.next_row_id.lock().expect("status bus mutex poisoned");
            let id = *next;
            *next += 1;
            id
        };
        self.rows.insert(
            file_id,
            StatusRow {
                row_id,
                file_id,
                status: ItemStatus::Pending,
                message: String::new(),
                progress: 0,
                bytes_uploaded: 0,
                size,
            },
        );
        self.set_status(file_id, ItemStatus::Verifying, "looking up file on server");
        row_id
    }

    /// Updates a row's status and message. A no-op if the row is already in
    /// a terminal status (spec.md §3 invariant 3: terminal statuses never
    /// revert).
    pub fn set_status(&self, file_id: LocalFileId, status: ItemStatus, message: impl Into<String>) {
        let message = message.into();
        let mut progress = 0;
        let mut applied = false;
        if let Some(mut row) = self.rows.get_mut(&file_id) {
            if row.status.is_terminal() {
                return;
            }
            row.status = status;
            row.message.clone_from(&message);
            progress = row.progress;
            applied = true;
        }
        if !applied {
            return;
        }
        if status.is_terminal() {
            self.record_terminal(file_id, status, false);
        }
        self.events.publish(PipelineEvent::StatusChanged {
            file_id,
            status,
            message,
            progress,
        });
    }

    /// Marks a row `Failed` due to a duplicate-record verdict from the
    /// catalog, additionally counted in `duplicate_count` (spec.md §9;
    /// SPEC_FULL.md §3).
    pub fn mark_duplicate_failed(&self, file_id: LocalFileId, message: impl Into<String>) {
        let message = message.into();
        let mut applied = false;
        if let Some(mut row) = self.rows.get_mut(&file_id) {
            if row.status.is_terminal() {
                return;
            }
            row.status = ItemStatus::Failed;
            row.message.clone_from(&message);
            applied = true;
        }
        if !applied {
            return;
        }
        self.record_terminal(file_id, ItemStatus::Failed, true);
        self.events.publish(PipelineEvent::StatusChanged {
            file_id,
            status: ItemStatus::Failed,
            message,
            progress: 0,
        });
    }

    /// Reports cumulative bytes read during digest computation, mapped
    /// into the 0-100% range for this phase (spec.md §4.F step 2).
    pub fn set_digest_progress(&self, file_id: LocalFileId, bytes_read: u64, size: u64) {
        self.update_progress(file_id, percent_of(bytes_read, size));
    }

    /// Reports cumulative bytes sent during the transfer phase, updating
    /// both `progress` and `bytesUploaded` (spec.md §4.H).
    pub fn set_transfer_progress(&self, file_id: LocalFileId, bytes_sent: u64, size: u64) {
        let percent = percent_of(bytes_sent, size);
        let mut status = ItemStatus::Uploading;
        if let Some(mut row) = self.rows.get_mut(&file_id) {
            if row.status.is_terminal() {
                return;
            }
            row.progress = percent;
            row.bytes_uploaded = bytes_sent;
            status = row.status;
        } else {
            return;
        }
        self.events.publish(PipelineEvent::StatusChanged {
            file_id,
            status,
            message: String::new(),
            progress: percent,
        });
    }

    fn update_progress(&self, file_id: LocalFileId, percent: u8) {
        let mut status = ItemStatus::Verifying;
        if let Some(mut row) = self.rows.get_mut(&file_id) {
            if row.status.is_terminal() {
                return;
            }
            row.progress = percent;
            status = row.status;
        } else {
            return;
        }
        self.events.publish(PipelineEvent::StatusChanged {
            file_id,
            status,
            message: String::new(),
            progress: percent,
        });
    }

    /// Resets progress (and bytes uploaded) to 0 at the digest→transfer
    /// phase boundary (spec.md §3 invariant 5).
    pub fn reset_progress(&self, file_id: LocalFileId) {
        if let Some(mut row) = self.rows.get_mut(&file_id) {
            row.progress = 0;
            row.bytes_uploaded = 0;
        }
    }

    /// A read-only snapshot of a row, for tests and summaries.
    #[must_use]
    pub fn snapshot(&self, file_id: LocalFileId) -> Option<StatusRow> {
        self.rows.get(&file_id).map(|r| r.clone())
    }

    /// Moves every row not already in a terminal status to `Canceled`
    /// (spec.md §4.G: "moves every non-terminal row to `CANCELED`").
    pub fn cancel_remaining(&self) {
        let file_ids: Vec<LocalFileId> = self
            .rows
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.file_id)
            .collect();
        for file_id in file_ids {
            self.set_status(file_id, ItemStatus::Canceled, "canceled");
        }
    }

    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.counters.completed_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed_count(&self) -> u64 {
        self.counters.failed_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn duplicate_count(&self) -> u64 {
        self.counters.duplicate_count.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn completed_size(&self) -> u64 {
        self.counters.completed_size.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn record_terminal(&self, file_id: LocalFileId, status: ItemStatus, duplicate: bool) {
        match status {
            ItemStatus::Completed => {
                self.counters.completed_count.fetch_add(1, Ordering::SeqCst);
                if let Some(row) = self.rows.get(&file_id) {
                    self.counters
                        .completed_size
                        .fetch_add(row.size, Ordering::SeqCst);
                }
            }
            ItemStatus::Failed => {
                self.counters.failed_count.fetch_add(1, Ordering::SeqCst);
                if duplicate {
                    self.counters.duplicate_count.fetch_add(1, Ordering::SeqCst);
                }
            }
            _ => {}
        }
    }
}
