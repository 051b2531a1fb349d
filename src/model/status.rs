//! Per-file observable status (spec.md §3, `ItemStatus`).

use serde::{Deserialize, Serialize};

/// Lifecycle status of a single local file as it moves through the
/// verification-and-upload pipeline.
///
/// Terminal statuses (`FoundVerified`, `Completed`, `Failed`, `Canceled`)
/// never revert once reached (spec.md §3, invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Discovered locally, not yet handed to a verifier.
    Pending,
    /// A verifier has claimed the file and is querying the catalog.
    Verifying,
    /// Server has a record with a verified replica; nothing more to do.
    FoundVerified,
    /// Server has an unverified record whose replica is already full size.
    FoundUnverifiedFullSize,
    /// Server has an unverified record with a partial replica; resumable.
    FoundUnverifiedPartial,
    /// Server has an unverified record with no replica at all.
    FoundUnverifiedNoReplica,
    /// No server record exists; the file must be created and uploaded.
    NotFound,
    /// An uploader has claimed the file and is transferring bytes.
    Uploading,
    /// Upload (or verification-only path) finished successfully.
    Completed,
    /// Terminated with an unrecoverable per-task error.
    Failed,
    /// Terminated because the pipeline run was canceled.
    Canceled,
}

impl ItemStatus {
    /// Terminal statuses never revert (spec.md §3 invariant 3).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::FoundVerified | Self::Completed | Self::Failed | Self::Canceled
        )
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::FoundVerified => "found_verified",
            Self::FoundUnverifiedFullSize => "found_unverified_full_size",
            Self::FoundUnverifiedPartial => "found_unverified_partial",
            Self::FoundUnverifiedNoReplica => "found_unverified_no_replica",
            Self::NotFound => "not_found",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}
