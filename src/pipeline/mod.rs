//! Verification-and-upload pipeline: queues, per-file state machine, and
//! the worker pools and coordinator that drive them (spec.md §2 components
//! E-G, §3, §4.E-§4.G).

mod coordinator;
mod uploader;
mod verifier;

pub use coordinator::{Coordinator, CoordinatorError, RunOptions};
pub use uploader::UploadTask;
pub use verifier::VerificationTask;

/// Transport method chosen once at pipeline start and immutable for its
/// lifetime (spec.md §3, `TransferMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Preferred: two-step create-record-then-stream-bytes, resumable.
    Staging,
    /// Fallback: single-request multipart create-and-upload.
    Post,
}

impl TransferMode {
    /// Upload concurrency under this mode. The POST transport is not safe
    /// for concurrent use, so `Post` always clamps to 1 regardless of
    /// configuration (spec.md §3 invariant 4).
    #[must_use]
    pub fn clamp_upload_workers(self, configured: usize) -> usize {
        match self {
            Self::Staging => configured.max(1),
            Self::Post => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_mode_clamps_to_one_worker() {
        assert_eq!(TransferMode::Post.clamp_upload_workers(5), 1);
        assert_eq!(TransferMode::Post.clamp_upload_workers(1), 1);
    }

    #[test]
    fn staging_mode_keeps_configured_worker_count() {
        assert_eq!(TransferMode::Staging.clamp_upload_workers(5), 5);
        assert_eq!(TransferMode::Staging.clamp_upload_workers(0), 1);
    }
}
