//! Errors and outcomes shared by the staging and POST transports
//! (spec.md §4.C, §4.D, §7).

use thiserror::Error;

/// Outcome of a transfer attempt that did not error outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All bytes were confirmed delivered.
    Completed,
    /// The cancellation flag was observed mid-transfer; no side effects
    /// beyond what was already streamed.
    Canceled,
}

/// Errors from [`super::staging::StagingTransport`] and
/// [`super::post::PostTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// Local file could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The transport delivered fewer (or more) bytes than `size`, or the
    /// remote side reported a non-success outcome. Spec.md §4.C: "An
    /// upload is considered successful only when the number of bytes
    /// reported delivered equals `size`; any lesser count yields
    /// `TRANSFER_ERROR` even if the channel closed without a lower-level
    /// error."
    #[error("transfer error: {0}")]
    Transfer(String),

    /// The dataset's staging storage was removed server-side (HTTP 404 on
    /// the POST create endpoint). Pipeline-fatal regardless of transport
    /// (spec.md §4.D, §7): kept distinct from [`TransportError::Transfer`]
    /// so callers can escalate instead of retrying file-by-file.
    #[error("staging storage missing for dataset {dataset_uri}")]
    MissingStagingStorage { dataset_uri: String },
}
