//! Server-assigned dataset reference (spec.md §3, `DatasetRef`).

/// A server-side dataset container, created by the external catalog before
/// the pipeline starts (spec.md §1, §3). One per mirrored folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    /// Server-assigned dataset id.
    pub id: u64,
    /// Opaque URI the catalog uses to address this dataset in API calls.
    pub uri: String,
}
