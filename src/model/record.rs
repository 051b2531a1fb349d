//! Server-side file record and replica entities (spec.md §3).

use serde::{Deserialize, Serialize};

/// A copy of a file in some storage location, tracked server-side.
///
/// The zeroth replica returned by [`crate::catalog::CatalogClient::replicas`]
/// is authoritative for this engine (spec.md §4.B).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub id: u64,
    /// Opaque server path used by the staging host.
    pub uri: String,
    pub verified: bool,
}

/// Server-side mirror of a `FileRecord`: filename, directory, digest, size,
/// and zero-or-more replicas (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: u64,
    pub filename: String,
    pub directory: String,
    pub size: u64,
    pub md5sum: String,
    #[serde(default)]
    pub replicas: Vec<Replica>,
}

impl FileRecord {
    /// The authoritative replica for this engine, if any (spec.md §4.B).
    #[must_use]
    pub fn primary_replica(&self) -> Option<&Replica> {
        self.replicas.first()
    }

    /// Whether the primary replica (if any) is verified.
    #[must_use]
    pub fn has_verified_replica(&self) -> bool {
        self.primary_replica().is_some_and(|r| r.verified)
    }
}

/// Metadata submitted when creating a new [`FileRecord`] on the server
/// (spec.md §6, `POST /api/v1/dataset_file/`).
#[derive(Debug, Clone, Serialize)]
pub struct NewFileRecord {
    pub dataset: String,
    pub filename: String,
    pub directory: String,
    pub md5sum: String,
    pub size: u64,
    pub mimetype: String,
    /// RFC 3339 creation timestamp.
    pub created_time: String,
}
