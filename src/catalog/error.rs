//! Error mapping for the server catalog client (spec.md §4.B, §7).

use thiserror::Error;

/// Errors raised by [`super::CatalogClient`] operations.
///
/// HTTP status mapping (spec.md §4.B):
/// 401 → [`CatalogError::Unauthorized`]; 404 → [`CatalogError::NotFound`] on
/// `find`, [`CatalogError::MissingStagingStorage`] on `create`; 500 →
/// [`CatalogError::InternalServerError`]; connection error →
/// [`CatalogError::Disconnected`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP 401: fatal for the task that issued the request.
    #[error("unauthorized: {operation}")]
    Unauthorized { operation: &'static str },

    /// `find` returned zero matching records.
    #[error("no record found for {directory}/{filename}")]
    NotFound {
        directory: String,
        filename: String,
    },

    /// `find` returned more than one matching record: a hard failure for
    /// this file (spec.md §4.B, §9 preserves the original's mixed signal).
    #[error("{count} duplicate records found for {directory}/{filename}")]
    MultipleRecords {
        directory: String,
        filename: String,
        count: usize,
    },

    /// `create` returned 404: the staging storage backing the dataset is
    /// missing. Pipeline-fatal (spec.md §7).
    #[error("missing staging storage for dataset {dataset_uri}")]
    MissingStagingStorage { dataset_uri: String },

    /// The server does not advertise the `/api/v1/mydata_replica/` endpoint
    /// used by `bytes_on_staging`. Degrading, not fatal (spec.md §4.C, §7).
    #[error("server does not advertise the replica bytes-uploaded endpoint")]
    MissingReplicaEndpoint,

    /// HTTP 500 from the server.
    #[error("internal server error during {operation}")]
    InternalServerError { operation: &'static str },

    /// Connection-level failure (DNS, TCP, TLS). Fails the task but does
    /// not stop the pipeline (spec.md §7); the engine also publishes
    /// `CONNECTION_STATUS(Disconnected)` when this occurs.
    #[error("disconnected while contacting catalog: {source}")]
    Disconnected {
        #[source]
        source: reqwest::Error,
    },

    /// An HTTP status the protocol table does not specifically name.
    /// Per spec.md §9's open question this is a soft failure, not a
    /// stricter guessed policy.
    #[error("unexpected HTTP status {status} during {operation}")]
    UnexpectedStatus { status: u16, operation: &'static str },

    /// A response body could not be decoded as the expected JSON shape.
    #[error("malformed catalog response during {operation}: {source}")]
    MalformedResponse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CatalogError {
    /// Whether this error should surface `CONNECTION_STATUS(Disconnected)`
    /// to observers (spec.md §7).
    #[must_use]
    pub fn is_connection_flap(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}
