//! HTTP client for the server catalog API (spec.md §4.B, §6).

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::credentials::Credentials;
use crate::model::{FileRecord, NewFileRecord};

use super::error::CatalogError;

type Result<T> = std::result::Result<T, CatalogError>;

/// Whether the local staging account has been approved for SSH-based
/// uploads, and if so, which host/username to use (spec.md §4.G).
#[derive(Debug, Clone)]
pub struct StagingApproval {
    pub approved: bool,
    pub username: Option<String>,
    pub host: Option<String>,
}

#[derive(Deserialize)]
struct ListMeta {
    total_count: usize,
}

#[derive(Deserialize)]
struct ListResponse {
    meta: ListMeta,
    objects: Vec<FileRecord>,
}

#[derive(Deserialize)]
struct BytesUploadedResponse {
    bytes_uploaded: u64,
}

#[derive(Deserialize)]
struct StagingApprovalResponse {
    approved: bool,
    #[serde(default)]
    approved_username: Option<String>,
    #[serde(default)]
    approved_staging_host: Option<String>,
}

/// Client for the `/api/v1/` server catalog described in spec.md §6.
///
/// Cloning is cheap: it wraps a pooled [`reqwest::Client`] and the
/// read-only [`Credentials`] established at pipeline start.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl CatalogClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    fn authorization(&self) -> String {
        self.credentials.authorization_header()
    }

    /// Look up a file record by `(dataset, directory, filename)`
    /// (spec.md §4.B, §6).
    ///
    /// # Errors
    ///
    /// [`CatalogError::NotFound`] if no record exists,
    /// [`CatalogError::MultipleRecords`] if more than one does,
    /// or a network/auth/server error.
    #[instrument(skip(self), fields(directory = %directory, filename = %filename))]
    pub async fn find(
        &self,
        dataset_uri: &str,
        directory: &str,
        filename: &str,
    ) -> Result<FileRecord> {
        let url = format!("{}/api/v1/dataset_file/", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.authorization())
            .query(&[
                ("dataset", dataset_uri),
                ("filename", filename),
                ("directory", directory),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|source| CatalogError::Disconnected { source })?;

        match response.status() {
            StatusCode::OK => {
                let body: ListResponse = response.json().await.map_err(|source| {
                    CatalogError::Disconnected { source }
                })?;
                match body.meta.total_count {
                    0 => Err(CatalogError::NotFound {
                        directory: directory.to_string(),
                        filename: filename.to_string(),
                    }),
                    1 => body.objects.into_iter().next().ok_or(CatalogError::NotFound {
                        directory: directory.to_string(),
                        filename: filename.to_string(),
                    }),
                    count => Err(CatalogError::MultipleRecords {
                        directory: directory.to_string(),
                        filename: filename.to_string(),
                        count,
                    }),
                }
            }
            StatusCode::UNAUTHORIZED => Err(CatalogError::Unauthorized { operation: "find" }),
            StatusCode::INTERNAL_SERVER_ERROR => {
                Err(CatalogError::InternalServerError { operation: "find" })
            }
            status => Err(CatalogError::UnexpectedStatus {
                status: status.as_u16(),
                operation: "find",
            }),
        }
    }

    /// Creates a new file record (and, for the POST transport, uploads the
    /// bytes in the same request via [`crate::transport::post::PostTransport`])
    /// (spec.md §4.B, §6).
    ///
    /// # Errors
    ///
    /// [`CatalogError::MissingStagingStorage`] on HTTP 404, or a
    /// network/auth/server error.
    #[instrument(skip(self, metadata), fields(filename = %metadata.filename))]
    pub async fn create(&self, metadata: &NewFileRecord) -> Result<FileRecord> {
        let url = format!("{}/api/v1/dataset_file/", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.authorization())
            .json(metadata)
            .send()
            .await
            .map_err(|source| CatalogError::Disconnected { source })?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => response
                .json::<FileRecord>()
                .await
                .map_err(|source| CatalogError::Disconnected { source }),
            StatusCode::UNAUTHORIZED => Err(CatalogError::Unauthorized { operation: "create" }),
            StatusCode::NOT_FOUND => Err(CatalogError::MissingStagingStorage {
                dataset_uri: metadata.dataset.clone(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR => {
                Err(CatalogError::InternalServerError { operation: "create" })
            }
            status => {
                // Open question in spec.md §9: preserve the original's
                // soft-failure behavior for unrecognized statuses rather
                // than guessing a stricter policy.
                warn!(status = status.as_u16(), "unexpected status creating record");
                Err(CatalogError::UnexpectedStatus {
                    status: status.as_u16(),
                    operation: "create",
                })
            }
        }
    }

    /// Requests server-side integrity verification of a record's replica.
    /// Idempotent (spec.md §4.B, §6).
    ///
    /// # Errors
    ///
    /// A network/auth/server error.
    #[instrument(skip(self))]
    pub async fn request_verify(&self, record_id: u64) -> Result<()> {
        let url = format!("{}/api/v1/dataset_file/{record_id}/verify/", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|source| CatalogError::Disconnected { source })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED => {
                Err(CatalogError::Unauthorized { operation: "request_verify" })
            }
            StatusCode::INTERNAL_SERVER_ERROR => Err(CatalogError::InternalServerError {
                operation: "request_verify",
            }),
            status => Err(CatalogError::UnexpectedStatus {
                status: status.as_u16(),
                operation: "request_verify",
            }),
        }
    }

    /// Returns the number of bytes already uploaded to staging for a
    /// replica (spec.md §4.C, §6: `GET /api/v1/mydata_replica/<id>/`).
    ///
    /// # Errors
    ///
    /// [`CatalogError::MissingReplicaEndpoint`] if the server does not
    /// advertise this endpoint (HTTP 404), or a network/auth/server error.
    #[instrument(skip(self))]
    pub async fn bytes_on_staging(&self, replica_id: u64) -> Result<u64> {
        let url = format!("{}/api/v1/mydata_replica/{replica_id}/", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|source| CatalogError::Disconnected { source })?;

        match response.status() {
            StatusCode::OK => {
                let body: BytesUploadedResponse = response
                    .json()
                    .await
                    .map_err(|source| CatalogError::Disconnected { source })?;
                Ok(body.bytes_uploaded)
            }
            StatusCode::NOT_FOUND => {
                debug!("mydata_replica endpoint missing on this server");
                Err(CatalogError::MissingReplicaEndpoint)
            }
            StatusCode::UNAUTHORIZED => {
                Err(CatalogError::Unauthorized { operation: "bytes_on_staging" })
            }
            status => Err(CatalogError::UnexpectedStatus {
                status: status.as_u16(),
                operation: "bytes_on_staging",
            }),
        }
    }

    /// Asks whether SSH staging uploads have been approved for this
    /// account, used once by the coordinator to pick [`crate::pipeline::TransferMode`]
    /// (spec.md §4.G, SPEC_FULL.md §4.B).
    ///
    /// # Errors
    ///
    /// A network/auth/server error.
    #[instrument(skip(self))]
    pub async fn check_staging_approval(&self, dataset_uri: &str) -> Result<StagingApproval> {
        let url = format!(
            "{}/api/v1/mydata_uploaderregistrationrequest/",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.authorization())
            .query(&[("dataset", dataset_uri), ("format", "json")])
            .send()
            .await
            .map_err(|source| CatalogError::Disconnected { source })?;

        match response.status() {
            StatusCode::OK => {
                let body: StagingApprovalResponse = response
                    .json()
                    .await
                    .map_err(|source| CatalogError::Disconnected { source })?;
                Ok(StagingApproval {
                    approved: body.approved,
                    username: body.approved_username,
                    host: body.approved_staging_host,
                })
            }
            StatusCode::NOT_FOUND => Ok(StagingApproval {
                approved: false,
                username: None,
                host: None,
            }),
            StatusCode::UNAUTHORIZED => Err(CatalogError::Unauthorized {
                operation: "check_staging_approval",
            }),
            status => Err(CatalogError::UnexpectedStatus {
                status: status.as_u16(),
                operation: "check_staging_approval",
            }),
        }
    }

    /// Build the JSON `{bytes_uploaded}` body a test mock can return; kept
    /// here rather than in tests so both unit tests and wiremock fixtures
    /// share the wire shape.
    #[cfg(test)]
    pub(crate) fn bytes_uploaded_body(bytes: u64) -> serde_json::Value {
        json!({ "bytes_uploaded": bytes })
    }
}
