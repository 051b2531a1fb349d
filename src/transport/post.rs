//! POST transport: single-request multipart create-and-upload
//! (spec.md §4.D, §6).

use std::path::Path;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tracing::instrument;

use crate::cancel::CancelToken;
use crate::catalog::CatalogError;
use crate::credentials::Credentials;
use crate::model::{FileRecord, NewFileRecord};

use super::error::{TransferOutcome, TransportError};

/// Uploads a file's bytes in the same request that creates its server-side
/// record, for accounts without approved staging access (spec.md §4.D).
///
/// Unlike [`super::staging::StagingTransport`], the request is one atomic
/// HTTP call: there is no mid-transfer progress boundary to check
/// cancellation against, so `cancel` is only consulted before the request
/// is sent.
#[derive(Debug, Clone)]
pub struct PostTransport {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl PostTransport {
    #[must_use]
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            credentials,
        }
    }

    /// Creates the record and uploads `path`'s bytes as the same multipart
    /// request (spec.md §4.D).
    ///
    /// # Errors
    ///
    /// [`TransportError::Io`] if the local file cannot be read,
    /// [`TransportError::Transfer`] if the server rejects the upload,
    /// [`TransportError::MissingStagingStorage`] on a 404 from the create
    /// endpoint.
    #[instrument(skip(self, metadata, cancel, progress), fields(filename = %metadata.filename, size = metadata.size))]
    pub async fn create_and_upload(
        &self,
        metadata: &NewFileRecord,
        path: &Path,
        cancel: &CancelToken,
        mut progress: impl FnMut(u64),
    ) -> Result<(FileRecord, TransferOutcome), TransportError> {
        if cancel.is_canceled() {
            return Ok((record_placeholder(metadata), TransferOutcome::Canceled));
        }

        let contents = tokio::fs::read(path)
            .await
            .map_err(|source| TransportError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if cancel.is_canceled() {
            return Ok((record_placeholder(metadata), TransferOutcome::Canceled));
        }

        let file_part = Part::bytes(contents)
            .file_name(metadata.filename.clone())
            .mime_str(&metadata.mimetype)
            .map_err(|e| TransportError::Transfer(format!("invalid mimetype: {e}")))?;

        let form = Form::new()
            .text("dataset", metadata.dataset.clone())
            .text("filename", metadata.filename.clone())
            .text("directory", metadata.directory.clone())
            .text("md5sum", metadata.md5sum.clone())
            .text("size", metadata.size.to_string())
            .text("created_time", metadata.created_time.clone())
            .part("attached_file", file_part);

        let url = format!("{}/api/v1/dataset_file/", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.credentials.authorization_header())
            .multipart(form)
            .send()
            .await
            .map_err(|source| TransportError::Transfer(format!("request failed: {source}")))?;

        match response.status() {
            reqwest::StatusCode::OK | reqwest::StatusCode::CREATED => {
                let record: FileRecord = response.json().await.map_err(|source| {
                    TransportError::Transfer(format!("malformed create response: {source}"))
                })?;
                progress(metadata.size);
                Ok((record, TransferOutcome::Completed))
            }
            reqwest::StatusCode::UNAUTHORIZED => Err(TransportError::Transfer(
                CatalogError::Unauthorized {
                    operation: "post_create_and_upload",
                }
                .to_string(),
            )),
            reqwest::StatusCode::NOT_FOUND => Err(TransportError::MissingStagingStorage {
                dataset_uri: metadata.dataset.clone(),
            }),
            status => Err(TransportError::Transfer(format!(
                "unexpected status {status} creating and uploading record"
            ))),
        }
    }
}

/// A record stand-in for the canceled-before-any-IO path, where no server
/// round trip ever happened and there is nothing authoritative to return.
fn record_placeholder(metadata: &NewFileRecord) -> FileRecord {
    FileRecord {
        id: 0,
        filename: metadata.filename.clone(),
        directory: metadata.directory.clone(),
        size: metadata.size,
        md5sum: metadata.md5sum.clone(),
        replicas: Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> Credentials {
        Credentials {
            username: "alice".into(),
            api_key: "key".into(),
            staging_host: "staging.example.org".into(),
            staging_username: "mydata".into(),
            private_key_path: "/dev/null".into(),
        }
    }

    fn metadata() -> NewFileRecord {
        NewFileRecord {
            dataset: "dataset/1".into(),
            filename: "a.txt".into(),
            directory: String::new(),
            md5sum: "abc".into(),
            size: 11,
            mimetype: "text/plain".into(),
            created_time: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn upload_returns_canceled_before_any_request_when_already_canceled() {
        let transport = PostTransport::new("http://unused.invalid", creds());
        let cancel = CancelToken::new();
        cancel.cancel();

        let (_, outcome) = transport
            .create_and_upload(&metadata(), Path::new("/nonexistent"), &cancel, |_| {})
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Canceled);
    }

    #[tokio::test]
    async fn successful_create_and_upload_parses_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 42, "filename": "a.txt", "directory": "",
                "size": 11, "md5sum": "abc", "replicas": []
            })))
            .mount(&server)
            .await;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let transport = PostTransport::new(server.uri(), creds());
        let cancel = CancelToken::new();
        let (record, outcome) = transport
            .create_and_upload(&metadata(), file.path(), &cancel, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(record.id, 42);
    }

    #[tokio::test]
    async fn missing_staging_storage_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/dataset_file/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        let transport = PostTransport::new(server.uri(), creds());
        let cancel = CancelToken::new();
        let result = transport
            .create_and_upload(&metadata(), file.path(), &cancel, |_| {})
            .await;
        assert!(matches!(
            result,
            Err(TransportError::MissingStagingStorage { .. })
        ));
    }
}
