//! Staging transport: authenticated streaming upload to the staging host
//! (spec.md §4.C, §6).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::ChannelMsg;
use russh::client::{self, Handle};
use russh_keys::load_secret_key;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::credentials::Credentials;

use super::error::{TransferOutcome, TransportError};

/// Bytes read per chunk while streaming to the staging channel.
const CHUNK_SIZE: usize = 256 * 1024;

struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Streams a local file to the staging host under a replica's opaque URI
/// (spec.md §4.C).
#[derive(Debug, Clone)]
pub struct StagingTransport {
    credentials: Credentials,
}

impl StagingTransport {
    #[must_use]
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    async fn connect(&self) -> Result<Handle<AcceptingHandler>, TransportError> {
        let config = Arc::new(client::Config::default());
        let addr = (self.credentials.staging_host.as_str(), 22);
        let mut handle = client::connect(config, addr, AcceptingHandler)
            .await
            .map_err(|e| TransportError::Transfer(format!("ssh connect failed: {e}")))?;

        let key_pair = load_secret_key(&self.credentials.private_key_path, None)
            .map_err(|e| TransportError::Transfer(format!("failed to load private key: {e}")))?;

        let authenticated = handle
            .authenticate_publickey(&self.credentials.staging_username, Arc::new(key_pair))
            .await
            .map_err(|e| TransportError::Transfer(format!("ssh auth error: {e}")))?;
        if !authenticated {
            return Err(TransportError::Transfer(
                "ssh public key authentication rejected".to_string(),
            ));
        }
        Ok(handle)
    }

    /// Streams `size` bytes of `path` to `replica_uri` on the staging host,
    /// reporting cumulative bytes sent via `progress` and checking `cancel`
    /// between chunks (spec.md §4.C).
    ///
    /// Success requires the transport to confirm exactly `size` bytes
    /// delivered; any lesser count is a [`TransportError::Transfer`], even
    /// if the channel closed cleanly.
    ///
    /// # Errors
    ///
    /// [`TransportError::Io`] if the local file cannot be read,
    /// [`TransportError::Transfer`] if the SSH session or upload fails.
    #[instrument(skip(self, progress, cancel), fields(replica_uri = %replica_uri, size))]
    pub async fn upload_file(
        &self,
        path: &Path,
        size: u64,
        replica_uri: &str,
        cancel: &CancelToken,
        mut progress: impl FnMut(u64),
    ) -> Result<TransferOutcome, TransportError> {
        if cancel.is_canceled() {
            return Ok(TransferOutcome::Canceled);
        }

        let mut local_file = File::open(path).await.map_err(|source| TransportError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let handle = self.connect().await?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Transfer(format!("failed to open channel: {e}")))?;

        let remote_command = format!("cat > {replica_uri}");
        channel
            .exec(true, remote_command)
            .await
            .map_err(|e| TransportError::Transfer(format!("failed to exec remote write: {e}")))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut bytes_sent: u64 = 0;

        loop {
            if cancel.is_canceled() {
                let _ = channel.eof().await;
                return Ok(TransferOutcome::Canceled);
            }

            let bytes_read = local_file
                .read(&mut buffer)
                .await
                .map_err(|source| TransportError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            if bytes_read == 0 {
                break;
            }

            channel
                .data(&buffer[..bytes_read])
                .await
                .map_err(|e| TransportError::Transfer(format!("write failed: {e}")))?;

            bytes_sent += bytes_read as u64;
            progress(bytes_sent);
        }

        channel
            .eof()
            .await
            .map_err(|e| TransportError::Transfer(format!("eof failed: {e}")))?;

        // Drain until the remote side closes the channel.
        while let Some(msg) = channel.wait().await {
            if matches!(msg, ChannelMsg::Close | ChannelMsg::Eof) {
                break;
            }
        }

        debug!(bytes_sent, size, "staging upload finished");

        if bytes_sent == size {
            Ok(TransferOutcome::Completed)
        } else {
            Err(TransportError::Transfer(format!(
                "delivered {bytes_sent} bytes, expected {size}"
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            username: "alice".into(),
            api_key: "key".into(),
            staging_host: "staging.example.org".into(),
            staging_username: "mydata".into(),
            private_key_path: PathBuf::from("/dev/null"),
        }
    }

    #[tokio::test]
    async fn upload_returns_canceled_before_any_io_when_already_canceled() {
        let transport = StagingTransport::new(creds());
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = transport
            .upload_file(
                Path::new("/nonexistent/file"),
                10,
                "staging://1",
                &cancel,
                |_| {},
            )
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Canceled);
    }
}
