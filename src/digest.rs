//! Streamed content digest of a local file (spec.md §4.A).

use std::path::Path;

use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, instrument};

use crate::cancel::CancelToken;

/// Initial block size: 100 KiB (spec.md §4.A).
const INITIAL_BLOCK_SIZE: usize = 100 * 1024;

/// Block size ceiling: 1 MiB (spec.md §4.A).
const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Once `size / block_size` drops to or below this, stop doubling
/// (spec.md §4.A: "while size/blockSize > 100 ... double").
const BLOCK_COUNT_THRESHOLD: u64 = 100;

/// Errors from [`digest`].
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a digest computation: either the final hex digest, or a
/// clean cancellation with no hash emitted (spec.md §4.A).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    Hex(String),
    Canceled,
}

/// Chooses the block size for a file of the given size, starting at
/// `INITIAL_BLOCK_SIZE` and doubling while `size / block_size > 100` and
/// `block_size < MAX_BLOCK_SIZE` (spec.md §4.A).
#[must_use]
fn block_size_for(size: u64) -> usize {
    let mut block_size = INITIAL_BLOCK_SIZE;
    while size / (block_size as u64) > BLOCK_COUNT_THRESHOLD && block_size < MAX_BLOCK_SIZE {
        block_size *= 2;
    }
    block_size.min(MAX_BLOCK_SIZE)
}

/// Computes the MD5-compatible content digest of `path`, reading it
/// sequentially in adaptively-sized blocks (spec.md §4.A).
///
/// `progress` is called with the cumulative byte count after each block.
/// `cancel` is consulted between blocks; once canceled, the read loop
/// stops and [`DigestOutcome::Canceled`] is returned without emitting a
/// final hash.
///
/// # Errors
///
/// [`DigestError::Io`] if the file cannot be opened or a read fails.
#[instrument(skip(progress, cancel), fields(path = %path.display(), size))]
pub async fn digest(
    path: &Path,
    size: u64,
    cancel: &CancelToken,
    mut progress: impl FnMut(u64),
) -> Result<DigestOutcome, DigestError> {
    let mut file = File::open(path).await.map_err(|source| DigestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let block_size = block_size_for(size);
    debug!(block_size, "computing digest");

    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; block_size];
    let mut bytes_read_total: u64 = 0;

    loop {
        if cancel.is_canceled() {
            return Ok(DigestOutcome::Canceled);
        }

        let bytes_read = file.read(&mut buffer).await.map_err(|source| DigestError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if bytes_read == 0 {
            break;
        }

        context.consume(&buffer[..bytes_read]);
        bytes_read_total += bytes_read as u64;
        progress(bytes_read_total);

        if cancel.is_canceled() {
            return Ok(DigestOutcome::Canceled);
        }
    }

    let digest = context.compute();
    Ok(DigestOutcome::Hex(format!("{digest:x}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn block_size_starts_at_100kib_for_small_files() {
        assert_eq!(block_size_for(1024), INITIAL_BLOCK_SIZE);
    }

    #[test]
    fn block_size_doubles_for_large_files() {
        // 50 MiB / 100 KiB = 500 > 100, so it should double at least once.
        let size = 50 * 1024 * 1024;
        assert!(block_size_for(size) > INITIAL_BLOCK_SIZE);
    }

    #[test]
    fn block_size_caps_at_1mib() {
        let size = 10 * 1024 * 1024 * 1024; // 10 GiB
        assert_eq!(block_size_for(size), MAX_BLOCK_SIZE);
    }

    #[tokio::test]
    async fn digest_matches_known_md5() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        let cancel = CancelToken::new();

        let outcome = digest(file.path(), 11, &cancel, |_| {}).await.unwrap();
        // md5("hello world")
        assert_eq!(
            outcome,
            DigestOutcome::Hex("5eb63bbbe01eeed093cb22bb8f5acdc3".to_string())
        );
    }

    #[tokio::test]
    async fn digest_reports_cumulative_progress() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 1024]).unwrap();
        let cancel = CancelToken::new();
        let mut last_seen = 0u64;

        digest(file.path(), 1024, &cancel, |bytes| last_seen = bytes)
            .await
            .unwrap();
        assert_eq!(last_seen, 1024);
    }

    #[tokio::test]
    async fn digest_aborts_on_cancel_without_emitting_hash() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 1024]).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = digest(file.path(), 1024, &cancel, |_| {}).await.unwrap();
        assert_eq!(outcome, DigestOutcome::Canceled);
    }

    #[tokio::test]
    async fn digest_missing_file_is_io_error() {
        let cancel = CancelToken::new();
        let result = digest(Path::new("/nonexistent/path"), 0, &cancel, |_| {}).await;
        assert!(matches!(result, Err(DigestError::Io { .. })));
    }
}
