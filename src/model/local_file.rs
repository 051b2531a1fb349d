//! A locally discovered file awaiting verification/upload (spec.md §3, `LocalFile`).

use std::path::PathBuf;
use std::time::SystemTime;

/// Identifier for a [`LocalFile`] within its owning folder scan.
///
/// Stable for the lifetime of one pipeline run; not persisted across runs
/// (folder discovery itself is an external collaborator, spec.md §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalFileId {
    pub folder_id: u64,
    pub file_index: u64,
}

impl std::fmt::Display for LocalFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.folder_id, self.file_index)
    }
}

/// A file found on disk inside a dataset folder, immutable after discovery
/// (spec.md §3).
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub id: LocalFileId,
    /// Absolute path to the file on disk.
    pub path: PathBuf,
    /// Size in bytes at discovery time.
    pub size: u64,
    /// Creation time as reported by the filesystem, used as upload metadata.
    pub created_time: SystemTime,
    /// Directory relative to the dataset root (empty string for top level).
    pub relative_directory: String,
}

impl LocalFile {
    /// The filename component of [`LocalFile::path`]. Empty if `path` has
    /// no filename component, which cannot happen for paths produced by
    /// folder discovery (always files, never `..`/`/`).
    #[must_use]
    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display_format() {
        let id = LocalFileId {
            folder_id: 3,
            file_index: 12,
        };
        assert_eq!(id.to_string(), "3:12");
    }

    #[test]
    fn filename_extracts_basename() {
        let lf = LocalFile {
            id: LocalFileId {
                folder_id: 0,
                file_index: 0,
            },
            path: PathBuf::from("/data/folder/sub/scan.tif"),
            size: 1024,
            created_time: SystemTime::now(),
            relative_directory: "sub".to_string(),
        };
        assert_eq!(lf.filename(), "scan.tif");
    }
}
