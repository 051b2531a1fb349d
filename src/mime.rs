//! Deterministic MIME type resolution for uploaded files (spec.md §4.F
//! step 4, §9).
//!
//! The original implementation's process-wide MIME resolver was not safe
//! for concurrent use; the abstract requirement is "obtain a deterministic
//! mimetype string for a path" with a resolver each uploader owns
//! privately. `mime_guess`'s lookup is a pure function over the extension
//! table, but we still hand each uploader its own [`MimeResolver`] instance
//! rather than a single shared handle, so the worker pool never depends on
//! a resolver implementation happening to be internally synchronized.
use std::path::Path;

/// Fallback MIME type when no extension mapping exists.
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// A per-worker MIME type resolver (spec.md §4.F, §9).
#[derive(Debug, Default, Clone, Copy)]
pub struct MimeResolver;

impl MimeResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Guesses a MIME type string for `path` from its extension, falling
    /// back to `application/octet-stream` when unknown.
    #[must_use]
    pub fn guess(&self, path: &Path) -> String {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn guesses_known_extension() {
        let resolver = MimeResolver::new();
        assert_eq!(resolver.guess(&PathBuf::from("scan.tif")), "image/tiff");
    }

    #[test]
    fn falls_back_for_unknown_extension() {
        let resolver = MimeResolver::new();
        assert_eq!(
            resolver.guess(&PathBuf::from("data.unknownext")),
            DEFAULT_MIME_TYPE
        );
    }

    #[test]
    fn falls_back_for_no_extension() {
        let resolver = MimeResolver::new();
        assert_eq!(resolver.guess(&PathBuf::from("README")), DEFAULT_MIME_TYPE);
    }
}
