//! Configuration loading: TOML file merged with CLI flags and environment
//! variables (SPEC_FULL.md §2 component I, spec.md §6 "Configuration
//! inputs").
//!
//! Precedence, highest first: CLI flag > environment variable > config
//! file > built-in default. Mirrors the teacher crate's config/CLI merge
//! layering in `app/config_manager.rs`, adapted from its hand-rolled
//! line parser to `serde`/`toml` since every other wire format in this
//! crate already goes through `serde`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::RunOptions;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("missing required setting: {0}")]
    MissingField(&'static str),
}

/// Raw, partially-populated settings as they appear in a TOML file
/// (spec.md §6: "Configuration inputs").
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    num_verification_workers: Option<usize>,
    num_upload_workers: Option<usize>,
    server_url: Option<String>,
    username: Option<String>,
    api_key: Option<String>,
    staging_host: Option<String>,
    staging_username: Option<String>,
    private_key_path: Option<PathBuf>,
    fake_digest: Option<String>,
}

/// Fully resolved configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct Config {
    pub num_verification_workers: usize,
    pub num_upload_workers: usize,
    pub server_url: String,
    pub username: String,
    pub api_key: String,
    pub staging_host: String,
    pub staging_username: String,
    pub private_key_path: PathBuf,
    pub fake_digest: Option<String>,
}

/// Builder-style overrides, one layer in the merge (spec.md §6).
///
/// CLI parsing lives in the binary crate (clap has no reason to be a
/// library dependency); the binary constructs one of these from parsed
/// args and passes it to [`Config::load`].
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub num_verification_workers: Option<usize>,
    pub num_upload_workers: Option<usize>,
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub api_key: Option<String>,
    pub staging_host: Option<String>,
    pub staging_username: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub fake_digest: Option<String>,
}

const DEFAULT_VERIFICATION_WORKERS: usize = 25;
const DEFAULT_UPLOAD_WORKERS: usize = 5;

impl Config {
    /// Loads `path` (if it exists) and layers `overrides` and the
    /// `DATASET_COURIER_*` environment variables on top, highest
    /// precedence last.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`]/[`ConfigError::Parse`] if `path` exists but
    /// cannot be read or parsed, [`ConfigError::MissingField`] if a
    /// required setting is still unset after all layers are applied.
    pub fn load(path: &Path, overrides: Overrides) -> Result<Self, ConfigError> {
        let file = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            FileConfig::default()
        };

        Self::merge(file, overrides)
    }

    fn merge(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let num_verification_workers = overrides
            .num_verification_workers
            .or(file.num_verification_workers)
            .unwrap_or(DEFAULT_VERIFICATION_WORKERS);
        let num_upload_workers = overrides
            .num_upload_workers
            .or(file.num_upload_workers)
            .unwrap_or(DEFAULT_UPLOAD_WORKERS);

        let server_url = overrides
            .server_url
            .or(file.server_url)
            .or_else(|| env_string("DATASET_COURIER_SERVER_URL"))
            .ok_or(ConfigError::MissingField("server_url"))?;
        let username = overrides
            .username
            .or(file.username)
            .or_else(|| env_string("DATASET_COURIER_USERNAME"))
            .ok_or(ConfigError::MissingField("username"))?;
        let api_key = overrides
            .api_key
            .or(file.api_key)
            .or_else(|| env_string("DATASET_COURIER_API_KEY"))
            .ok_or(ConfigError::MissingField("api_key"))?;
        let staging_host = overrides
            .staging_host
            .or(file.staging_host)
            .or_else(|| env_string("DATASET_COURIER_STAGING_HOST"))
            .ok_or(ConfigError::MissingField("staging_host"))?;
        let staging_username = overrides
            .staging_username
            .or(file.staging_username)
            .or_else(|| env_string("DATASET_COURIER_STAGING_USERNAME"))
            .ok_or(ConfigError::MissingField("staging_username"))?;
        let private_key_path = overrides
            .private_key_path
            .or(file.private_key_path)
            .or_else(|| env_string("DATASET_COURIER_PRIVATE_KEY_PATH").map(PathBuf::from))
            .ok_or(ConfigError::MissingField("private_key_path"))?;
        let fake_digest = overrides.fake_digest.or(file.fake_digest);

        Ok(Self {
            num_verification_workers,
            num_upload_workers,
            server_url,
            username,
            api_key,
            staging_host,
            staging_username,
            private_key_path,
            fake_digest,
        })
    }

    /// Splits this config into the pieces `Coordinator::start` needs.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            num_verification_workers: self.num_verification_workers,
            num_upload_workers: self.num_upload_workers,
            fake_digest: self.fake_digest.clone(),
            test_run: false,
        }
    }

    #[must_use]
    pub fn credentials(&self) -> crate::credentials::Credentials {
        crate::credentials::Credentials {
            username: self.username.clone(),
            api_key: self.api_key.clone(),
            staging_host: self.staging_host.clone(),
            staging_username: self.staging_username.clone(),
            private_key_path: self.private_key_path.clone(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn full_overrides() -> Overrides {
        Overrides {
            server_url: Some("https://example.org".into()),
            username: Some("alice".into()),
            api_key: Some("key".into()),
            staging_host: Some("staging.example.org".into()),
            staging_username: Some("mydata".into()),
            private_key_path: Some(PathBuf::from("/home/alice/.ssh/id_rsa")),
            ..Default::default()
        }
    }

    #[test]
    fn merge_applies_worker_defaults_when_unset() {
        let config = Config::merge(FileConfig::default(), full_overrides()).unwrap();
        assert_eq!(config.num_verification_workers, DEFAULT_VERIFICATION_WORKERS);
        assert_eq!(config.num_upload_workers, DEFAULT_UPLOAD_WORKERS);
    }

    #[test]
    fn overrides_win_over_file_values() {
        let file = FileConfig {
            num_verification_workers: Some(10),
            server_url: Some("https://file.example.org".into()),
            ..Default::default()
        };
        let mut overrides = full_overrides();
        overrides.num_verification_workers = Some(50);

        let config = Config::merge(file, overrides).unwrap();
        assert_eq!(config.num_verification_workers, 50);
        assert_eq!(config.server_url, "https://example.org");
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let result = Config::merge(FileConfig::default(), Overrides::default());
        assert!(matches!(result, Err(ConfigError::MissingField("server_url"))));
    }

    #[test]
    fn load_missing_file_falls_back_to_overrides() {
        let config = Config::load(Path::new("/nonexistent/config.toml"), full_overrides()).unwrap();
        assert_eq!(config.username, "alice");
    }
}
