//! Dataset Courier Core Library
//!
//! Core verification-and-upload engine that mirrors locally organized
//! dataset folders into a remote scientific-data repository: for each
//! local file it determines whether a server-side record already exists,
//! whether that record has a verified complete replica, and creates the
//! record and transfers the bytes when necessary.
//!
//! # Architecture
//!
//! - [`model`] - Shared data model: local files, server records, status
//! - [`catalog`] - HTTP client for the server's record catalog
//! - [`transport`] - Staging (SSH) and POST (multipart) file transports
//! - [`digest`] - Streamed, cancellable content digest
//! - [`mime`] - Per-worker MIME type resolution
//! - [`cancel`] - Shared cancellation flag
//! - [`credentials`] - Read-only process-wide authentication material
//! - [`events`] - Published events for external observers
//! - [`progress`] - Per-file status and progress bus
//! - [`pipeline`] - Worker pools and coordinator tying the above together
//! - [`config`] - Configuration loading (file, CLI, environment)

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod events;
pub mod mime;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod transport;

pub use cancel::CancelToken;
pub use catalog::{CatalogClient, CatalogError, StagingApproval};
pub use config::{Config, ConfigError};
pub use credentials::Credentials;
pub use digest::{DigestError, DigestOutcome, digest};
pub use events::{ConnectionState, EventBus, PipelineEvent, RunOutcome, Severity};
pub use mime::MimeResolver;
pub use model::{DatasetRef, FileRecord, ItemStatus, LocalFile, LocalFileId, NewFileRecord, Replica};
pub use pipeline::{Coordinator, CoordinatorError, RunOptions, TransferMode, UploadTask, VerificationTask};
pub use progress::{StatusBus, StatusRow};
pub use transport::{PostTransport, StagingTransport, TransferOutcome, TransportError};
