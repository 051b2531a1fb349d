//! Published events for external observers (spec.md §6, §9).
//!
//! The original implementation posts `wx.CallAfter` events to a GUI thread;
//! spec.md §9 names that coupling as a redesign target. This module
//! replaces it with a plain `tokio::sync::broadcast` channel that any
//! number of observers can subscribe to, without any worker ever holding a
//! lock while it publishes (spec.md §5).

use tokio::sync::broadcast;

use crate::model::{ItemStatus, LocalFileId};

/// Connectivity state reported for the catalog server (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Severity of a [`PipelineEvent::ShowMessage`] (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Terminal outcome of a whole pipeline run, carried by
/// [`PipelineEvent::UploadsComplete`] (spec.md §4.G, §8 property 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,
    Canceled,
}

/// An event published to external observers (spec.md §6).
///
/// `StatusChanged` folds in the Progress & Status Bus's per-row
/// notifications (spec.md §4.H) so observers have a single subscription
/// point instead of one channel per concern.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ConnectionStatus {
        url: String,
        state: ConnectionState,
    },
    UploadsComplete(RunOutcome),
    ShowMessage {
        title: String,
        message: String,
        severity: Severity,
    },
    StatusChanged {
        file_id: LocalFileId,
        status: ItemStatus,
        message: String,
        progress: u8,
    },
}

/// Default channel capacity. Slow observers that fall behind this many
/// events lag (and miss the oldest ones via
/// [`broadcast::error::RecvError::Lagged`]) rather than backpressuring
/// workers, matching the "never block the writer" requirement.
const DEFAULT_CAPACITY: usize = 1024;

/// A cheap, `Clone`-able handle to the pipeline's event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to future events. Events published before this call are
    /// not replayed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. A send with no subscribers is not an error: it
    /// simply means nobody is currently listening.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
