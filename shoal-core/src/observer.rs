//! Per-instance diagnostics for picker stacks
//!
//! Pickers never log through process-wide state of their own. Each stack is
//! handed an observer at construction, so several torrents can run side by
//! side with separately labelled (or separately recorded) diagnostics.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::picker::ValidationError;
use crate::torrent::{PeerId, PieceIndex};

/// Which streaming window an attempt targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPriority {
    High,
    Low,
}

/// Notable picker state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickerEvent {
    /// Blocks handed out to a peer, starting at `first_piece`
    RequestsIssued {
        peer: PeerId,
        first_piece: PieceIndex,
        blocks: usize,
    },
    /// Incoming block that did not match an outstanding request
    ValidationRejected {
        peer: PeerId,
        error: ValidationError,
    },
    /// Every block of a piece arrived
    PieceCompleted { peer: PeerId, piece_index: PieceIndex },
    /// Outstanding blocks released on behalf of a peer
    RequestsCancelled { peer: PeerId, blocks: usize },
    /// Streaming pick attempted the inclusive window `[start, end]`
    WindowAttempted {
        priority: WindowPriority,
        start: u32,
        end: u32,
    },
    /// Playback position moved to a new high-priority piece
    HighPriorityMoved { from: u32, to: u32 },
}

/// Sink for picker diagnostics.
pub trait PickerObserver: Send + Sync {
    fn on_event(&self, event: &PickerEvent);
}

/// Forwards events to `tracing`, tagged with an instance label.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    /// Creates observer whose events carry `label`, e.g. a torrent name.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Creates a shared observer ready to hand to a picker stack.
    pub fn shared(label: impl Into<String>) -> Arc<dyn PickerObserver> {
        Arc::new(Self::new(label))
    }
}

impl PickerObserver for TracingObserver {
    fn on_event(&self, event: &PickerEvent) {
        let label = self.label.as_str();
        match event {
            PickerEvent::RequestsIssued {
                peer,
                first_piece,
                blocks,
            } => {
                tracing::trace!(label, %peer, %first_piece, blocks, "requests issued");
            }
            PickerEvent::ValidationRejected { peer, error } => {
                tracing::debug!(label, %peer, %error, "block rejected");
            }
            PickerEvent::PieceCompleted { peer, piece_index } => {
                tracing::debug!(label, %peer, %piece_index, "piece completed");
            }
            PickerEvent::RequestsCancelled { peer, blocks } => {
                tracing::debug!(label, %peer, blocks, "requests cancelled");
            }
            PickerEvent::WindowAttempted {
                priority,
                start,
                end,
            } => {
                tracing::trace!(label, ?priority, start, end, "streaming window attempted");
            }
            PickerEvent::HighPriorityMoved { from, to } => {
                tracing::debug!(label, from, to, "high priority piece moved");
            }
        }
    }
}

/// Buffers every event in memory, for assertions in tests and simulations.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PickerEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of events recorded so far.
    pub fn events(&self) -> Vec<PickerEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns recorded events.
    pub fn drain(&self) -> Vec<PickerEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl PickerObserver for RecordingObserver {
    fn on_event(&self, event: &PickerEvent) {
        self.events.lock().push(event.clone());
    }
}
