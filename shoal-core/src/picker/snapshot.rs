//! Fast-resume snapshots of the active request set

use serde::{Deserialize, Serialize};

use super::{PickerError, PiecePicker};
use crate::torrent::{BitField, Piece, TorrentLayout};

/// In-flight pieces of a picker stack, stamped with the geometry they were
/// taken under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub piece_length: u32,
    pub total_size: u64,
    pub pieces: Vec<Piece>,
}

impl RequestSnapshot {
    /// Captures the active request set of `picker`.
    pub fn capture(picker: &dyn PiecePicker, layout: &TorrentLayout) -> Self {
        Self {
            piece_length: layout.piece_length(),
            total_size: layout.total_size(),
            pieces: picker.export_active_requests(),
        }
    }

    /// # Errors
    /// - `PickerError::Serialization` - JSON encoding failed
    pub fn to_json(&self) -> Result<String, PickerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// # Errors
    /// - `PickerError::Serialization` - Input is not a valid snapshot document
    pub fn from_json(json: &str) -> Result<Self, PickerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Re-initialises `picker` from this snapshot.
    ///
    /// # Errors
    /// - `PickerError::InvalidSnapshot` - Snapshot was taken under a different
    ///   geometry, or a piece does not fit `layout`
    pub fn restore(
        self,
        picker: &mut dyn PiecePicker,
        own_pieces: &BitField,
        layout: &TorrentLayout,
    ) -> Result<(), PickerError> {
        if self.piece_length != layout.piece_length() || self.total_size != layout.total_size() {
            return Err(PickerError::InvalidSnapshot {
                reason: format!(
                    "snapshot geometry {}x{} does not match layout {}x{}",
                    self.piece_length,
                    self.total_size,
                    layout.piece_length(),
                    layout.total_size()
                ),
            });
        }
        tracing::debug!(pieces = self.pieces.len(), "restoring request snapshot");
        picker.initialise(own_pieces, layout, self.pieces)
    }
}
