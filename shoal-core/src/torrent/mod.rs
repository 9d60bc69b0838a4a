//! Torrent-side primitives consumed by the piece pickers

pub mod bitfield;
pub mod block;
pub mod layout;
pub mod peer_state;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use bitfield::BitField;
pub use block::{BLOCK_SIZE, Block, Piece, PieceRequest};
pub use layout::{FileLayout, Priority, TorrentLayout};
pub use peer_state::{PeerState, PeerView};

/// Zero-based index of a piece within a torrent.
///
/// Torrent content is divided into pieces for downloading and verification.
/// Each piece has a sequential index starting from 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte identifier of a remote peer.
///
/// Used as the owner of outstanding block requests, so two requests are
/// attributed to the same peer only when their ids compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Creates a peer ID whose bytes are all `seed`, handy for simulations.
    pub fn from_seed(seed: u8) -> Self {
        Self([seed; 20])
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
