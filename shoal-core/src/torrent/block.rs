//! Request accounting for blocks and the pieces they belong to.
//!
//! A block is the unit requested over the wire; a piece owns every block
//! covering its byte range. The `requested` flag, `received` flag and owning
//! peer of each block are the only request bookkeeping in the engine, so every
//! transition goes through the methods here.

use serde::{Deserialize, Serialize};

use super::{PeerId, PieceIndex, TorrentLayout};

/// Standard 16 KiB block size.
pub const BLOCK_SIZE: u32 = 16_384;

/// Single block request sent to a peer.
///
/// A plain value: the picker tracks the owning [`Block`], not the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceRequest {
    pub piece_index: PieceIndex,
    pub offset: u32,
    pub length: u32,
}

/// One requestable block of a piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    piece_index: PieceIndex,
    start_offset: u32,
    request_length: u32,
    requested: bool,
    received: bool,
    requested_off: Option<PeerId>,
}

impl Block {
    fn new(piece_index: PieceIndex, start_offset: u32, request_length: u32) -> Self {
        Self {
            piece_index,
            start_offset,
            request_length,
            requested: false,
            received: false,
            requested_off: None,
        }
    }

    /// Index of the piece this block belongs to.
    pub fn piece_index(&self) -> PieceIndex {
        self.piece_index
    }

    /// Byte offset within the piece.
    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Length in bytes; shorter than [`BLOCK_SIZE`] only at the end of the torrent.
    pub fn request_length(&self) -> u32 {
        self.request_length
    }

    pub fn requested(&self) -> bool {
        self.requested
    }

    pub fn received(&self) -> bool {
        self.received
    }

    /// Peer currently holding the request. Kept after receipt, cleared on cancel.
    pub fn requested_off(&self) -> Option<PeerId> {
        self.requested_off
    }

    /// The wire request matching this block.
    pub fn as_request(&self) -> PieceRequest {
        PieceRequest {
            piece_index: self.piece_index,
            offset: self.start_offset,
            length: self.request_length,
        }
    }

    /// Whether this block is described by the given offset and length.
    pub fn matches(&self, offset: u32, length: u32) -> bool {
        self.start_offset == offset && self.request_length == length
    }

    pub(crate) fn create_request(&mut self, peer: PeerId) -> PieceRequest {
        debug_assert!(!self.requested, "block requested twice without cancel");
        self.requested = true;
        self.requested_off = Some(peer);
        self.as_request()
    }

    pub(crate) fn cancel_request(&mut self) {
        self.requested = false;
        self.requested_off = None;
    }

    pub(crate) fn mark_received(&mut self) {
        debug_assert!(self.requested, "received block was never requested");
        self.received = true;
    }
}

/// All blocks covering one piece index, plus its abandonment state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    index: PieceIndex,
    blocks: Vec<Block>,
    abandoned: bool,
}

impl Piece {
    /// Creates a piece with every block unrequested.
    pub fn new(index: PieceIndex, layout: &TorrentLayout) -> Self {
        let piece_size = layout.piece_size(index.as_u32());
        let blocks = (0..piece_size.div_ceil(BLOCK_SIZE))
            .map(|block| {
                let start_offset = block * BLOCK_SIZE;
                let length = (piece_size - start_offset).min(BLOCK_SIZE);
                Block::new(index, start_offset, length)
            })
            .collect();

        Self {
            index,
            blocks,
            abandoned: false,
        }
    }

    pub fn index(&self) -> PieceIndex {
        self.index
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// True once any request for this piece was cancelled before completion.
    pub fn abandoned(&self) -> bool {
        self.abandoned
    }

    /// The peer that started this piece, i.e. the owner of its first block.
    pub fn owner(&self) -> Option<PeerId> {
        self.blocks.first().and_then(Block::requested_off)
    }

    /// Blocks marked requested, received ones included.
    pub fn total_requested(&self) -> usize {
        self.blocks.iter().filter(|block| block.requested).count()
    }

    pub fn total_received(&self) -> usize {
        self.blocks.iter().filter(|block| block.received).count()
    }

    /// Blocks requested and still awaiting data.
    pub fn outstanding(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| block.requested && !block.received)
            .count()
    }

    pub fn all_blocks_requested(&self) -> bool {
        self.blocks.iter().all(|block| block.requested)
    }

    pub fn all_blocks_received(&self) -> bool {
        self.blocks.iter().all(|block| block.received)
    }

    /// Whether the block layout agrees with what `layout` expects for this index.
    pub(crate) fn fits_layout(&self, layout: &TorrentLayout) -> bool {
        let expected = Piece::new(self.index, layout);
        self.blocks.len() == expected.blocks.len()
            && self
                .blocks
                .iter()
                .zip(&expected.blocks)
                .all(|(block, fresh)| {
                    block.piece_index == self.index
                        && block.matches(fresh.start_offset, fresh.request_length)
                        && (block.requested || !block.received)
                })
    }

    /// Requests the first block that is neither requested nor received.
    pub(crate) fn request_next_block(&mut self, peer: PeerId) -> Option<PieceRequest> {
        self.blocks
            .iter_mut()
            .find(|block| !block.requested && !block.received)
            .map(|block| block.create_request(peer))
    }

    /// Requests up to `limit` consecutive unrequested blocks for `peer`.
    pub(crate) fn request_blocks(&mut self, peer: PeerId, limit: usize) -> Vec<PieceRequest> {
        self.blocks
            .iter_mut()
            .filter(|block| !block.requested && !block.received)
            .take(limit)
            .map(|block| block.create_request(peer))
            .collect()
    }

    pub(crate) fn block_mut(&mut self, offset: u32, length: u32) -> Option<&mut Block> {
        self.blocks
            .iter_mut()
            .find(|block| block.matches(offset, length))
    }

    /// Cancels every unreceived block accepted by `predicate`, returning how
    /// many were cancelled. Marks the piece abandoned when any was.
    pub(crate) fn cancel_where(&mut self, mut predicate: impl FnMut(&Block) -> bool) -> usize {
        let mut cancelled = 0;
        for block in &mut self.blocks {
            if block.requested && !block.received && predicate(block) {
                block.cancel_request();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            self.abandoned = true;
        }
        cancelled
    }
}
