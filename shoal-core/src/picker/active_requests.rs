//! Sorted set of in-flight pieces

use crate::torrent::{Piece, PieceIndex};

/// In-flight pieces kept in strictly ascending piece-index order.
///
/// Every lookup is a binary search, so insertion is the only way in and it
/// keeps the order. A piece is present while at least one of its blocks is
/// requested and not all of them are received.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveRequests {
    pieces: Vec<Piece>,
}

impl ActiveRequests {
    /// Builds the set from unordered pieces.
    ///
    /// Returns the first duplicated index on failure.
    pub(crate) fn from_pieces(mut pieces: Vec<Piece>) -> Result<Self, PieceIndex> {
        pieces.sort_by_key(Piece::index);
        if let Some(pair) = pieces.windows(2).find(|pair| pair[0].index() == pair[1].index()) {
            return Err(pair[0].index());
        }
        Ok(Self { pieces })
    }

    pub(crate) fn position(&self, index: PieceIndex) -> Option<usize> {
        self.pieces
            .binary_search_by_key(&index, Piece::index)
            .ok()
    }

    pub(crate) fn contains(&self, index: u32) -> bool {
        self.position(PieceIndex::new(index)).is_some()
    }

    /// Adds a piece that is not yet active.
    pub(crate) fn insert(&mut self, piece: Piece) {
        match self.pieces.binary_search_by_key(&piece.index(), Piece::index) {
            Ok(_) => unreachable!("piece {} is already in flight", piece.index()),
            Err(position) => self.pieces.insert(position, piece),
        }
    }

    pub(crate) fn get_mut(&mut self, position: usize) -> &mut Piece {
        &mut self.pieces[position]
    }

    pub(crate) fn remove(&mut self, position: usize) -> Piece {
        self.pieces.remove(position)
    }

    /// Pieces whose index is at least `start`.
    pub(crate) fn iter_mut_from(&mut self, start: u32) -> impl Iterator<Item = &mut Piece> {
        let first = self
            .pieces
            .partition_point(|piece| piece.index().as_u32() < start);
        self.pieces[first..].iter_mut()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Piece> {
        self.pieces.iter_mut()
    }

    /// Drops pieces left with no requested block.
    pub(crate) fn retain_requested(&mut self) {
        self.pieces.retain(|piece| piece.total_requested() > 0);
    }

    pub(crate) fn clear(&mut self) {
        self.pieces.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.pieces.len()
    }

    pub(crate) fn to_vec(&self) -> Vec<Piece> {
        self.pieces.clone()
    }

    #[cfg(test)]
    pub(crate) fn is_sorted(&self) -> bool {
        self.pieces
            .windows(2)
            .all(|pair| pair[0].index() < pair[1].index())
    }
}
