//! Peer capabilities as seen by the piece pickers

use super::{BitField, PeerId, PieceIndex};

/// What a picker may read from, and consume on, a remote peer.
///
/// The allowed-fast and suggested lists have consume-on-match semantics: the
/// picker hands in a predicate, and the first entry it accepts is removed from
/// the peer's list and returned. Everything else is read-only to the picker,
/// except the in-flight counter which shrinks when a block validates.
pub trait PeerView {
    fn peer_id(&self) -> PeerId;

    /// Pieces the peer advertises as held.
    fn bitfield(&self) -> &BitField;

    /// Whether the peer is choking us.
    fn is_choking(&self) -> bool;

    /// Whether the peer negotiated the fast extension.
    fn supports_fast_peer(&self) -> bool;

    /// Count of pieces from this peer that repeatedly failed hash checks.
    fn repeated_hash_fails(&self) -> u32;

    /// Number of block requests we currently have outstanding with the peer.
    fn requesting_count(&self) -> u32;

    fn allowed_fast(&self) -> &[PieceIndex];

    fn suggested(&self) -> &[PieceIndex];

    /// Removes and returns the first allowed-fast piece `eligible` accepts.
    fn take_allowed_fast(
        &mut self,
        eligible: &mut dyn FnMut(PieceIndex) -> bool,
    ) -> Option<PieceIndex>;

    /// Removes and returns the first suggested piece `eligible` accepts.
    fn take_suggested(&mut self, eligible: &mut dyn FnMut(PieceIndex) -> bool)
    -> Option<PieceIndex>;

    /// Records that one outstanding request was answered.
    fn request_completed(&mut self);
}

/// Plain in-memory peer state implementing [`PeerView`].
#[derive(Debug, Clone)]
pub struct PeerState {
    peer_id: PeerId,
    /// Bitfield representing pieces the peer has
    bitfield: BitField,
    /// Whether the peer is choking us (preventing downloads from them)
    choking: bool,
    supports_fast_peer: bool,
    allowed_fast: Vec<PieceIndex>,
    suggested: Vec<PieceIndex>,
    repeated_hash_fails: u32,
    /// Requests sent to this peer and not yet answered
    requesting_count: u32,
}

impl PeerState {
    /// Creates an unchoking peer without fast-extension support.
    pub fn new(peer_id: PeerId, bitfield: BitField) -> Self {
        Self {
            peer_id,
            bitfield,
            choking: false,
            supports_fast_peer: false,
            allowed_fast: Vec::new(),
            suggested: Vec::new(),
            repeated_hash_fails: 0,
            requesting_count: 0,
        }
    }

    /// Sets whether the peer negotiated the fast extension.
    pub fn with_fast_peer(mut self, supported: bool) -> Self {
        self.supports_fast_peer = supported;
        self
    }

    /// Sets the initial choke state.
    pub fn with_choking(mut self, choking: bool) -> Self {
        self.choking = choking;
        self
    }

    pub fn set_choking(&mut self, choking: bool) {
        self.choking = choking;
    }

    /// Handles an allowed-fast message for `index`.
    pub fn add_allowed_fast(&mut self, index: PieceIndex) {
        if !self.allowed_fast.contains(&index) {
            self.allowed_fast.push(index);
        }
    }

    /// Handles a suggest-piece message for `index`.
    pub fn add_suggested(&mut self, index: PieceIndex) {
        if !self.suggested.contains(&index) {
            self.suggested.push(index);
        }
    }

    /// Handles a have message for `index`.
    pub fn mark_have(&mut self, index: PieceIndex) {
        self.bitfield.set(index.as_u32(), true);
    }

    /// Records a piece from this peer that failed its hash check.
    pub fn record_hash_failure(&mut self) {
        self.repeated_hash_fails += 1;
    }

    /// Records requests handed to the wire layer for this peer.
    pub fn record_requests_sent(&mut self, count: u32) {
        self.requesting_count += count;
    }

    /// Clears the in-flight counter after the peer's requests were withdrawn.
    pub fn clear_requests(&mut self) {
        self.requesting_count = 0;
    }
}

fn take_first(
    list: &mut Vec<PieceIndex>,
    eligible: &mut dyn FnMut(PieceIndex) -> bool,
) -> Option<PieceIndex> {
    let position = list.iter().position(|index| eligible(*index))?;
    Some(list.remove(position))
}

impl PeerView for PeerState {
    fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn bitfield(&self) -> &BitField {
        &self.bitfield
    }

    fn is_choking(&self) -> bool {
        self.choking
    }

    fn supports_fast_peer(&self) -> bool {
        self.supports_fast_peer
    }

    fn repeated_hash_fails(&self) -> u32 {
        self.repeated_hash_fails
    }

    fn requesting_count(&self) -> u32 {
        self.requesting_count
    }

    fn allowed_fast(&self) -> &[PieceIndex] {
        &self.allowed_fast
    }

    fn suggested(&self) -> &[PieceIndex] {
        &self.suggested
    }

    fn take_allowed_fast(
        &mut self,
        eligible: &mut dyn FnMut(PieceIndex) -> bool,
    ) -> Option<PieceIndex> {
        take_first(&mut self.allowed_fast, eligible)
    }

    fn take_suggested(
        &mut self,
        eligible: &mut dyn FnMut(PieceIndex) -> bool,
    ) -> Option<PieceIndex> {
        take_first(&mut self.suggested, eligible)
    }

    fn request_completed(&mut self) {
        self.requesting_count = self.requesting_count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_allowed_fast_consumes_first_match_only() {
        let mut peer = PeerState::new(PeerId::from_seed(1), BitField::new(16));
        peer.add_allowed_fast(PieceIndex::new(3));
        peer.add_allowed_fast(PieceIndex::new(8));
        peer.add_allowed_fast(PieceIndex::new(9));

        let taken = peer.take_allowed_fast(&mut |index| index.as_u32() > 5);
        assert_eq!(taken, Some(PieceIndex::new(8)));
        assert_eq!(
            peer.allowed_fast(),
            &[PieceIndex::new(3), PieceIndex::new(9)]
        );

        assert_eq!(peer.take_allowed_fast(&mut |_| false), None);
        assert_eq!(peer.allowed_fast().len(), 2);
    }

    #[test]
    fn test_duplicate_suggestions_ignored() {
        let mut peer = PeerState::new(PeerId::from_seed(2), BitField::new(4));
        peer.add_suggested(PieceIndex::new(1));
        peer.add_suggested(PieceIndex::new(1));
        assert_eq!(peer.suggested(), &[PieceIndex::new(1)]);
    }

    #[test]
    fn test_request_counter_never_underflows() {
        let mut peer = PeerState::new(PeerId::from_seed(3), BitField::new(4));
        peer.record_requests_sent(1);
        peer.request_completed();
        peer.request_completed();
        assert_eq!(peer.requesting_count(), 0);
    }
}
