//! Base strategy owning the active request set.
//!
//! Selection tries, in order: continuing a piece this peer started, the
//! peer's allowed-fast pieces (the only option while it chokes us), rescuing
//! an abandoned piece, the peer's suggested pieces, and finally a fresh run
//! of consecutive pieces found by a first-fit scan of the availability bits.

use std::sync::Arc;

use super::active_requests::ActiveRequests;
use super::{PickResult, PickerError, PiecePicker, Validated, ValidationError};
use crate::config::StandardConfig;
use crate::observer::{PickerEvent, PickerObserver};
use crate::torrent::{
    BLOCK_SIZE, BitField, PeerId, PeerView, Piece, PieceIndex, PieceRequest, Priority,
    TorrentLayout,
};

/// Which in-flight pieces a continuation may extend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    /// Pieces this peer started that were never abandoned
    Owned,
    /// Pieces whose earlier owner cancelled before completion
    Abandoned,
    /// Any piece with an unrequested block
    Any,
}

/// Piece list on the peer that selection may consume from.
#[derive(Debug, Clone, Copy)]
enum PeerList {
    AllowedFast,
    Suggested,
}

/// Innermost picker: the sole owner of in-flight request state.
pub struct StandardPicker {
    config: StandardConfig,
    layout: Option<TorrentLayout>,
    active: ActiveRequests,
    observer: Arc<dyn PickerObserver>,
}

impl StandardPicker {
    /// Creates an empty picker; [`PiecePicker::initialise`] must run before
    /// anything can be picked.
    pub fn new(config: StandardConfig, observer: Arc<dyn PickerObserver>) -> Self {
        Self {
            config,
            layout: None,
            active: ActiveRequests::default(),
            observer,
        }
    }

    /// Whether any block of `index` is currently in flight.
    pub fn already_requested(&self, index: PieceIndex) -> bool {
        self.active.position(index).is_some()
    }

    fn continue_existing(
        &mut self,
        peer: &dyn PeerView,
        start: u32,
        end: u32,
        continuation: Continuation,
    ) -> Option<PieceRequest> {
        let peer_id = peer.peer_id();
        for piece in self.active.iter_mut_from(start) {
            let index = piece.index().as_u32();
            if index > end {
                break;
            }
            if piece.all_blocks_requested() || !peer.bitfield().get(index) {
                continue;
            }

            let eligible = match continuation {
                Continuation::Owned => !piece.abandoned() && piece.owner() == Some(peer_id),
                Continuation::Abandoned => piece.abandoned(),
                Continuation::Any => true,
            };
            if eligible {
                if let Some(request) = piece.request_next_block(peer_id) {
                    return Some(request);
                }
            }
        }
        None
    }

    /// Starts a new piece from one of the peer's allowed-fast or suggested
    /// pieces, consuming the list entry it uses.
    fn request_from_list(
        &mut self,
        peer: &mut dyn PeerView,
        available: &BitField,
        start: u32,
        end: u32,
        list: PeerList,
    ) -> Option<PieceRequest> {
        if !peer.supports_fast_peer() || !self.config.fast_peer_enabled {
            return None;
        }
        let layout = self.layout.as_ref()?;

        let active = &self.active;
        let mut eligible = |index: PieceIndex| {
            let raw = index.as_u32();
            (start..=end).contains(&raw)
                && raw < layout.piece_count()
                && available.get(raw)
                && !active.contains(raw)
        };
        let index = match list {
            PeerList::AllowedFast => peer.take_allowed_fast(&mut eligible),
            PeerList::Suggested => peer.take_suggested(&mut eligible),
        }?;

        let mut piece = Piece::new(index, layout);
        let request = piece.request_next_block(peer.peer_id());
        self.active.insert(piece);
        tracing::trace!(piece = %index, ?list, "starting piece from peer list");
        request
    }

    /// First-fit search for a run of consecutive requestable pieces.
    ///
    /// Scans `available` within the inclusive range for runs of set bits that
    /// are not already in flight. Returns the start of the first run at least
    /// `pieces_needed` long together with `pieces_needed`; failing that, the
    /// longest run seen and its length.
    fn find_request_run(
        &self,
        available: &BitField,
        start: u32,
        end: u32,
        pieces_needed: u32,
    ) -> Option<(u32, u32)> {
        let limit = end.saturating_add(1).min(available.len());
        let mut cursor = start;
        let mut largest = (0, 0);

        while let Some(run_start) = available.first_true(cursor, limit) {
            let mut run_end = available.first_false(run_start, limit).unwrap_or(limit);
            if let Some(requested) = (run_start..run_end).find(|index| self.active.contains(*index))
            {
                run_end = requested;
            }

            let run_length = run_end - run_start;
            if run_length >= pieces_needed {
                return Some((run_start, pieces_needed));
            }
            if run_length > largest.1 {
                largest = (run_start, run_length);
            }
            cursor = (run_start + 1).max(run_end);
        }

        (largest.1 > 0).then_some(largest)
    }

    /// Starts consecutive new pieces and requests up to `count` blocks.
    fn standard_request(
        &mut self,
        peer: &dyn PeerView,
        available: &BitField,
        count: usize,
        start: u32,
        end: u32,
    ) -> Option<Vec<PieceRequest>> {
        let layout = self.layout.as_ref()?;
        let end = end.min(layout.piece_count().saturating_sub(1));
        if start > end {
            return None;
        }

        // Never ask for more blocks than the range holds.
        let piece_length = u64::from(layout.piece_length());
        let reachable = u64::from(end - start + 1) * (piece_length / u64::from(BLOCK_SIZE));
        let count = usize::try_from(reachable).map_or(count, |reachable| count.min(reachable));
        let wanted_bytes = count as u64 * u64::from(BLOCK_SIZE);
        let pieces_needed = u32::try_from(wanted_bytes.div_ceil(piece_length))
            .unwrap_or(u32::MAX)
            .max(1);

        let (run_start, run_length) = self.find_request_run(available, start, end, pieces_needed)?;

        let peer_id = peer.peer_id();
        let mut bundle = Vec::with_capacity(count);
        for index in run_start..run_start + run_length {
            if bundle.len() >= count {
                break;
            }
            let mut piece = Piece::new(PieceIndex::new(index), layout);
            bundle.extend(piece.request_blocks(peer_id, count - bundle.len()));
            self.active.insert(piece);
        }
        Some(bundle)
    }

    fn record_issued(&self, peer: PeerId, result: PickResult) -> PickResult {
        if let PickResult::Requests(requests) = &result {
            if let Some(first) = requests.first() {
                self.observer.on_event(&PickerEvent::RequestsIssued {
                    peer,
                    first_piece: first.piece_index,
                    blocks: requests.len(),
                });
            }
        }
        result
    }

    /// Cancels every unreceived block `peer` owns, then drops pieces left
    /// without requests.
    fn cancel_owned(&mut self, peer: PeerId) -> usize {
        let cancelled: usize = self
            .active
            .iter_mut()
            .map(|piece| piece.cancel_where(|block| block.requested_off() == Some(peer)))
            .sum();
        if cancelled > 0 {
            self.active.retain_requested();
            self.observer.on_event(&PickerEvent::RequestsCancelled {
                peer,
                blocks: cancelled,
            });
        }
        cancelled
    }
}

impl PiecePicker for StandardPicker {
    fn initialise(
        &mut self,
        own_pieces: &BitField,
        layout: &TorrentLayout,
        requests: Vec<Piece>,
    ) -> Result<(), PickerError> {
        let piece_count = layout.piece_count();
        let mut resumed = Vec::with_capacity(requests.len());
        for piece in requests {
            let index = piece.index().as_u32();
            if index >= piece_count || !piece.fits_layout(layout) {
                return Err(PickerError::InvalidSnapshot {
                    reason: format!("piece {index} does not match the torrent layout"),
                });
            }
            if own_pieces.get(index) || piece.all_blocks_received() || piece.total_requested() == 0
            {
                tracing::debug!(piece = index, "dropping settled piece from snapshot");
                continue;
            }
            resumed.push(piece);
        }

        let active = ActiveRequests::from_pieces(resumed).map_err(|index| {
            PickerError::InvalidSnapshot {
                reason: format!("piece {index} appears more than once"),
            }
        })?;

        tracing::debug!(
            pieces = piece_count,
            resumed = active.len(),
            "standard picker initialised"
        );
        self.active = active;
        self.layout = Some(layout.clone());
        Ok(())
    }

    fn pick_piece(
        &mut self,
        peer: &mut dyn PeerView,
        available: &BitField,
        _other_peers: &[&dyn PeerView],
        count: usize,
        start: u32,
        end: u32,
    ) -> PickResult {
        if count == 0 {
            return PickResult::Deferred;
        }
        if self.layout.is_none() {
            tracing::warn!("pick_piece called before initialise");
            return PickResult::NoneAvailable;
        }
        let peer_id = peer.peer_id();

        if let Some(request) = self.continue_existing(&*peer, start, end, Continuation::Owned) {
            return self.record_issued(peer_id, PickResult::single(request));
        }

        if peer.is_choking() {
            let fast = self.request_from_list(peer, available, start, end, PeerList::AllowedFast);
            return match fast {
                Some(request) => self.record_issued(peer_id, PickResult::single(request)),
                None => PickResult::NoneAvailable,
            };
        }

        if peer.repeated_hash_fails() == 0 {
            if let Some(request) =
                self.continue_existing(&*peer, start, end, Continuation::Abandoned)
            {
                return self.record_issued(peer_id, PickResult::single(request));
            }
        }

        if let Some(request) =
            self.request_from_list(peer, available, start, end, PeerList::Suggested)
        {
            return self.record_issued(peer_id, PickResult::single(request));
        }

        let bundle = self.standard_request(&*peer, available, count, start, end);
        self.record_issued(peer_id, PickResult::from(bundle))
    }

    fn continue_existing_request(
        &mut self,
        peer: &dyn PeerView,
        start: u32,
        end: u32,
    ) -> Option<PieceRequest> {
        self.continue_existing(peer, start, end, Continuation::Owned)
    }

    fn continue_any_existing(
        &mut self,
        peer: &dyn PeerView,
        start: u32,
        end: u32,
    ) -> Option<PieceRequest> {
        // A peer that keeps sending corrupt data must not touch partially
        // downloaded pieces.
        if peer.repeated_hash_fails() > 0 {
            return None;
        }
        self.continue_existing(peer, start, end, Continuation::Any)
    }

    fn cancel_request(&mut self, peer: PeerId, piece_index: PieceIndex, offset: u32, length: u32) {
        let Some(position) = self.active.position(piece_index) else {
            return;
        };
        let piece = self.active.get_mut(position);
        let cancelled = piece.cancel_where(|block| {
            block.requested_off() == Some(peer) && block.matches(offset, length)
        });
        if cancelled == 0 {
            return;
        }
        if piece.total_requested() == 0 {
            self.active.remove(position);
        }
        self.observer.on_event(&PickerEvent::RequestsCancelled {
            peer,
            blocks: cancelled,
        });
    }

    fn cancel_requests(&mut self, peer: PeerId) {
        self.cancel_owned(peer);
    }

    fn cancel_requests_in_range(
        &mut self,
        _peer: PeerId,
        _start: u32,
        _end: u32,
    ) -> Result<usize, PickerError> {
        Err(PickerError::Unsupported {
            operation: "cancel_requests_in_range",
        })
    }

    fn validate_piece(
        &mut self,
        peer: &mut dyn PeerView,
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Validated, ValidationError> {
        let peer_id = peer.peer_id();
        let outcome = self.validate_block(peer_id, piece_index, offset, length);
        match &outcome {
            Ok(validated) => {
                peer.request_completed();
                if let Some(piece) = &validated.completed {
                    self.observer.on_event(&PickerEvent::PieceCompleted {
                        peer: peer_id,
                        piece_index: piece.index(),
                    });
                }
            }
            Err(error) => {
                self.observer.on_event(&PickerEvent::ValidationRejected {
                    peer: peer_id,
                    error: error.clone(),
                });
            }
        }
        outcome
    }

    fn is_interesting(&self, bitfield: &BitField) -> bool {
        !bitfield.all_false()
    }

    fn current_request_count(&self) -> usize {
        self.active.iter().map(Piece::outstanding).sum()
    }

    fn current_received_count(&self) -> usize {
        self.active.iter().map(Piece::total_received).sum()
    }

    fn export_active_requests(&self) -> Vec<Piece> {
        self.active.to_vec()
    }

    fn reset(&mut self) {
        self.active.clear();
    }

    fn abort_requests(&mut self, peer: PeerId) -> usize {
        self.cancel_owned(peer)
    }

    fn request_rejected(&mut self, peer: PeerId, request: &PieceRequest) {
        self.cancel_request(peer, request.piece_index, request.offset, request.length);
    }

    fn set_file_priority(&mut self, _file_index: usize, _priority: Priority) {}
}

impl StandardPicker {
    fn validate_block(
        &mut self,
        peer: PeerId,
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    ) -> Result<Validated, ValidationError> {
        let position = self
            .active
            .position(piece_index)
            .ok_or(ValidationError::NoPiece { piece_index })?;
        let piece = self.active.get_mut(position);

        let no_block = ValidationError::NoBlock {
            piece_index,
            offset,
            length,
        };
        let block = piece.block_mut(offset, length).ok_or(no_block.clone())?;
        if block.requested_off().is_some_and(|owner| owner != peer) {
            return Err(no_block);
        }
        if block.received() {
            return Err(ValidationError::AlreadyReceived {
                piece_index,
                offset,
            });
        }
        if !block.requested() {
            return Err(ValidationError::NotRequested {
                piece_index,
                offset,
            });
        }

        block.mark_received();
        if piece.all_blocks_received() {
            let piece = self.active.remove(position);
            return Ok(Validated {
                completed: Some(piece),
            });
        }
        Ok(Validated { completed: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;
    use crate::torrent::PeerState;

    const PIECE: u32 = BLOCK_SIZE * 4;

    fn layout(piece_length: u32, pieces: u32) -> TorrentLayout {
        let total_size = u64::from(piece_length) * u64::from(pieces);
        TorrentLayout::single_file("data.bin", piece_length, total_size).unwrap()
    }

    fn picker(layout: &TorrentLayout) -> (StandardPicker, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let mut picker = StandardPicker::new(StandardConfig::default(), observer.clone());
        picker
            .initialise(&BitField::new(layout.piece_count()), layout, Vec::new())
            .unwrap();
        (picker, observer)
    }

    fn seeder(seed: u8, pieces: u32) -> PeerState {
        PeerState::new(PeerId::from_seed(seed), BitField::full(pieces))
    }

    fn pick(picker: &mut StandardPicker, peer: &mut PeerState, count: usize) -> PickResult {
        let available = peer.bitfield().clone();
        picker.pick_piece(peer, &available, &[], count, 0, available.len() - 1)
    }

    fn indices(result: PickResult) -> Vec<u32> {
        result
            .into_requests()
            .iter()
            .map(|request| request.piece_index.as_u32())
            .collect()
    }

    #[test]
    fn test_find_request_run_first_fit_then_largest() {
        let layout = layout(BLOCK_SIZE, 16);
        let (picker, _) = picker(&layout);
        let available = BitField::from_indices(16, [2, 3, 4, 7, 8, 9, 10]);

        assert_eq!(picker.find_request_run(&available, 0, 15, 3), Some((2, 3)));
        assert_eq!(picker.find_request_run(&available, 0, 15, 5), Some((7, 4)));
        assert_eq!(picker.find_request_run(&available, 5, 6, 1), None);
    }

    #[test]
    fn test_standard_request_takes_consecutive_pieces() {
        let layout = layout(BLOCK_SIZE, 16);
        let (mut picker, _) = picker(&layout);
        let mut peer = PeerState::new(
            PeerId::from_seed(1),
            BitField::from_indices(16, [2, 3, 4, 7, 8, 9, 10]),
        );

        assert_eq!(indices(pick(&mut picker, &mut peer, 3)), vec![2, 3, 4]);
        assert_eq!(indices(pick(&mut picker, &mut peer, 5)), vec![7, 8, 9, 10]);
        assert_eq!(pick(&mut picker, &mut peer, 1), PickResult::NoneAvailable);
        assert_eq!(picker.current_request_count(), 7);
    }

    #[test]
    fn test_in_flight_piece_truncates_run() {
        let layout = layout(BLOCK_SIZE, 8);
        let (mut picker, _) = picker(&layout);
        let mut first = seeder(1, 8);
        let mut second = seeder(2, 8);

        assert_eq!(indices(pick(&mut picker, &mut first, 1)), vec![0]);
        let available = BitField::full(8);
        assert_eq!(picker.find_request_run(&available, 0, 7, 3), Some((1, 3)));
        assert_eq!(indices(pick(&mut picker, &mut second, 2)), vec![1, 2]);
    }

    #[test]
    fn test_zero_count_is_deferred() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 4);
        assert_eq!(pick(&mut picker, &mut peer, 0), PickResult::Deferred);
        assert_eq!(picker.current_request_count(), 0);
    }

    #[test]
    fn test_uninitialised_picker_has_nothing() {
        let mut picker = StandardPicker::new(
            StandardConfig::default(),
            Arc::new(RecordingObserver::new()),
        );
        let mut peer = seeder(1, 4);
        assert_eq!(pick(&mut picker, &mut peer, 2), PickResult::NoneAvailable);
    }

    #[test]
    fn test_owner_continues_its_piece_first() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 4);

        let first = pick(&mut picker, &mut peer, 1).into_requests();
        let second = pick(&mut picker, &mut peer, 1).into_requests();
        assert_eq!(first[0].piece_index, PieceIndex::new(0));
        assert_eq!(second[0].piece_index, PieceIndex::new(0));
        assert_eq!(second[0].offset, BLOCK_SIZE);
    }

    #[test]
    fn test_choking_peer_only_serves_allowed_fast() {
        let layout = layout(PIECE, 8);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 8).with_fast_peer(true).with_choking(true);

        assert_eq!(pick(&mut picker, &mut peer, 4), PickResult::NoneAvailable);

        peer.add_allowed_fast(PieceIndex::new(5));
        let requests = pick(&mut picker, &mut peer, 4).into_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].piece_index, PieceIndex::new(5));
        assert!(peer.allowed_fast().is_empty());
        assert!(picker.already_requested(PieceIndex::new(5)));
    }

    #[test]
    fn test_allowed_fast_needs_engine_support() {
        let layout = layout(PIECE, 8);
        let observer = Arc::new(RecordingObserver::new());
        let mut picker = StandardPicker::new(
            StandardConfig {
                fast_peer_enabled: false,
            },
            observer,
        );
        picker
            .initialise(&BitField::new(8), &layout, Vec::new())
            .unwrap();
        let mut peer = seeder(1, 8).with_fast_peer(true).with_choking(true);
        peer.add_allowed_fast(PieceIndex::new(5));

        assert_eq!(pick(&mut picker, &mut peer, 4), PickResult::NoneAvailable);
        assert_eq!(peer.allowed_fast(), &[PieceIndex::new(5)]);
    }

    #[test]
    fn test_suggested_piece_preferred_over_scan() {
        let layout = layout(PIECE, 8);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 8).with_fast_peer(true);
        peer.add_suggested(PieceIndex::new(6));

        assert_eq!(indices(pick(&mut picker, &mut peer, 4)), vec![6]);
        assert!(peer.suggested().is_empty());
    }

    #[test]
    fn test_abandoned_piece_rescued_unless_hash_failures() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut first = seeder(1, 4);
        let mut second = seeder(2, 4);
        let mut tainted = seeder(3, 4);
        tainted.record_hash_failure();

        let issued = pick(&mut picker, &mut first, 2).into_requests();
        assert_eq!(issued.len(), 2);
        picker
            .validate_piece(&mut first, issued[0].piece_index, issued[0].offset, BLOCK_SIZE)
            .unwrap();
        assert_eq!(picker.abort_requests(first.peer_id()), 1);
        assert_eq!(picker.current_request_count(), 0);
        assert!(picker.export_active_requests()[0].abandoned());

        // A peer with hash failures never touches the partial piece.
        assert_eq!(indices(pick(&mut picker, &mut tainted, 1)), vec![1]);

        let rescued = pick(&mut picker, &mut second, 1).into_requests();
        assert_eq!(rescued[0].piece_index, PieceIndex::new(0));
        assert_eq!(rescued[0].offset, BLOCK_SIZE);
    }

    #[test]
    fn test_cancelling_everything_retires_piece() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 4);

        let _ = pick(&mut picker, &mut peer, 2);
        assert_eq!(picker.abort_requests(peer.peer_id()), 2);
        assert!(picker.export_active_requests().is_empty());
        assert_eq!(indices(pick(&mut picker, &mut peer, 1)), vec![0]);
    }

    #[test]
    fn test_validation_failure_modes() {
        let layout = layout(PIECE, 4);
        let (mut picker, observer) = picker(&layout);
        let mut owner = seeder(1, 4);
        let mut stranger = seeder(2, 4);
        let requests = pick(&mut picker, &mut owner, 1).into_requests();
        let request = requests[0];
        observer.drain();

        assert_eq!(
            picker.validate_piece(&mut owner, PieceIndex::new(3), 0, BLOCK_SIZE),
            Err(ValidationError::NoPiece {
                piece_index: PieceIndex::new(3)
            })
        );
        assert!(matches!(
            picker.validate_piece(&mut owner, request.piece_index, 7, BLOCK_SIZE),
            Err(ValidationError::NoBlock { .. })
        ));
        assert!(matches!(
            picker.validate_piece(&mut stranger, request.piece_index, 0, BLOCK_SIZE),
            Err(ValidationError::NoBlock { .. })
        ));
        assert!(matches!(
            picker.validate_piece(&mut owner, request.piece_index, BLOCK_SIZE, BLOCK_SIZE),
            Err(ValidationError::NotRequested { .. })
        ));
        assert_eq!(picker.current_request_count(), 1);
        assert_eq!(picker.current_received_count(), 0);

        let validated = picker
            .validate_piece(&mut owner, request.piece_index, 0, BLOCK_SIZE)
            .unwrap();
        assert!(validated.completed.is_none());
        assert!(matches!(
            picker.validate_piece(&mut owner, request.piece_index, 0, BLOCK_SIZE),
            Err(ValidationError::AlreadyReceived { .. })
        ));

        let rejected = observer
            .events()
            .iter()
            .filter(|event| matches!(event, PickerEvent::ValidationRejected { .. }))
            .count();
        assert_eq!(rejected, 5);
    }

    #[test]
    fn test_completed_piece_leaves_active_set() {
        let layout = layout(PIECE, 2);
        let (mut picker, observer) = picker(&layout);
        let mut peer = seeder(1, 2);
        peer.record_requests_sent(4);

        let requests = pick(&mut picker, &mut peer, 4).into_requests();
        assert_eq!(requests.len(), 4);
        let mut completed = None;
        for request in &requests {
            let validated = picker
                .validate_piece(&mut peer, request.piece_index, request.offset, request.length)
                .unwrap();
            completed = completed.or(validated.completed);
        }

        let piece = completed.unwrap();
        assert_eq!(piece.index(), PieceIndex::new(0));
        assert!(piece.all_blocks_received());
        assert!(!picker.already_requested(PieceIndex::new(0)));
        assert_eq!(peer.requesting_count(), 0);
        assert!(observer.events().contains(&PickerEvent::PieceCompleted {
            peer: peer.peer_id(),
            piece_index: PieceIndex::new(0),
        }));
    }

    #[test]
    fn test_huge_block_count_limited_to_range() {
        let layout = layout(PIECE, 4);
        let (mut whole, _) = picker(&layout);
        let (mut partial, _) = picker(&layout);
        let mut peer = seeder(1, 4);

        let requests = pick(&mut whole, &mut peer, usize::MAX).into_requests();
        assert_eq!(requests.len(), 16);
        assert_eq!(whole.current_request_count(), 16);

        let available = BitField::full(4);
        let result = partial.pick_piece(&mut peer, &available, &[], 1 << 40, 1, 2);
        assert_eq!(indices(result), vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_reset_forgets_in_flight_pieces() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 4);

        assert!(pick(&mut picker, &mut peer, 3).is_requests());
        picker.reset();

        assert_eq!(picker.current_request_count(), 0);
        assert!(picker.export_active_requests().is_empty());
        assert_eq!(indices(pick(&mut picker, &mut peer, 1)), vec![0]);
    }

    #[test]
    fn test_cancel_request_is_idempotent() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 4);
        let request = pick(&mut picker, &mut peer, 1).into_requests()[0];

        picker.request_rejected(peer.peer_id(), &request);
        assert_eq!(picker.current_request_count(), 0);
        assert!(picker.export_active_requests().is_empty());

        picker.cancel_request(peer.peer_id(), request.piece_index, request.offset, request.length);
        picker.cancel_requests(peer.peer_id());
        assert_eq!(picker.abort_requests(peer.peer_id()), 0);
    }

    #[test]
    fn test_cancel_ignores_other_peers_blocks() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut owner = seeder(1, 4);
        let request = pick(&mut picker, &mut owner, 1).into_requests()[0];

        picker.cancel_request(
            PeerId::from_seed(9),
            request.piece_index,
            request.offset,
            request.length,
        );
        assert_eq!(picker.current_request_count(), 1);
    }

    #[test]
    fn test_ranged_cancel_is_unsupported() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        assert!(matches!(
            picker.cancel_requests_in_range(PeerId::from_seed(1), 0, 3),
            Err(PickerError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_initialise_drops_settled_pieces() {
        let layout = layout(PIECE, 4);
        let (mut source, _) = picker(&layout);
        let mut peer = seeder(1, 4);
        let _ = pick(&mut source, &mut peer, 8);
        let snapshot = source.export_active_requests();
        assert_eq!(snapshot.len(), 2);

        let (mut resumed, _) = picker(&layout);
        let own = BitField::from_indices(4, [1]);
        resumed
            .initialise(&own, &layout, snapshot.clone())
            .unwrap();
        let exported = resumed.export_active_requests();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].index(), PieceIndex::new(0));

        resumed.initialise(&own, &layout, snapshot).unwrap();
        assert_eq!(resumed.export_active_requests(), exported);
    }

    #[test]
    fn test_initialise_rejects_bad_snapshots() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut peer = seeder(1, 4);
        let _ = pick(&mut picker, &mut peer, 1);
        let piece = picker.export_active_requests().remove(0);

        let duplicate =
            picker.initialise(&BitField::new(4), &layout, vec![piece.clone(), piece.clone()]);
        assert!(matches!(duplicate, Err(PickerError::InvalidSnapshot { .. })));

        let smaller = TorrentLayout::single_file("data.bin", BLOCK_SIZE, u64::from(BLOCK_SIZE) * 4)
            .unwrap();
        let mismatched = picker.initialise(&BitField::new(4), &smaller, vec![piece]);
        assert!(matches!(mismatched, Err(PickerError::InvalidSnapshot { .. })));
    }

    #[test]
    fn test_continue_any_existing_refuses_hash_failures() {
        let layout = layout(PIECE, 4);
        let (mut picker, _) = picker(&layout);
        let mut owner = seeder(1, 4);
        let _ = pick(&mut picker, &mut owner, 1);

        let mut tainted = seeder(2, 4);
        tainted.record_hash_failure();
        assert_eq!(picker.continue_any_existing(&tainted, 0, 3), None);

        let helper = seeder(3, 4);
        let request = picker.continue_any_existing(&helper, 0, 3).unwrap();
        assert_eq!(request.piece_index, PieceIndex::new(0));
        assert_eq!(request.offset, BLOCK_SIZE);
        assert_eq!(picker.continue_existing_request(&helper, 0, 3), None);
    }
}
