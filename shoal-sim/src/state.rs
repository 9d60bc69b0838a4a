//! Observable state of a swarm run, as checked by invariants.

use std::collections::BTreeMap;

use shoal_core::torrent::{BitField, PeerId, Piece};

/// Outstanding blocks as the simulated engine tracks them, keyed by
/// `(piece, offset)`.
pub type RequestLedger = BTreeMap<(u32, u32), PeerId>;

/// What the harness knows after a step, plus what the picker reports.
#[derive(Debug, Clone)]
pub struct SimulationState {
    /// Step that produced this state
    pub step: u64,
    /// Pieces downloaded and verified
    pub own: BitField,
    /// Blocks the engine has sent requests for and not heard back about
    pub ledger: RequestLedger,
    /// Picker's exported active request set
    pub active: Vec<Piece>,
    /// Picker's `current_request_count`
    pub reported_requests: usize,
    /// Requests handed out for a block the ledger already had in flight
    pub double_allocations: usize,
    /// Validations whose outcome contradicted the ledger
    pub unexpected_validations: usize,
}

impl SimulationState {
    pub fn new(piece_count: u32) -> Self {
        Self {
            step: 0,
            own: BitField::new(piece_count),
            ledger: RequestLedger::new(),
            active: Vec::new(),
            reported_requests: 0,
            double_allocations: 0,
            unexpected_validations: 0,
        }
    }

    /// Records a block request issued to `peer`.
    pub fn record_issued(&mut self, piece: u32, offset: u32, peer: PeerId) {
        if self.ledger.insert((piece, offset), peer).is_some() {
            self.double_allocations += 1;
        }
    }

    /// Forgets every outstanding block of `peer`, returning how many there were.
    pub fn forget_peer(&mut self, peer: PeerId) -> usize {
        let before = self.ledger.len();
        self.ledger.retain(|_, owner| *owner != peer);
        before - self.ledger.len()
    }

    pub fn is_complete(&self) -> bool {
        self.own.all_true()
    }

    /// First piece not yet downloaded.
    pub fn first_missing(&self) -> Option<u32> {
        self.own.first_false(0, self.own.len())
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationMetrics {
    pub requests_issued: u64,
    pub blocks_received: u64,
    pub rejected_validations: u64,
    pub cancelled_blocks: u64,
    pub chokes: u64,
    pub disconnects: u64,
    /// Piece indices in completion order
    pub completed_pieces: Vec<u32>,
}
