//! Core swarm simulation driving a picker stack.

use std::sync::Arc;

use shoal_core::config::PickerConfig;
use shoal_core::observer::TracingObserver;
use shoal_core::picker::{
    PickResult, PickerError, PiecePicker, StandardPicker, StandardStack, StreamingPicker,
    build_standard_stack, build_streaming_stack,
};
use shoal_core::torrent::{
    BitField, PeerId, PeerState, PeerView, PieceIndex, PieceRequest, TorrentLayout,
};
use thiserror::Error;

use crate::config::SimulationConfig;
use crate::invariants::{Invariant, InvariantViolation, default_invariants};
use crate::rng::DeterministicRng;
use crate::state::{SimulationMetrics, SimulationState};

/// Maximum number of invariant violations before stopping simulation.
const MAX_INVARIANT_VIOLATIONS: usize = 10;

/// Chance that a remote peer holds any given piece, seeders aside.
const PIECE_DENSITY: f64 = 0.6;

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Configuration cannot describe a runnable swarm
    #[error("Invalid simulation config: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected
        reason: String,
    },

    /// Picker stack refused an operation
    #[error("Picker error: {0}")]
    Picker(#[from] PickerError),

    /// Too many invariant violations occurred
    #[error("Too many invariant violations: {count}")]
    TooManyInvariantViolations {
        /// Number of violations that occurred
        count: usize,
    },

    /// Download did not finish within the configured step budget
    #[error("Step limit exceeded after {steps} steps with {missing} pieces missing")]
    StepLimitExceeded {
        /// Steps executed
        steps: u64,
        /// Pieces still missing
        missing: u32,
    },
}

/// Result of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Steps until the download completed
    pub steps: u64,
    pub piece_count: u32,
    /// Collected metrics
    pub metrics: SimulationMetrics,
    pub violations: Vec<InvariantViolation>,
    /// Whether the run finished without invariant violations
    pub success: bool,
}

impl SimulationReport {
    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Simulation Report (seed: {})\n", self.seed));
        summary.push_str(&format!("Steps: {}\n", self.steps));
        summary.push_str(&format!("Success: {}\n", self.success));
        summary.push_str(&format!(
            "\nRequests:\n  Issued: {}\n  Received: {}\n  Cancelled: {}\n  \
             Rejected validations: {}\n",
            self.metrics.requests_issued,
            self.metrics.blocks_received,
            self.metrics.cancelled_blocks,
            self.metrics.rejected_validations
        ));
        summary.push_str(&format!(
            "\nPeers:\n  Chokes: {}\n  Disconnects: {}\n",
            self.metrics.chokes, self.metrics.disconnects
        ));

        if !self.violations.is_empty() {
            summary.push_str("\nInvariant violations:\n");
            for violation in &self.violations {
                summary.push_str(&format!("  - {violation}\n"));
            }
        }

        summary.push_str(&format!(
            "\nCompleted pieces: {}/{}\n",
            self.metrics.completed_pieces.len(),
            self.piece_count
        ));
        summary
    }
}

/// Picker stack under test.
enum PickerStack {
    Standard(StandardStack),
    Streaming(StreamingPicker<StandardPicker>),
}

impl PickerStack {
    fn picker(&mut self) -> &mut dyn PiecePicker {
        match self {
            Self::Standard(stack) => stack,
            Self::Streaming(stack) => stack,
        }
    }

    fn picker_ref(&self) -> &dyn PiecePicker {
        match self {
            Self::Standard(stack) => stack,
            Self::Streaming(stack) => stack,
        }
    }

    /// Moves streaming playback to the first missing piece.
    fn follow_playback(&mut self, layout: &TorrentLayout, first_missing: u32) {
        if let (Self::Streaming(stack), Some(file)) = (self, layout.files().first()) {
            let position = u64::from(first_missing) * u64::from(layout.piece_length());
            stack.read_to_position(file, position);
        }
    }
}

/// Remote peer plus the requests we have sent it.
struct SimulatedPeer {
    state: PeerState,
    in_flight: Vec<PieceRequest>,
}

/// Deterministic swarm driving one picker stack to a complete download.
///
/// Each step lets every peer roll for choke and disconnect events, asks the
/// picker for work for every peer with free request slots, then answers every
/// in-flight request with a block, a rejection, or a block plus garbage.
pub struct SwarmSimulation {
    config: SimulationConfig,
    layout: TorrentLayout,
    rng: DeterministicRng,
    picker: PickerStack,
    peers: Vec<SimulatedPeer>,
    state: SimulationState,
    metrics: SimulationMetrics,
    invariants: Vec<Arc<dyn Invariant>>,
    violations: Vec<InvariantViolation>,
}

impl SwarmSimulation {
    /// Creates new simulation with given configuration.
    ///
    /// # Errors
    /// - `SimulationError::InvalidConfig` - Configuration failed validation
    /// - `SimulationError::Picker` - Layout or picker initialisation failed
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let total_size = u64::from(config.piece_length) * u64::from(config.piece_count);
        let layout = TorrentLayout::single_file("swarm.bin", config.piece_length, total_size)?;
        let mut rng = DeterministicRng::from_seed(config.seed);

        let picker_config = PickerConfig::deterministic(rng.derive_seed());
        let observer = TracingObserver::shared(format!("sim-{}", config.seed));
        let mut picker = if config.streaming {
            PickerStack::Streaming(build_streaming_stack(&picker_config, observer))
        } else {
            PickerStack::Standard(build_standard_stack(&picker_config, observer))
        };
        picker
            .picker()
            .initialise(&BitField::new(config.piece_count), &layout, Vec::new())?;

        let peers = (0..config.peer_count)
            .map(|slot| generate_peer(&mut rng, &config, slot))
            .collect();

        Ok(Self {
            state: SimulationState::new(config.piece_count),
            config,
            layout,
            rng,
            picker,
            peers,
            metrics: SimulationMetrics::default(),
            invariants: default_invariants(),
            violations: Vec::new(),
        })
    }

    /// Returns the seed used for this simulation.
    pub fn simulation_seed(&self) -> u64 {
        self.rng.seed()
    }

    /// State observed after the most recent step.
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Adds an invariant to check after every step.
    pub fn add_invariant(&mut self, invariant: Arc<dyn Invariant>) {
        self.invariants.push(invariant);
    }

    /// Runs steps until every piece is downloaded.
    ///
    /// # Errors
    /// - `SimulationError::StepLimitExceeded` - Download incomplete after `max_steps`
    /// - `SimulationError::TooManyInvariantViolations` - Too many invariant violations
    pub fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        tracing::info!(
            seed = self.config.seed,
            peers = self.config.peer_count,
            pieces = self.config.piece_count,
            streaming = self.config.streaming,
            "starting swarm simulation"
        );

        while !self.state.is_complete() {
            if self.state.step >= self.config.max_steps {
                return Err(SimulationError::StepLimitExceeded {
                    steps: self.state.step,
                    missing: self.config.piece_count - self.state.own.count_ones(),
                });
            }
            self.step()?;
        }

        let report = self.generate_report();
        tracing::info!(steps = report.steps, success = report.success, "swarm simulation finished");
        Ok(report)
    }

    /// Executes a single step.
    ///
    /// # Errors
    /// - `SimulationError::TooManyInvariantViolations` - Too many invariant violations
    pub fn step(&mut self) -> Result<(), SimulationError> {
        self.state.step += 1;

        for slot in 0..self.peers.len() {
            self.roll_peer_events(slot);
            self.request_from(slot);
        }
        for slot in 0..self.peers.len() {
            self.deliver_from(slot);
        }

        if let Some(first_missing) = self.state.first_missing() {
            self.picker.follow_playback(&self.layout, first_missing);
        }

        let picker = self.picker.picker_ref();
        self.state.active = picker.export_active_requests();
        self.state.reported_requests = picker.current_request_count();
        self.check_invariants()
    }

    /// Chokes, unchokes or reconnects a peer at random.
    fn roll_peer_events(&mut self, slot: usize) {
        let peer = &mut self.peers[slot];
        let peer_id = peer.state.peer_id();

        if self.rng.chance(self.config.disconnect_probability) {
            let aborted = self.picker.picker().abort_requests(peer_id);
            let forgotten = self.state.forget_peer(peer_id);
            if aborted != forgotten {
                self.state.unexpected_validations += 1;
            }
            peer.in_flight.clear();
            peer.state.clear_requests();
            self.metrics.disconnects += 1;
            self.metrics.cancelled_blocks += aborted as u64;
            tracing::debug!(%peer_id, aborted, "peer reconnected");
            return;
        }

        if self.rng.chance(self.config.choke_probability) {
            let choking = !peer.state.is_choking();
            peer.state.set_choking(choking);
            if choking {
                self.picker.picker().cancel_requests(peer_id);
                let forgotten = self.state.forget_peer(peer_id);
                peer.in_flight.clear();
                peer.state.clear_requests();
                self.metrics.chokes += 1;
                self.metrics.cancelled_blocks += forgotten as u64;
            }
            tracing::trace!(%peer_id, choking, "choke state changed");
        }
    }

    /// Asks the picker for work for a peer with free request slots.
    fn request_from(&mut self, slot: usize) {
        let (before, rest) = self.peers.split_at_mut(slot);
        let Some((peer, after)) = rest.split_first_mut() else {
            return;
        };

        let free_slots = self
            .config
            .request_slots
            .saturating_sub(peer.state.requesting_count());
        if free_slots == 0 {
            return;
        }
        let count = self.config.blocks_per_pick.min(free_slots as usize);

        let mut available = peer.state.bitfield().clone();
        available.difference_with(&self.state.own);
        let others: Vec<&dyn PeerView> = before
            .iter()
            .chain(after.iter())
            .map(|other| &other.state as &dyn PeerView)
            .collect();

        let last_piece = self.config.piece_count - 1;
        let result =
            self.picker
                .picker()
                .pick_piece(&mut peer.state, &available, &others, count, 0, last_piece);
        let PickResult::Requests(requests) = result else {
            return;
        };

        let peer_id = peer.state.peer_id();
        for request in &requests {
            self.state
                .record_issued(request.piece_index.as_u32(), request.offset, peer_id);
        }
        peer.state.record_requests_sent(requests.len() as u32);
        self.metrics.requests_issued += requests.len() as u64;
        peer.in_flight.extend(requests);
    }

    /// Answers every in-flight request of a peer.
    fn deliver_from(&mut self, slot: usize) {
        let peer = &mut self.peers[slot];
        let peer_id = peer.state.peer_id();
        let picker = self.picker.picker();

        for request in std::mem::take(&mut peer.in_flight) {
            let key = (request.piece_index.as_u32(), request.offset);

            if self.rng.chance(self.config.drop_probability) {
                picker.request_rejected(peer_id, &request);
                self.state.ledger.remove(&key);
                peer.state.request_completed();
                self.metrics.cancelled_blocks += 1;
                continue;
            }

            if self.rng.chance(self.config.garbage_probability) {
                let garbage = picker.validate_piece(
                    &mut peer.state,
                    request.piece_index,
                    request.offset + 1,
                    request.length,
                );
                match garbage {
                    Ok(_) => self.state.unexpected_validations += 1,
                    Err(_) => self.metrics.rejected_validations += 1,
                }
            }

            match picker.validate_piece(
                &mut peer.state,
                request.piece_index,
                request.offset,
                request.length,
            ) {
                Ok(validated) => {
                    self.state.ledger.remove(&key);
                    self.metrics.blocks_received += 1;
                    if let Some(piece) = validated.completed {
                        let index = piece.index().as_u32();
                        self.state.own.set(index, true);
                        self.metrics.completed_pieces.push(index);
                        tracing::debug!(piece = index, %peer_id, "piece downloaded");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, %peer_id, "requested block rejected");
                    self.state.unexpected_validations += 1;
                }
            }
        }
    }

    /// Checks all invariants.
    fn check_invariants(&mut self) -> Result<(), SimulationError> {
        for invariant in &self.invariants {
            if let Err(violation) = invariant.check(&self.state) {
                tracing::warn!(%violation, "invariant violated");
                self.violations.push(violation);

                if self.violations.len() >= MAX_INVARIANT_VIOLATIONS {
                    return Err(SimulationError::TooManyInvariantViolations {
                        count: self.violations.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Generates simulation report.
    fn generate_report(&self) -> SimulationReport {
        SimulationReport {
            seed: self.simulation_seed(),
            steps: self.state.step,
            piece_count: self.config.piece_count,
            metrics: self.metrics.clone(),
            violations: self.violations.clone(),
            success: self.violations.is_empty(),
        }
    }
}

/// Creates the remote peer in `slot`. Slot zero is always an unchoking seeder
/// so every piece stays available.
fn generate_peer(
    rng: &mut DeterministicRng,
    config: &SimulationConfig,
    slot: usize,
) -> SimulatedPeer {
    let piece_count = config.piece_count;
    let peer_id = PeerId::from_seed(slot as u8 + 1);

    if slot == 0 {
        return SimulatedPeer {
            state: PeerState::new(peer_id, BitField::full(piece_count)),
            in_flight: Vec::new(),
        };
    }

    let held = (0..piece_count).filter(|_| rng.chance(PIECE_DENSITY)).collect::<Vec<_>>();
    let fast = rng.chance(config.fast_peer_ratio);
    let bitfield = BitField::from_indices(piece_count, held.iter().copied());
    let mut state = PeerState::new(peer_id, bitfield).with_fast_peer(fast);

    if fast && !held.is_empty() {
        let last = held.len() as u32 - 1;
        for _ in 0..2 {
            let index = held[rng.pick(0..=last) as usize];
            state.add_allowed_fast(PieceIndex::new(index));
        }
        let suggested = held[rng.pick(0..=last) as usize];
        state.add_suggested(PieceIndex::new(suggested));
        state.set_choking(rng.chance(0.5));
    }

    SimulatedPeer {
        state,
        in_flight: Vec::new(),
    }
}
