//! Simulation parameters.

use crate::SimulationError;

/// Configuration of a simulated swarm.
///
/// Every random decision in a run derives from `seed`, so two runs with the
/// same configuration are identical step for step.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Seed for peer generation, picker randomisation and event rolls
    pub seed: u64,
    /// Number of remote peers; the first one is always a seeder
    pub peer_count: usize,
    pub piece_count: u32,
    /// Piece length in bytes, a multiple of the block size
    pub piece_length: u32,
    /// Blocks asked for in one pick
    pub blocks_per_pick: usize,
    /// Maximum outstanding blocks per peer
    pub request_slots: u32,
    /// Chance that an in-flight block is rejected by the peer instead of sent
    pub drop_probability: f64,
    /// Chance per delivery that the peer also sends a block we never asked for
    pub garbage_probability: f64,
    /// Chance per step that a peer flips its choke state
    pub choke_probability: f64,
    /// Chance per step that a peer drops and immediately reconnects
    pub disconnect_probability: f64,
    /// Share of peers negotiating the fast extension
    pub fast_peer_ratio: f64,
    /// Drive the streaming stack instead of the standard one
    pub streaming: bool,
    /// Steps after which an incomplete download fails the run
    pub max_steps: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            peer_count: 8,
            piece_count: 64,
            piece_length: 65_536,
            blocks_per_pick: 8,
            request_slots: 16,
            drop_probability: 0.05,
            garbage_probability: 0.02,
            choke_probability: 0.05,
            disconnect_probability: 0.01,
            fast_peer_ratio: 0.5,
            streaming: false,
            max_steps: 10_000,
        }
    }
}

impl SimulationConfig {
    /// Small, noisy swarm for reproducible unit tests.
    pub fn deterministic_testing(seed: u64) -> Self {
        Self {
            seed,
            peer_count: 5,
            piece_count: 24,
            piece_length: 32_768,
            blocks_per_pick: 4,
            request_slots: 6,
            drop_probability: 0.1,
            garbage_probability: 0.1,
            choke_probability: 0.1,
            disconnect_probability: 0.02,
            ..Self::default()
        }
    }

    /// Checks the configuration describes a runnable swarm.
    ///
    /// # Errors
    /// - `SimulationError::InvalidConfig` - No peers, pieces or request slots,
    ///   or a probability outside `[0, 1]`
    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |reason: &str| {
            Err(SimulationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.peer_count == 0 || self.piece_count == 0 {
            return invalid("swarm needs at least one peer and one piece");
        }
        if self.peer_count > usize::from(u8::MAX) {
            return invalid("peer ids are derived from one byte");
        }
        if self.request_slots == 0 || self.blocks_per_pick == 0 {
            return invalid("peers need request slots");
        }
        let probabilities = [
            self.drop_probability,
            self.garbage_probability,
            self.choke_probability,
            self.disconnect_probability,
            self.fast_peer_ratio,
        ];
        if probabilities.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return invalid("probabilities must lie in [0, 1]");
        }
        Ok(())
    }
}
