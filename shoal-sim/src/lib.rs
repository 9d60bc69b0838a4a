//! Deterministic swarm simulation for Shoal piece pickers
//!
//! Drives a complete picker stack against a seeded swarm of remote peers that
//! choke, disconnect, drop requests and send garbage. After every step the
//! picker's exported state is checked against the simulated engine's own
//! request ledger. Identical seeds produce identical reports.

pub mod config;
pub mod invariants;
pub mod rng;
pub mod simulation;
pub mod state;
pub mod tracing_setup;

pub use config::SimulationConfig;
pub use invariants::{Invariant, InvariantViolation, default_invariants};
pub use rng::DeterministicRng;
pub use simulation::{SimulationError, SimulationReport, SwarmSimulation};
pub use state::{SimulationMetrics, SimulationState};
pub use tracing_setup::init_tracing;

#[cfg(test)]
mod tests;
