//! Invariant checking framework for simulation validation.

use std::fmt;
use std::sync::Arc;

use crate::state::SimulationState;

/// Violation of a simulation invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: String,
    /// Detailed description of the violation
    pub description: String,
    /// Step after which the violation was observed
    pub step: u64,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated at step {}: {}",
            self.invariant, self.step, self.description
        )
    }
}

/// Trait for checking simulation invariants.
pub trait Invariant: Send + Sync {
    /// Checks if invariant holds for current state.
    ///
    /// # Errors
    /// Returns `InvariantViolation` if the invariant condition is not met.
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation>;

    /// Returns name of this invariant.
    fn name(&self) -> &str;

    /// Builds a violation of this invariant for the state's step.
    fn violation(&self, state: &SimulationState, description: String) -> InvariantViolation {
        InvariantViolation {
            invariant: self.name().to_string(),
            description,
            step: state.step,
        }
    }
}

/// No block is ever handed to two peers at once.
pub struct NoDoubleAllocationInvariant;

impl Invariant for NoDoubleAllocationInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        if state.double_allocations > 0 {
            return Err(self.violation(
                state,
                format!("{} blocks requested twice", state.double_allocations),
            ));
        }

        for piece in &state.active {
            for block in piece.blocks() {
                if block.requested() != block.requested_off().is_some() {
                    return Err(self.violation(
                        state,
                        format!(
                            "block {}:{} has requested={} but owner {:?}",
                            piece.index(),
                            block.start_offset(),
                            block.requested(),
                            block.requested_off()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "NoDoubleAllocation"
    }
}

/// A received block was always requested first.
pub struct ReceivedImpliesRequestedInvariant;

impl Invariant for ReceivedImpliesRequestedInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        let offending = state.active.iter().find_map(|piece| {
            piece
                .blocks()
                .iter()
                .find(|block| block.received() && !block.requested())
                .map(|block| (piece.index(), block.start_offset()))
        });
        match offending {
            Some((index, offset)) => Err(self.violation(
                state,
                format!("block {index}:{offset} received without request"),
            )),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "ReceivedImpliesRequested"
    }
}

/// The active set is strictly ascending, holds no finished pieces and no
/// pieces we already own.
pub struct ActiveSetOrderInvariant;

impl Invariant for ActiveSetOrderInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        if let Some(pair) = state
            .active
            .windows(2)
            .find(|pair| pair[0].index() >= pair[1].index())
        {
            return Err(self.violation(
                state,
                format!("piece {} listed before {}", pair[0].index(), pair[1].index()),
            ));
        }
        if let Some(piece) = state.active.iter().find(|piece| piece.all_blocks_received()) {
            return Err(self.violation(
                state,
                format!("completed piece {} still active", piece.index()),
            ));
        }
        if let Some(piece) = state
            .active
            .iter()
            .find(|piece| state.own.get(piece.index().as_u32()))
        {
            return Err(self.violation(
                state,
                format!("owned piece {} still active", piece.index()),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "ActiveSetOrder"
    }
}

/// The picker's view of outstanding requests matches the engine's ledger.
pub struct RequestLedgerInvariant;

impl Invariant for RequestLedgerInvariant {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        if state.reported_requests != state.ledger.len() {
            return Err(self.violation(
                state,
                format!(
                    "picker reports {} outstanding blocks, engine tracks {}",
                    state.reported_requests,
                    state.ledger.len()
                ),
            ));
        }
        if state.unexpected_validations > 0 {
            return Err(self.violation(
                state,
                format!(
                    "{} validations disagreed with the ledger",
                    state.unexpected_validations
                ),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "RequestLedger"
    }
}

/// Every invariant a swarm run checks by default.
pub fn default_invariants() -> Vec<Arc<dyn Invariant>> {
    vec![
        Arc::new(NoDoubleAllocationInvariant),
        Arc::new(ReceivedImpliesRequestedInvariant),
        Arc::new(ActiveSetOrderInvariant),
        Arc::new(RequestLedgerInvariant),
    ]
}
