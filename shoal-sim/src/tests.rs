//! Tests for the swarm simulation.

use std::sync::Arc;

use crate::{
    Invariant, InvariantViolation, SimulationConfig, SimulationError, SimulationState,
    SwarmSimulation,
};

#[test]
fn test_simulation_reproducibility() {
    let config = SimulationConfig::deterministic_testing(12345);

    let report1 = SwarmSimulation::new(config.clone()).unwrap().run().unwrap();
    let report2 = SwarmSimulation::new(config).unwrap().run().unwrap();

    assert_eq!(report1, report2);
    assert_eq!(report1.seed, 12345);
}

#[test]
fn test_standard_stack_completes_without_violations() {
    for seed in [1, 2, 3, 99] {
        let mut sim = SwarmSimulation::new(SimulationConfig::deterministic_testing(seed)).unwrap();
        let report = sim.run().unwrap();

        assert!(report.success, "seed {seed}:\n{}", report.summary());
        assert!(sim.state().is_complete());
        assert!(sim.state().ledger.is_empty());

        let mut completed = report.metrics.completed_pieces.clone();
        completed.sort_unstable();
        assert_eq!(completed, (0..24).collect::<Vec<_>>());
    }
}

#[test]
fn test_streaming_stack_completes_without_violations() {
    for seed in [5, 6] {
        let config = SimulationConfig {
            streaming: true,
            ..SimulationConfig::deterministic_testing(seed)
        };
        let report = SwarmSimulation::new(config).unwrap().run().unwrap();
        assert!(report.success, "seed {seed}:\n{}", report.summary());
        assert_eq!(report.metrics.completed_pieces.len(), 24);
    }
}

#[test]
fn test_noisy_swarm_exercises_failure_paths() {
    let config = SimulationConfig {
        piece_count: 192,
        drop_probability: 0.2,
        garbage_probability: 0.3,
        choke_probability: 0.2,
        disconnect_probability: 0.05,
        ..SimulationConfig::deterministic_testing(77)
    };
    let report = SwarmSimulation::new(config).unwrap().run().unwrap();

    assert!(report.success, "{}", report.summary());
    assert!(report.metrics.rejected_validations > 0);
    assert!(report.metrics.cancelled_blocks > 0);
    assert!(report.metrics.chokes > 0);
}

#[test]
fn test_different_seeds_diverge() {
    let a = SwarmSimulation::new(SimulationConfig::deterministic_testing(10))
        .unwrap()
        .run()
        .unwrap();
    let b = SwarmSimulation::new(SimulationConfig::deterministic_testing(11))
        .unwrap()
        .run()
        .unwrap();

    assert_ne!(a.metrics, b.metrics);
}

#[test]
fn test_step_limit_reported() {
    let config = SimulationConfig {
        max_steps: 1,
        ..SimulationConfig::deterministic_testing(4)
    };
    let error = SwarmSimulation::new(config).unwrap().run().unwrap_err();

    match error {
        SimulationError::StepLimitExceeded { steps, missing } => {
            assert_eq!(steps, 1);
            assert!(missing > 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_config_rejected() {
    let config = SimulationConfig {
        peer_count: 0,
        ..SimulationConfig::default()
    };
    assert!(matches!(
        SwarmSimulation::new(config),
        Err(SimulationError::InvalidConfig { .. })
    ));
}

struct AlwaysFails;

impl Invariant for AlwaysFails {
    fn check(&self, state: &SimulationState) -> Result<(), InvariantViolation> {
        Err(self.violation(state, "forced".to_string()))
    }

    fn name(&self) -> &str {
        "AlwaysFails"
    }
}

#[test]
fn test_repeated_violations_abort_run() {
    // Large enough that the download cannot finish before the limit is hit.
    let config = SimulationConfig {
        piece_count: 400,
        ..SimulationConfig::deterministic_testing(8)
    };
    let mut sim = SwarmSimulation::new(config).unwrap();
    sim.add_invariant(Arc::new(AlwaysFails));

    match sim.run() {
        Err(SimulationError::TooManyInvariantViolations { count }) => assert_eq!(count, 10),
        other => panic!("unexpected outcome: {other:?}"),
    }
}
