// dense state-vector runtime: the state container, the gate engine and the
// read-only diagnostics computed from a state

pub mod diagnostics;
pub mod engine;
pub mod quantum_state;

pub use diagnostics::{compute_fidelity, expectation_z, measure, sample_counts, tomography, BlochVector};
pub use engine::DenseStateEngine;
pub use quantum_state::{InitialState, QuantumState};

use crate::error::{QsimError, Result};

/// checks a target list against the gate arity and register width.
/// shared by every engine so all of them reject the same inputs.
pub(crate) fn validate_targets(arity: usize, targets: &[usize], num_qubits: u32) -> Result<()> {
    if targets.len() != arity {
        return Err(QsimError::InvalidGate(format!(
            "gate acts on {} qubit(s) but {} target(s) were given",
            arity,
            targets.len()
        )));
    }
    for (i, &q) in targets.iter().enumerate() {
        if q >= num_qubits as usize {
            return Err(QsimError::InvalidGate(format!(
                "target qubit {} out of range for {} qubits",
                q, num_qubits
            )));
        }
        if targets[..i].contains(&q) {
            return Err(QsimError::InvalidGate(format!("duplicate target qubit {}", q)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_targets() {
        assert!(validate_targets(2, &[0, 1], 2).is_ok());
        assert!(validate_targets(2, &[0], 2).is_err());
        assert!(validate_targets(1, &[2], 2).is_err());
        assert!(validate_targets(2, &[1, 1], 3).is_err());
    }
}
