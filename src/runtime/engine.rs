use super::quantum_state::{InitialState, QuantumState};
use super::validate_targets;
use crate::circuit::{Circuit, GateOp};
use crate::complex_vector::ComplexVector;
use crate::config::{AmplitudePrecision, SimConfig};
use crate::error::{QsimError, Result};
use crate::gates::{Gate, GateLibrary, GateMatrix};
use crate::random::{random_state, rng_from_seed};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayViewD, ArrayViewMutD, IxDyn};
use num_complex::Complex64;

// rounding every amplitude through f32 moves the norm by ~1e-7; checking
// against the f64 tolerance would renormalize after every gate
const SINGLE_PRECISION_DRIFT: f64 = 1e-6;

/// state-vector engine. owns the configuration and the gate library, never
/// the states it operates on.
#[derive(Debug, Clone)]
pub struct DenseStateEngine {
    config: SimConfig,
    library: GateLibrary,
}

impl DenseStateEngine {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let library = GateLibrary::new(config.gate_precision);
        Ok(Self { config, library })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn library(&self) -> &GateLibrary {
        &self.library
    }

    pub fn initialize(&self, num_qubits: u32, mode: &InitialState) -> Result<QuantumState> {
        self.config.check_dense_allocation(num_qubits)?;
        let dim = 1usize << num_qubits;
        let seed = self.config.seed;

        let amplitudes = match mode {
            InitialState::Zero => ComplexVector::basis(num_qubits, 0)?,
            InitialState::Basis { index } => ComplexVector::basis(num_qubits, *index)?,
            InitialState::Amplitudes { amplitudes } => {
                if amplitudes.len() != dim {
                    return Err(QsimError::InvalidDimension(format!(
                        "{} amplitudes supplied for {} qubits (expected {})",
                        amplitudes.len(),
                        num_qubits,
                        dim
                    )));
                }
                let state = QuantumState::from_vector(ComplexVector::from_vec(amplitudes.clone()), seed)?;
                state.amplitudes
            }
            InitialState::Random { seed } => random_state(num_qubits, &mut rng_from_seed(*seed)),
        };

        let mut state = QuantumState {
            num_qubits,
            amplitudes,
            seed,
            precision: self.config.amplitude_precision,
        };
        if state.precision == AmplitudePrecision::Complex64 {
            state.amplitudes.round_to_single();
        }
        info!(
            "initialized {}-qubit dense state ({} amplitudes, {:?})",
            num_qubits, dim, state.precision
        );
        Ok(state)
    }

    pub fn apply_gate(&self, state: &mut QuantumState, op: &GateOp) -> Result<()> {
        self.apply(state, &op.gate, &op.targets)
    }

    /// validates, then applies `gate` to `targets`. on error the state is
    /// untouched.
    pub fn apply(&self, state: &mut QuantumState, gate: &Gate, targets: &[usize]) -> Result<()> {
        let matrix = self.library.matrix(gate)?;
        debug!("apply {} on {:?}", gate.name(), targets);
        self.apply_matrix(state, &matrix, targets)
    }

    pub fn apply_matrix(
        &self,
        state: &mut QuantumState,
        matrix: &GateMatrix,
        targets: &[usize],
    ) -> Result<()> {
        let arity = matrix.num_qubits().ok_or_else(|| {
            QsimError::InvalidGate(format!("matrix dimension {} is not a power of two", matrix.dim()))
        })?;
        validate_targets(arity, targets, state.num_qubits)?;
        contract_targets(state.amplitudes.as_mut_slice(), state.num_qubits, matrix, targets)?;
        self.enforce_invariants(state);
        Ok(())
    }

    pub fn apply_circuit(&self, state: &mut QuantumState, circuit: &Circuit) -> Result<()> {
        if circuit.num_qubits > state.num_qubits {
            return Err(QsimError::InvalidDimension(format!(
                "circuit needs {} qubits, state has {}",
                circuit.num_qubits, state.num_qubits
            )));
        }
        for op in &circuit.ops {
            self.apply_gate(state, op)?;
        }
        Ok(())
    }

    // renormalize on drift, then emulate single-precision storage
    fn enforce_invariants(&self, state: &mut QuantumState) {
        let tolerance = match state.precision {
            AmplitudePrecision::Complex64 => self.config.norm_tolerance.max(SINGLE_PRECISION_DRIFT),
            AmplitudePrecision::Complex128 => self.config.norm_tolerance,
        };
        let norm = state.norm();
        if state.renormalize(tolerance) {
            warn!("norm drifted to {:.12}, renormalized", norm);
        }
        if state.precision == AmplitudePrecision::Complex64 {
            state.amplitudes.round_to_single();
        }
    }
}

/// reshuffle-contract-reshuffle on a raw buffer of `num_qubits` qubits.
///
/// the buffer is viewed as a `[2; n]` tensor, the target axes are permuted
/// to the front (first target leading), the tensor is flattened to a
/// `2^k x 2^(n-k)` block and multiplied by the gate, and the result is written
/// back through the same permuted view, which undoes the permutation. callers
/// have already validated the targets.
///
/// a row-major `2^k x 2^k` gate is already its `[2; 2k]` tensor laid out
/// flat, so contracting the gate's input axes against the leading state axes
/// is exactly this matrix product; the gate is never reshaped.
pub(crate) fn contract_targets(
    amps: &mut [Complex64],
    num_qubits: u32,
    matrix: &GateMatrix,
    targets: &[usize],
) -> Result<()> {
    let n = num_qubits as usize;
    let k = targets.len();
    let shape = vec![2usize; n];
    let perm = target_permutation(n, targets);
    let shape_err = |e: ndarray::ShapeError| QsimError::InvalidDimension(e.to_string());

    let block = {
        let view = ArrayViewD::from_shape(IxDyn(&shape), &*amps).map_err(shape_err)?;
        let permuted = view.permuted_axes(IxDyn(&perm));
        let data: Vec<Complex64> = permuted.iter().copied().collect();
        Array2::from_shape_vec((1 << k, 1 << (n - k)), data).map_err(shape_err)?
    };
    let updated = matrix.view().dot(&block);

    let view = ArrayViewMutD::from_shape(IxDyn(&shape), amps).map_err(shape_err)?;
    let mut permuted = view.permuted_axes(IxDyn(&perm));
    permuted
        .iter_mut()
        .zip(updated.iter())
        .for_each(|(dst, src)| *dst = *src);
    Ok(())
}

// qubit q sits on axis n-1-q; targets first in the order given, the rest keep
// their relative order
fn target_permutation(n: usize, targets: &[usize]) -> Vec<usize> {
    let leading: Vec<usize> = targets.iter().map(|&q| n - 1 - q).collect();
    let rest = (0..n).filter(|axis| !leading.contains(axis));
    leading.iter().copied().chain(rest).collect()
}
