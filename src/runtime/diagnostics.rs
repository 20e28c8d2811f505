// read-only diagnostics on dense states. only `measure` mutates, and it
// takes the rng explicitly.

use super::engine::DenseStateEngine;
use super::quantum_state::QuantumState;
use super::validate_targets;
use crate::complex_vector::ComplexVector;
use crate::error::{QsimError, Result};
use log::{debug, warn};
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayViewD, IxDyn};
use num_complex::Complex64;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// eigenvalues below this are numerical noise
pub const EIGENVALUE_FLOOR: f64 = 1e-14;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlochVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl BlochVector {
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// |⟨target|state⟩|², both sides normalized first
pub fn compute_fidelity(state: &ComplexVector, target: &ComplexVector) -> Result<f64> {
    let ns = state.norm();
    let nt = target.norm();
    if ns == 0.0 || nt == 0.0 {
        return Err(QsimError::InvalidParameter(
            "fidelity of a zero vector is undefined".to_string(),
        ));
    }
    let overlap = target.dot(state)?;
    Ok((overlap.norm_sqr() / (ns * ns * nt * nt)).min(1.0))
}

/// reduced density matrix over `keep`, indexed with `keep[0]` as the most
/// significant bit. formed as M·M† where M is the state reshaped to
/// (kept, traced), which sums the paired trace axes without building |ψ⟩⟨ψ|.
pub(crate) fn reduced_density_matrix(state: &QuantumState, keep: &[usize]) -> Result<Array2<Complex64>> {
    validate_targets(keep.len(), keep, state.num_qubits)?;
    let n = state.num_qubits as usize;
    let k = keep.len();
    let leading: Vec<usize> = keep.iter().map(|&q| n - 1 - q).collect();
    let perm: Vec<usize> = leading
        .iter()
        .copied()
        .chain((0..n).filter(|a| !leading.contains(a)))
        .collect();

    let view = ArrayViewD::from_shape(IxDyn(&vec![2usize; n]), state.amplitudes.as_slice())
        .map_err(|e| QsimError::InvalidDimension(e.to_string()))?;
    let data: Vec<Complex64> = view.permuted_axes(IxDyn(&perm)).iter().copied().collect();
    let m = Array2::from_shape_vec((1 << k, 1 << (n - k)), data)
        .map_err(|e| QsimError::InvalidDimension(e.to_string()))?;
    let norm = state.amplitudes.norm_sqr();
    let rho = m.dot(&m.t().mapv(|z| z.conj()));
    Ok(if norm > 0.0 { rho / Complex64::new(norm, 0.0) } else { rho })
}

/// eigenvalues (ascending) and eigenvectors (columns) of a hermitian matrix.
/// the input is symmetrized first so tiny asymmetries from rounding vanish.
pub(crate) fn hermitian_spectrum(rho: &Array2<Complex64>) -> (Vec<f64>, DMatrix<Complex64>) {
    let dim = rho.nrows();
    let m = DMatrix::from_fn(dim, dim, |r, c| (rho[[r, c]] + rho[[c, r]].conj()) * 0.5);
    let eigen = m.symmetric_eigen();
    let mut order: Vec<usize> = (0..dim).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let values = order.iter().map(|&i| eigen.eigenvalues[i]).collect();
    let vectors = DMatrix::from_fn(dim, dim, |r, c| eigen.eigenvectors[(r, order[c])]);
    (values, vectors)
}

/// von neumann entropy in bits. eigenvalues under the noise floor are
/// dropped, negative ones clipped.
pub fn von_neumann_entropy(rho: &Array2<Complex64>) -> f64 {
    let (values, _) = hermitian_spectrum(rho);
    let clipped = values.iter().filter(|&&l| l < -EIGENVALUE_FLOOR).count();
    if clipped > 0 {
        warn!("clipped {} negative eigenvalue(s) in entropy", clipped);
    }
    let entropy: f64 = values
        .into_iter()
        .filter(|&l| l > EIGENVALUE_FLOOR)
        .map(|l| -l * l.log2())
        .sum();
    entropy.max(0.0)
}

pub fn expectation_z(state: &QuantumState, qubit: usize) -> Result<f64> {
    validate_targets(1, &[qubit], state.num_qubits)?;
    let bit = 1usize << qubit;
    Ok(state
        .amplitudes
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, a)| if i & bit == 0 { a.norm_sqr() } else { -a.norm_sqr() })
        .sum())
}

/// single-qubit tomography: the bloch vector of every qubit's reduced state
pub fn tomography(state: &QuantumState) -> Vec<BlochVector> {
    let amps = state.amplitudes.as_slice();
    let norm = state.amplitudes.norm_sqr().max(f64::MIN_POSITIVE);
    (0..state.num_qubits as usize)
        .map(|q| {
            let bit = 1usize << q;
            let mut coherence = Complex64::new(0.0, 0.0);
            let mut z = 0.0;
            for (i, a) in amps.iter().enumerate() {
                if i & bit == 0 {
                    coherence += a.conj() * amps[i | bit];
                    z += a.norm_sqr();
                } else {
                    z -= a.norm_sqr();
                }
            }
            BlochVector {
                x: 2.0 * coherence.re / norm,
                y: 2.0 * coherence.im / norm,
                z: z / norm,
            }
        })
        .collect()
}

/// projective z measurement of one qubit; collapses and renormalizes
pub fn measure<R: Rng + ?Sized>(state: &mut QuantumState, qubit: usize, rng: &mut R) -> Result<u8> {
    validate_targets(1, &[qubit], state.num_qubits)?;
    let bit = 1usize << qubit;
    let p_one: f64 = state
        .amplitudes
        .as_slice()
        .iter()
        .enumerate()
        .filter(|(i, _)| i & bit != 0)
        .map(|(_, a)| a.norm_sqr())
        .sum::<f64>()
        / state.amplitudes.norm_sqr();
    let outcome = if rng.gen::<f64>() < p_one { 1u8 } else { 0u8 };
    for (i, a) in state.amplitudes.as_mut_slice().iter_mut().enumerate() {
        if ((i & bit != 0) as u8) != outcome {
            *a = Complex64::new(0.0, 0.0);
        }
    }
    state.amplitudes.normalize();
    debug!("measured qubit {} -> {} (p1 = {:.6})", qubit, outcome, p_one);
    Ok(outcome)
}

/// samples `shots` basis states from the distribution without collapsing
pub fn sample_counts<R: Rng + ?Sized>(state: &QuantumState, shots: usize, rng: &mut R) -> BTreeMap<usize, usize> {
    let mut cumulative = Vec::with_capacity(state.dim());
    let mut acc = 0.0;
    for p in state.probabilities() {
        acc += p;
        cumulative.push(acc);
    }
    let mut counts = BTreeMap::new();
    for _ in 0..shots {
        let r = rng.gen::<f64>() * acc;
        let idx = cumulative
            .partition_point(|&c| c <= r)
            .min(cumulative.len() - 1);
        *counts.entry(idx).or_insert(0) += 1;
    }
    counts
}

impl DenseStateEngine {
    pub fn compute_fidelity(&self, state: &QuantumState, target: &QuantumState) -> Result<f64> {
        compute_fidelity(&state.amplitudes, &target.amplitudes)
    }

    pub fn partial_trace(&self, state: &QuantumState, keep_qubits: &[usize]) -> Result<Array2<Complex64>> {
        self.config()
            .check_density_limit("partial_trace", state.num_qubits)?;
        reduced_density_matrix(state, keep_qubits)
    }

    pub fn entanglement_entropy(&self, state: &QuantumState, subsystem: &[usize]) -> Result<f64> {
        let rho = self.partial_trace(state, subsystem)?;
        Ok(von_neumann_entropy(&rho))
    }

    pub fn tomography(&self, state: &QuantumState) -> Vec<BlochVector> {
        tomography(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::config::SimConfig;
    use crate::gates::Gate;
    use crate::random::rng_from_seed;
    use crate::runtime::InitialState;

    fn bell() -> (DenseStateEngine, QuantumState) {
        let e = DenseStateEngine::new(SimConfig::default()).unwrap();
        let mut s = e.initialize(2, &InitialState::Zero).unwrap();
        e.apply_circuit(&mut s, &Circuit::bell()).unwrap();
        (e, s)
    }

    #[test]
    fn test_fidelity_ignores_scale() {
        let a = ComplexVector::from_vec(vec![Complex64::new(2.0, 0.0), Complex64::new(0.0, 0.0)]);
        let b = ComplexVector::from_vec(vec![Complex64::new(0.0, 1.0), Complex64::new(0.0, 0.0)]);
        assert!((compute_fidelity(&a, &b).unwrap() - 1.0).abs() < 1e-15);
        assert!(compute_fidelity(&a, &ComplexVector::zeros(2)).is_err());
    }

    #[test]
    fn test_partial_trace_of_bell_is_maximally_mixed() {
        let (e, s) = bell();
        let rho = e.partial_trace(&s, &[0]).unwrap();
        assert!((rho[[0, 0]].re - 0.5).abs() < 1e-12);
        assert!((rho[[1, 1]].re - 0.5).abs() < 1e-12);
        assert!(rho[[0, 1]].norm() < 1e-12);
        assert!((e.entanglement_entropy(&s, &[1]).unwrap() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_partial_trace_keep_order() {
        let e = DenseStateEngine::new(SimConfig::default()).unwrap();
        // qubit 0 = 1, qubit 1 = 0
        let s = e.initialize(2, &InitialState::Basis { index: 0b01 }).unwrap();
        let rho = e.partial_trace(&s, &[0, 1]).unwrap();
        assert!((rho[[2, 2]].re - 1.0).abs() < 1e-15);
        let rho = e.partial_trace(&s, &[1, 0]).unwrap();
        assert!((rho[[1, 1]].re - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_partial_trace_scaling_limit() {
        let config = SimConfig {
            max_density_qubits: 3,
            ..SimConfig::default()
        };
        let e = DenseStateEngine::new(config).unwrap();
        let s = e.initialize(4, &InitialState::Zero).unwrap();
        assert!(matches!(
            e.partial_trace(&s, &[0]),
            Err(QsimError::ScalingLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_tomography_of_plus_and_one() {
        let e = DenseStateEngine::new(SimConfig::default()).unwrap();
        let mut s = e.initialize(2, &InitialState::Zero).unwrap();
        e.apply(&mut s, &Gate::H, &[0]).unwrap();
        e.apply(&mut s, &Gate::X, &[1]).unwrap();
        let bloch = e.tomography(&s);
        assert!((bloch[0].x - 1.0).abs() < 1e-12);
        assert!(bloch[0].z.abs() < 1e-12);
        assert!((bloch[1].z + 1.0).abs() < 1e-12);
        assert!((expectation_z(&s, 1).unwrap() + 1.0).abs() < 1e-12);

        let (_, bell) = bell();
        assert!(tomography(&bell)[0].length() < 1e-12);
    }

    #[test]
    fn test_measure_collapses_bell_pair() {
        let (_, mut s) = bell();
        let mut rng = rng_from_seed(11);
        let first = measure(&mut s, 0, &mut rng).unwrap();
        let second = measure(&mut s, 1, &mut rng).unwrap();
        assert_eq!(first, second);
        assert!(s.is_normalized(1e-12));
    }

    #[test]
    fn test_sample_counts_only_hits_support() {
        let (_, s) = bell();
        let counts = sample_counts(&s, 1000, &mut rng_from_seed(5));
        assert_eq!(counts.values().sum::<usize>(), 1000);
        assert!(counts.keys().all(|&k| k == 0 || k == 3));
        assert_eq!(counts, sample_counts(&s, 1000, &mut rng_from_seed(5)));
    }
}
