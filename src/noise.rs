// kraus-channel noise on dense states
//
// a pure state is expanded to ρ = |ψ⟩⟨ψ|, each enabled channel is applied to
// every qubit as ρ' = Σ K ρ K†, and the result is either kept as a density
// matrix (`evolve_density`) or collapsed back to its dominant eigenvector
// (`apply_noise`). the collapse keeps only the largest eigen-component and is
// lossy. ρ is 16·4^n bytes and a channel step holds three of those, so
// everything here is bounded by `max_density_qubits` and the memory budget.

pub mod trajectories;

pub use trajectories::{run_trajectories, TrajectoryStats};

use crate::circuit::GateOp;
use crate::complex_vector::ComplexVector;
use crate::config::SimConfig;
use crate::error::{QsimError, Result};
use crate::gates::{pauli_x, pauli_y, pauli_z, GateLibrary, GateMatrix};
use crate::runtime::diagnostics::hermitian_spectrum;
use crate::runtime::engine::contract_targets;
use crate::runtime::{validate_targets, QuantumState};
use log::{debug, info, warn};
use ndarray::Array2;
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// full eigendecomposition up to this dimension, power iteration above
const DIRECT_EIGEN_MAX_DIM: usize = 64;
const POWER_ITERATIONS: usize = 1000;
const POWER_TOLERANCE: f64 = 1e-13;

/// independent per-qubit channel strengths, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NoiseSpec {
    pub gamma1: f64,
    pub gamma_phi: f64,
    pub p_depol: f64,
}

impl NoiseSpec {
    pub fn amplitude_damping(gamma1: f64) -> Self {
        Self {
            gamma1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for channel in self.all_channels() {
            channel.validate()?;
        }
        Ok(())
    }

    pub fn is_noiseless(&self) -> bool {
        self.channels().is_empty()
    }

    fn all_channels(&self) -> [KrausChannel; 3] {
        [
            KrausChannel::AmplitudeDamping(self.gamma1),
            KrausChannel::PhaseDamping(self.gamma_phi),
            KrausChannel::Depolarizing(self.p_depol),
        ]
    }

    /// enabled channels in application order
    pub fn channels(&self) -> Vec<KrausChannel> {
        self.all_channels()
            .into_iter()
            .filter(|c| c.strength() > 0.0)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KrausChannel {
    AmplitudeDamping(f64),
    PhaseDamping(f64),
    Depolarizing(f64),
}

impl KrausChannel {
    pub fn strength(&self) -> f64 {
        match *self {
            KrausChannel::AmplitudeDamping(g)
            | KrausChannel::PhaseDamping(g)
            | KrausChannel::Depolarizing(g) => g,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KrausChannel::AmplitudeDamping(_) => "amplitude_damping",
            KrausChannel::PhaseDamping(_) => "phase_damping",
            KrausChannel::Depolarizing(_) => "depolarizing",
        }
    }

    pub fn validate(&self) -> Result<()> {
        let s = self.strength();
        if !(0.0..=1.0).contains(&s) {
            return Err(QsimError::InvalidParameter(format!(
                "{} strength must be in [0, 1], got {}",
                self.name(),
                s
            )));
        }
        Ok(())
    }

    /// single-qubit kraus operators; Σ K†K = I
    pub fn operators(&self) -> Result<Vec<GateMatrix>> {
        self.validate()?;
        let c = |x: f64| Complex64::new(x, 0.0);
        let zero = c(0.0);
        let ops = match *self {
            KrausChannel::AmplitudeDamping(g) => vec![
                GateMatrix::new(2, vec![c(1.0), zero, zero, c((1.0 - g).sqrt())])?,
                GateMatrix::new(2, vec![zero, c(g.sqrt()), zero, zero])?,
            ],
            KrausChannel::PhaseDamping(g) => vec![
                GateMatrix::new(2, vec![c(1.0), zero, zero, c((1.0 - g).sqrt())])?,
                GateMatrix::new(2, vec![zero, zero, zero, c(g.sqrt())])?,
            ],
            KrausChannel::Depolarizing(p) => {
                let k0 = (1.0 - 3.0 * p / 4.0).sqrt();
                let ki = (p / 4.0).sqrt();
                vec![
                    scaled(&GateMatrix::identity(2), k0)?,
                    scaled(&pauli_x(), ki)?,
                    scaled(&pauli_y(), ki)?,
                    scaled(&pauli_z(), ki)?,
                ]
            }
        };
        Ok(ops)
    }
}

fn scaled(m: &GateMatrix, factor: f64) -> Result<GateMatrix> {
    GateMatrix::new(m.dim(), m.as_slice().iter().map(|z| z * factor).collect())
}

// S[(a,b),(c,d)] = Σ K[a][c]·conj(K[b][d]), so S·vec(ρ) = vec(Σ K ρ K†) with
// the row bit leading
fn superoperator(operators: &[GateMatrix]) -> Result<GateMatrix> {
    let mut data = vec![Complex64::new(0.0, 0.0); 16];
    for k in operators {
        if k.dim() != 2 {
            return Err(QsimError::InvalidGate(format!(
                "kraus operator of dimension {} on a single qubit",
                k.dim()
            )));
        }
        for (a, b, c, d) in (0..16).map(|i| ((i >> 3) & 1, (i >> 2) & 1, (i >> 1) & 1, i & 1)) {
            data[(a * 2 + b) * 4 + c * 2 + d] += k.get(a, c) * k.get(b, d).conj();
        }
    }
    GateMatrix::new(4, data)
}

fn conjugated(m: &GateMatrix) -> Result<GateMatrix> {
    GateMatrix::new(m.dim(), m.as_slice().iter().map(|z| z.conj()).collect())
}

/// row-major 2^n x 2^n density matrix.
///
/// the buffer doubles as a 2n-qubit vector: column bits are qubits 0..n and
/// row bits are qubits n..2n, so an operator on the row index is a gate on
/// the shifted targets and an operator on the column index is its conjugate
/// on the original targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityMatrix {
    num_qubits: u32,
    data: Vec<Complex64>,
}

impl DensityMatrix {
    pub fn from_pure(state: &ComplexVector) -> Result<Self> {
        let num_qubits = state.num_qubits().ok_or_else(|| {
            QsimError::InvalidDimension(format!("length {} is not a power of two", state.len()))
        })?;
        let norm = state.norm_sqr();
        if norm == 0.0 {
            return Err(QsimError::InvalidParameter("zero state vector".to_string()));
        }
        let amps = state.as_slice();
        let data = amps
            .par_iter()
            .flat_map_iter(|r| amps.iter().map(move |c| r * c.conj() / norm))
            .collect();
        Ok(Self { num_qubits, data })
    }

    pub fn num_qubits(&self) -> u32 {
        self.num_qubits
    }

    pub fn dim(&self) -> usize {
        1 << self.num_qubits
    }

    pub fn get(&self, row: usize, col: usize) -> Complex64 {
        self.data[row * self.dim() + col]
    }

    pub fn to_array(&self) -> Result<Array2<Complex64>> {
        Array2::from_shape_vec((self.dim(), self.dim()), self.data.clone())
            .map_err(|e| QsimError::InvalidDimension(e.to_string()))
    }

    pub fn trace(&self) -> f64 {
        (0..self.dim()).map(|i| self.get(i, i).re).sum()
    }

    /// Tr(ρ²): 1 for pure states, 1/2^n for the maximally mixed state
    pub fn purity(&self) -> f64 {
        // ρ is hermitian, so Tr(ρ²) = Σ |ρ_ij|²
        self.data.par_iter().map(|z| z.norm_sqr()).sum()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        (0..self.dim()).map(|i| self.get(i, i).re.max(0.0)).collect()
    }

    /// ⟨ψ|ρ|ψ⟩ with ψ normalized
    pub fn fidelity_with_pure(&self, state: &ComplexVector) -> Result<f64> {
        if state.len() != self.dim() {
            return Err(QsimError::InvalidDimension(format!(
                "state of length {} against {}x{} density matrix",
                state.len(),
                self.dim(),
                self.dim()
            )));
        }
        let rho_psi = self.mul_vec(state.as_slice());
        let value = ComplexVector::from_vec(rho_psi).dot(state)?.conj();
        Ok((value.re / state.norm_sqr()).clamp(0.0, 1.0))
    }

    fn mul_vec(&self, v: &[Complex64]) -> Vec<Complex64> {
        let dim = self.dim();
        self.data
            .par_chunks(dim)
            .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// ρ → U ρ U†
    pub fn apply_unitary(&mut self, matrix: &GateMatrix, targets: &[usize]) -> Result<()> {
        let arity = matrix.num_qubits().ok_or_else(|| {
            QsimError::InvalidGate(format!("matrix dimension {} is not a power of two", matrix.dim()))
        })?;
        validate_targets(arity, targets, self.num_qubits)?;
        self.conjugate_by(matrix, targets)
    }

    /// ρ → Σ K ρ K† for single-qubit kraus operators on `qubit`, applied as
    /// one contraction of the superoperator Σ K ⊗ K̄ on the (row, column) bit
    /// pair of `qubit`. no copy of ρ is made per operator.
    pub fn apply_kraus(&mut self, operators: &[GateMatrix], qubit: usize) -> Result<()> {
        validate_targets(1, &[qubit], self.num_qubits)?;
        let channel = superoperator(operators)?;
        let row = qubit + self.num_qubits as usize;
        contract_targets(&mut self.data, 2 * self.num_qubits, &channel, &[row, qubit])
    }

    // ρ → A ρ A†, targets already validated
    fn conjugate_by(&mut self, matrix: &GateMatrix, targets: &[usize]) -> Result<()> {
        let n = self.num_qubits as usize;
        let width = 2 * self.num_qubits;
        let rows: Vec<usize> = targets.iter().map(|&q| q + n).collect();
        contract_targets(&mut self.data, width, matrix, &rows)?;
        contract_targets(&mut self.data, width, &conjugated(matrix)?, targets)?;
        Ok(())
    }

    /// largest eigenvalue and its unit eigenvector. `guess` seeds the power
    /// iteration used for large matrices and fixes the global phase: the
    /// result has a real non-negative overlap with it.
    pub fn dominant_eigenvector(&self, guess: &ComplexVector) -> Result<(f64, ComplexVector)> {
        let dim = self.dim();
        if guess.len() != dim {
            return Err(QsimError::InvalidDimension(format!(
                "eigenvector guess of length {} for dimension {}",
                guess.len(),
                dim
            )));
        }
        let (lambda, mut v) = if dim <= DIRECT_EIGEN_MAX_DIM {
            let (values, vectors) = hermitian_spectrum(&self.to_array()?);
            let top = dim - 1;
            let v: Vec<Complex64> = (0..dim).map(|r| vectors[(r, top)]).collect();
            (values[top], ComplexVector::from_vec(v))
        } else {
            self.power_iteration(guess)
        };
        v.normalize();
        let overlap = v.dot(guess)?;
        if overlap.norm() > 1e-12 {
            // makes ⟨guess|v⟩ real and positive
            v.scale(overlap / overlap.norm());
        }
        Ok((lambda, v))
    }

    fn power_iteration(&self, guess: &ComplexVector) -> (f64, ComplexVector) {
        let mut v = guess.clone();
        if v.normalize() == 0.0 {
            v = ComplexVector::from_vec(vec![Complex64::new(1.0, 0.0); self.dim()]);
            v.normalize();
        }
        let mut lambda = 0.0;
        for iteration in 0..POWER_ITERATIONS {
            let mut w = ComplexVector::from_vec(self.mul_vec(v.as_slice()));
            let rayleigh = v.dot(&w).map(|z| z.re).unwrap_or(0.0);
            if w.normalize() == 0.0 {
                return (0.0, v);
            }
            v = w;
            if (rayleigh - lambda).abs() < POWER_TOLERANCE {
                debug!("power iteration converged after {} steps", iteration + 1);
                return (rayleigh, v);
            }
            lambda = rayleigh;
        }
        warn!(
            "power iteration did not converge in {} steps (λ ≈ {:.12})",
            POWER_ITERATIONS, lambda
        );
        (lambda, v)
    }
}

#[derive(Debug, Clone)]
pub struct NoiseEngine {
    config: SimConfig,
    library: GateLibrary,
}

impl NoiseEngine {
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let library = GateLibrary::new(config.gate_precision);
        Ok(Self { config, library })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    // both ceilings are checked before anything 4^n sized exists. the byte
    // count is the peak of a channel step: ρ plus the two buffers of the
    // contraction.
    fn check_limits(&self, num_qubits: u32) -> Result<()> {
        self.config.check_density_limit("density_matrix", num_qubits)?;
        let bytes = self.config.density_working_set(num_qubits);
        if bytes > self.config.memory_budget_bytes as u128 {
            return Err(QsimError::scaling(
                "density_matrix",
                format!("{} bytes", bytes),
                format!("{} bytes", self.config.memory_budget_bytes),
            ));
        }
        Ok(())
    }

    pub fn to_density(&self, state: &QuantumState) -> Result<DensityMatrix> {
        self.check_limits(state.num_qubits)?;
        DensityMatrix::from_pure(&state.amplitudes)
    }

    /// applies every enabled channel to every qubit, keeping the mixed state
    pub fn evolve_density(&self, rho: &mut DensityMatrix, spec: &NoiseSpec) -> Result<()> {
        spec.validate()?;
        self.check_limits(rho.num_qubits())?;
        let channels = spec
            .channels()
            .iter()
            .map(|c| c.operators())
            .collect::<Result<Vec<_>>>()?;
        for q in 0..rho.num_qubits() as usize {
            for ops in &channels {
                rho.apply_kraus(ops, q)?;
            }
        }
        debug!(
            "evolved {}-qubit density matrix, purity {:.6}",
            rho.num_qubits(),
            rho.purity()
        );
        Ok(())
    }

    /// unitary step on a density matrix, for circuits that keep the mixed state
    pub fn apply_gate(&self, rho: &mut DensityMatrix, op: &GateOp) -> Result<()> {
        let matrix = self.library.matrix(&op.gate)?;
        rho.apply_unitary(&matrix, &op.targets)
    }

    /// applies the channels and collapses to the dominant eigenvector of the
    /// resulting density matrix. returns that eigenvalue, the weight kept.
    pub fn apply_noise(&self, state: &mut QuantumState, spec: &NoiseSpec) -> Result<f64> {
        spec.validate()?;
        self.check_limits(state.num_qubits)?;
        if spec.is_noiseless() {
            return Ok(1.0);
        }
        let mut rho = DensityMatrix::from_pure(&state.amplitudes)?;
        self.evolve_density(&mut rho, spec)?;
        let (weight, v) = rho.dominant_eigenvector(&state.amplitudes)?;
        info!(
            "noise collapse on {} qubits kept eigen-weight {:.6} (purity {:.6})",
            state.num_qubits,
            weight,
            rho.purity()
        );
        state.amplitudes = v;
        if state.precision == crate::config::AmplitudePrecision::Complex64 {
            state.amplitudes.round_to_single();
        }
        Ok(weight)
    }
}
