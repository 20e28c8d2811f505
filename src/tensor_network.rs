// tensor-network engine: a dense state for small registers, an mps chain
// above `mps_threshold` qubits. the representation is fixed at initialize.

pub mod mps;

pub use mps::{MpsState, Truncation};

use crate::circuit::{Circuit, GateOp};
use crate::complex_vector::ComplexVector;
use crate::config::SimConfig;
use crate::error::{QsimError, Result};
use crate::gates::GateLibrary;
use crate::random::{random_state, rng_from_seed};
use crate::runtime::{DenseStateEngine, InitialState, QuantumState};
use log::info;
use num_complex::Complex64;

#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Dense(QuantumState),
    Mps(MpsState),
}

#[derive(Debug, Clone)]
pub struct TensorNetworkEngine {
    dense: DenseStateEngine,
    library: GateLibrary,
    state: Option<Representation>,
}

impl TensorNetworkEngine {
    pub fn new(config: SimConfig) -> Result<Self> {
        let dense = DenseStateEngine::new(config)?;
        let library = *dense.library();
        Ok(Self {
            dense,
            library,
            state: None,
        })
    }

    pub fn config(&self) -> &SimConfig {
        self.dense.config()
    }

    fn policy(&self) -> Truncation {
        Truncation::new(self.config().bond_dim_max, self.config().svd_cutoff)
    }

    /// picks dense or mps from the qubit count and prepares the register
    pub fn initialize(&mut self, num_qubits: u32, mode: &InitialState) -> Result<()> {
        let threshold = self.config().mps_threshold;
        let representation = if num_qubits <= threshold {
            Representation::Dense(self.dense.initialize(num_qubits, mode)?)
        } else {
            let policy = self.policy();
            let mps = match mode {
                InitialState::Zero => MpsState::zero(num_qubits, policy)?,
                InitialState::Basis { index } => MpsState::product_basis(num_qubits, *index, policy)?,
                // entangled inputs go through a dense buffer once
                InitialState::Amplitudes { .. } => {
                    let state = self.dense.initialize(num_qubits, mode)?;
                    MpsState::from_dense(&state.amplitudes, policy)?.0
                }
                InitialState::Random { seed } => {
                    self.config().check_dense_allocation(num_qubits)?;
                    let v = random_state(num_qubits, &mut rng_from_seed(*seed));
                    MpsState::from_dense(&v, policy)?.0
                }
            };
            Representation::Mps(mps)
        };
        info!(
            "tensor network initialized with {} qubits as {}",
            num_qubits,
            match representation {
                Representation::Dense(_) => "dense",
                Representation::Mps(_) => "mps",
            }
        );
        self.state = Some(representation);
        Ok(())
    }

    fn require(&self) -> Result<&Representation> {
        self.state
            .as_ref()
            .ok_or_else(|| QsimError::InvalidParameter("engine is not initialized".to_string()))
    }

    pub fn representation(&self) -> Option<&Representation> {
        self.state.as_ref()
    }

    pub fn is_mps(&self) -> bool {
        matches!(self.state, Some(Representation::Mps(_)))
    }

    pub fn num_qubits(&self) -> Result<u32> {
        Ok(match self.require()? {
            Representation::Dense(s) => s.num_qubits,
            Representation::Mps(m) => m.num_qubits(),
        })
    }

    pub fn apply_gate(&mut self, op: &GateOp) -> Result<()> {
        let matrix = self.library.matrix(&op.gate)?;
        match self.state.as_mut() {
            None => Err(QsimError::InvalidParameter("engine is not initialized".to_string())),
            Some(Representation::Dense(s)) => self.dense.apply_matrix(s, &matrix, &op.targets),
            Some(Representation::Mps(m)) => m.apply_gate(&matrix, &op.targets),
        }
    }

    pub fn apply_circuit(&mut self, circuit: &Circuit) -> Result<()> {
        for op in &circuit.ops {
            self.apply_gate(op)?;
        }
        Ok(())
    }

    pub fn amplitude(&self, index: usize) -> Result<Complex64> {
        match self.require()? {
            Representation::Dense(s) => s.amplitude(index).ok_or_else(|| {
                QsimError::InvalidDimension(format!("index {} out of range", index))
            }),
            Representation::Mps(m) => Ok(m.amplitude(index)),
        }
    }

    /// 1.0 for dense states, the truncation estimate for mps chains
    pub fn estimated_fidelity(&self) -> Result<f64> {
        Ok(match self.require()? {
            Representation::Dense(_) => 1.0,
            Representation::Mps(m) => m.estimated_fidelity(),
        })
    }

    /// entropy between qubits [0, cut) and [cut, n)
    pub fn bipartite_entropy(&self, cut: usize) -> Result<f64> {
        match self.require()? {
            Representation::Dense(s) => {
                if cut == 0 || cut >= s.num_qubits as usize {
                    return Ok(0.0);
                }
                let left: Vec<usize> = (0..cut).collect();
                self.dense.entanglement_entropy(s, &left)
            }
            Representation::Mps(m) => m.bipartite_entropy(cut),
        }
    }

    /// the full amplitude vector. mps chains are contracted, subject to the
    /// dense memory budget.
    pub fn to_state_vector(&self) -> Result<ComplexVector> {
        match self.require()? {
            Representation::Dense(s) => Ok(s.amplitudes.clone()),
            Representation::Mps(m) => {
                self.config().check_dense_allocation(m.num_qubits())?;
                m.to_dense()
            }
        }
    }

    pub fn into_representation(self) -> Option<Representation> {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::Gate;
    use crate::runtime::compute_fidelity;

    fn small_threshold() -> SimConfig {
        SimConfig {
            mps_threshold: 3,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_representation_follows_threshold() {
        let mut e = TensorNetworkEngine::new(small_threshold()).unwrap();
        assert!(e.apply_gate(&GateOp::new(Gate::H, &[0])).is_err());
        e.initialize(3, &InitialState::Zero).unwrap();
        assert!(!e.is_mps());
        e.initialize(4, &InitialState::Zero).unwrap();
        assert!(e.is_mps());
    }

    #[test]
    fn test_ghz_agrees_between_representations() {
        let circuit = Circuit::ghz(6);
        let mut mps = TensorNetworkEngine::new(small_threshold()).unwrap();
        mps.initialize(6, &InitialState::Zero).unwrap();
        mps.apply_circuit(&circuit).unwrap();

        let mut dense = TensorNetworkEngine::new(SimConfig::default()).unwrap();
        dense.initialize(6, &InitialState::Zero).unwrap();
        dense.apply_circuit(&circuit).unwrap();

        let a = mps.to_state_vector().unwrap();
        let b = dense.to_state_vector().unwrap();
        assert!(compute_fidelity(&a, &b).unwrap() > 1.0 - 1e-10);
        assert!((mps.bipartite_entropy(3).unwrap() - 1.0).abs() < 1e-10);
        assert!((dense.bipartite_entropy(3).unwrap() - 1.0).abs() < 1e-10);
        assert!((mps.amplitude(63).unwrap().re - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-10);
    }

    #[test]
    fn test_dense_entropy_uses_the_engine_density_ceiling() {
        let tight = SimConfig {
            max_density_qubits: 3,
            ..SimConfig::default()
        };
        let mut e = TensorNetworkEngine::new(tight).unwrap();
        e.initialize(6, &InitialState::Zero).unwrap();
        assert!(!e.is_mps());
        assert!(matches!(
            e.bipartite_entropy(3),
            Err(QsimError::ScalingLimitExceeded { .. })
        ));

        // above the default ceiling of 14
        let loose = SimConfig {
            max_density_qubits: 16,
            mps_threshold: 16,
            ..SimConfig::default()
        };
        let mut e = TensorNetworkEngine::new(loose).unwrap();
        e.initialize(15, &InitialState::Zero).unwrap();
        assert!(!e.is_mps());
        assert!(e.bipartite_entropy(1).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_large_product_register_stays_cheap() {
        let mut e = TensorNetworkEngine::new(SimConfig::default()).unwrap();
        e.initialize(40, &InitialState::Zero).unwrap();
        for q in 0..40 {
            e.apply_gate(&GateOp::new(Gate::Ry { theta: 0.3 }, &[q])).unwrap();
        }
        if let Some(Representation::Mps(m)) = e.representation() {
            assert_eq!(m.max_bond_dim(), 1);
            assert!((m.norm_squared() - 1.0).abs() < 1e-10);
        } else {
            panic!("expected an mps representation");
        }
        assert!((e.estimated_fidelity().unwrap() - 1.0).abs() < 1e-15);
    }
}
