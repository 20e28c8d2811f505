// in-process entry point for a job worker: run a circuit from an initial
// state and return the amplitudes, the probabilities and metadata describing
// how they were produced.

use crate::circuit::Circuit;
use crate::config::{AmplitudePrecision, GatePrecision, SimConfig};
use crate::error::{QsimError, Result};
use crate::noise::{NoiseEngine, NoiseSpec};
use crate::runtime::{InitialState, QuantumState};
use crate::tensor_network::{Representation, TensorNetworkEngine};
use log::info;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// everything needed to reproduce a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub circuit: Circuit,
    #[serde(default)]
    pub initial_state: InitialState,
    /// applied once after the circuit, collapsing to a pure state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<NoiseSpec>,
    #[serde(default)]
    pub config: SimConfig,
}

impl SimulationRequest {
    pub fn new(circuit: Circuit, initial_state: InitialState) -> Self {
        Self {
            circuit,
            initial_state,
            noise: None,
            config: SimConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    pub num_qubits: u32,
    /// number of gates; every gate is treated as dependent on the previous one
    pub circuit_depth: usize,
    pub seed: u64,
    pub precision: AmplitudePrecision,
    pub gate_precision: GatePrecision,
    /// "dense" or "mps"
    pub representation: String,
    pub max_bond_dim: Option<usize>,
    /// 1.0 unless mps truncation discarded weight
    pub estimated_fidelity: f64,
    pub noise_applied: bool,
    /// eigen-weight kept by the noise collapse
    pub noise_weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub state_vector: Vec<Complex64>,
    pub probabilities: Vec<f64>,
    pub metadata: SimulationMetadata,
}

impl SimulationResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// runs `circuit` with the default configuration
pub fn simulate(circuit: &Circuit, initial_state: &InitialState) -> Result<SimulationResult> {
    run(&SimulationRequest::new(circuit.clone(), initial_state.clone()))
}

pub fn run(request: &SimulationRequest) -> Result<SimulationResult> {
    let config = &request.config;
    let circuit = &request.circuit;
    if circuit.num_qubits == 0 {
        return Err(QsimError::InvalidDimension("circuit declares no qubits".to_string()));
    }

    let mut engine = TensorNetworkEngine::new(config.clone())?;
    engine.initialize(circuit.num_qubits, &request.initial_state)?;
    engine.apply_circuit(circuit)?;
    let estimated_fidelity = engine.estimated_fidelity()?;
    let amplitudes = engine.to_state_vector()?;

    let (representation, max_bond_dim, mut state) = match engine.into_representation() {
        Some(Representation::Dense(state)) => ("dense", None, state),
        Some(Representation::Mps(mps)) => {
            let mut state = QuantumState::from_vector(amplitudes, config.seed)?;
            state.precision = config.amplitude_precision;
            if state.precision == AmplitudePrecision::Complex64 {
                state.amplitudes.round_to_single();
            }
            ("mps", Some(mps.max_bond_dim()), state)
        }
        None => return Err(QsimError::InvalidParameter("engine is not initialized".to_string())),
    };

    let noise_weight = match &request.noise {
        Some(spec) if !spec.is_noiseless() => {
            Some(NoiseEngine::new(config.clone())?.apply_noise(&mut state, spec)?)
        }
        _ => None,
    };

    let metadata = SimulationMetadata {
        num_qubits: state.num_qubits,
        circuit_depth: circuit.depth(),
        seed: state.seed,
        precision: state.precision,
        gate_precision: config.gate_precision,
        representation: representation.to_string(),
        max_bond_dim,
        estimated_fidelity,
        noise_applied: noise_weight.is_some(),
        noise_weight,
    };
    info!(
        "simulated {} qubits, depth {} ({})",
        metadata.num_qubits, metadata.circuit_depth, metadata.representation
    );
    Ok(SimulationResult {
        probabilities: state.probabilities(),
        state_vector: state.amplitudes.into_vec(),
        metadata,
    })
}
