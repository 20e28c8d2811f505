// lossy dense -> mps compression with a fidelity contract
//
// the per-cut discard budget starts at (1 - f) / (n - 1) and is halved until
// the exact fidelity of the reconstruction reaches the target. the reported
// fidelity is always measured on the decompressed state, never estimated.
// a target of 1.0 means lossless up to rounding and is met at
// `LOSSLESS_FIDELITY`.

use crate::config::{AmplitudePrecision, SimConfig};
use crate::error::{QsimError, Result};
use crate::runtime::{compute_fidelity, QuantumState};
use crate::tensor_network::{MpsState, Truncation};
use log::{debug, info};
use serde::{Deserialize, Serialize};

// halvings of the discard budget before the last, truncation-free attempt
const BUDGET_HALVINGS: usize = 6;
/// highest fidelity a compression is held to; an exact reconstruction only
/// reaches 1.0 up to rounding
pub const LOSSLESS_FIDELITY: f64 = 1.0 - 1e-12;

/// immutable result of `compress_state`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedState {
    pub mps: MpsState,
    pub fidelity_achieved: f64,
    /// stored mps entries over dense entries
    pub compression_ratio: f64,
    pub original_num_qubits: u32,
    pub seed: u64,
    pub precision: AmplitudePrecision,
}

#[derive(Debug, Clone, Copy)]
pub struct StateCompressor {
    bond_dim_max: usize,
}

impl StateCompressor {
    pub fn new(bond_dim_max: usize) -> Self {
        Self {
            bond_dim_max: bond_dim_max.max(1),
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.bond_dim_max)
    }

    pub fn bond_dim_max(&self) -> usize {
        self.bond_dim_max
    }

    /// compresses to the smallest chain found whose exact fidelity reaches
    /// `min(target_fidelity, LOSSLESS_FIDELITY)`; `fidelity_achieved` is
    /// never below that value.
    pub fn compress_state(&self, state: &QuantumState, target_fidelity: f64) -> Result<CompressedState> {
        if !(target_fidelity > 0.0 && target_fidelity <= 1.0) {
            return Err(QsimError::InvalidParameter(format!(
                "target fidelity must be in (0, 1], got {}",
                target_fidelity
            )));
        }
        let target_fidelity = target_fidelity.min(LOSSLESS_FIDELITY);
        let n = state.num_qubits;
        let cuts = n.saturating_sub(1).max(1) as f64;
        let initial_budget = (1.0 - target_fidelity) / cuts;

        let budgets = (0..BUDGET_HALVINGS)
            .map(|i| initial_budget / (1u64 << i) as f64)
            .filter(|&b| b > 0.0)
            .chain(std::iter::once(0.0));

        let mut best = 0.0f64;
        for budget in budgets {
            let policy = Truncation {
                max_bond: self.bond_dim_max,
                cutoff: 0.0,
                max_discarded: budget,
            };
            let (mps, _) = MpsState::from_dense(&state.amplitudes, policy)?;
            let achieved = compute_fidelity(&mps.to_dense()?, &state.amplitudes)?;
            debug!(
                "compression budget {:.3e}: max bond {}, fidelity {:.9}",
                budget,
                mps.max_bond_dim(),
                achieved
            );
            best = best.max(achieved);
            if achieved >= target_fidelity {
                let compression_ratio = mps.num_parameters() as f64 / state.dim() as f64;
                info!(
                    "compressed {} qubits: fidelity {:.9} (target {}), ratio {:.4}, max bond {}",
                    n,
                    achieved,
                    target_fidelity,
                    compression_ratio,
                    mps.max_bond_dim()
                );
                return Ok(CompressedState {
                    mps,
                    fidelity_achieved: achieved,
                    compression_ratio,
                    original_num_qubits: n,
                    seed: state.seed,
                    precision: state.precision,
                });
            }
        }
        Err(QsimError::FidelityNotAchievable {
            target: target_fidelity,
            achieved: best,
            bond_dim_max: self.bond_dim_max,
        })
    }

    /// contracts the chain into a new normalized state; the input is untouched
    pub fn decompress(&self, compressed: &CompressedState) -> Result<QuantumState> {
        decompress(compressed)
    }
}

pub fn decompress(compressed: &CompressedState) -> Result<QuantumState> {
    let vector = compressed.mps.to_dense()?;
    let mut state = QuantumState::from_vector(vector, compressed.seed)?;
    state.precision = compressed.precision;
    if state.precision == AmplitudePrecision::Complex64 {
        state.amplitudes.round_to_single();
    }
    Ok(state)
}
