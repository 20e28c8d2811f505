use crate::error::{QsimError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// buffers alive at the peak of `contract_targets`, in units of the buffer
/// being contracted
pub const CONTRACTION_WORKING_SET: u128 = 3;

/// storage type of the amplitude buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AmplitudePrecision {
    // amplitudes are rounded through f32 after every mutation
    Complex64,
    #[default]
    Complex128,
}

impl AmplitudePrecision {
    pub fn bytes_per_amplitude(self) -> usize {
        match self {
            AmplitudePrecision::Complex64 => 8,
            AmplitudePrecision::Complex128 => 16,
        }
    }
}

/// storage precision of intermediate gate matrices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatePrecision {
    #[default]
    Fp64,
    Fp32,
    Fp16,
    Fp8,
}

impl GatePrecision {
    // explicit mantissa width; exponent range is not emulated
    pub fn mantissa_bits(self) -> u32 {
        match self {
            GatePrecision::Fp64 => 52,
            GatePrecision::Fp32 => 23,
            GatePrecision::Fp16 => 10,
            GatePrecision::Fp8 => 3,
        }
    }
}

// configuration shared by all engines. every field has a default so a partial
// json file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub max_qubits: u32,
    pub memory_budget_bytes: u64,
    pub amplitude_precision: AmplitudePrecision,
    pub gate_precision: GatePrecision,
    pub max_density_qubits: u32,
    pub mps_threshold: u32,
    pub bond_dim_max: usize,
    pub svd_cutoff: f64,
    pub norm_tolerance: f64,
    pub seed: u64,
    pub comm_timeout_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_qubits: 32,
            memory_budget_bytes: 4 * 1024 * 1024 * 1024, // 4 gb
            amplitude_precision: AmplitudePrecision::Complex128,
            gate_precision: GatePrecision::Fp64,
            max_density_qubits: 14,
            mps_threshold: 12,
            bond_dim_max: 64,
            svd_cutoff: 1e-12,
            norm_tolerance: 1e-8,
            seed: 0,
            comm_timeout_ms: 30_000,
        }
    }
}

impl SimConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: SimConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_qubits == 0 || self.max_qubits > 62 {
            return Err(QsimError::InvalidParameter(format!(
                "max_qubits must be in 1..=62, got {}",
                self.max_qubits
            )));
        }
        if self.bond_dim_max == 0 {
            return Err(QsimError::InvalidParameter(
                "bond_dim_max must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.svd_cutoff) {
            return Err(QsimError::InvalidParameter(format!(
                "svd_cutoff must be in [0, 1), got {}",
                self.svd_cutoff
            )));
        }
        if !(self.norm_tolerance > 0.0 && self.norm_tolerance < 1e-2) {
            return Err(QsimError::InvalidParameter(format!(
                "norm_tolerance must be in (0, 1e-2), got {}",
                self.norm_tolerance
            )));
        }
        if self.max_density_qubits > self.max_qubits {
            return Err(QsimError::InvalidParameter(
                "max_density_qubits cannot exceed max_qubits".to_string(),
            ));
        }
        Ok(())
    }

    /// bytes a dense buffer of `num_qubits` needs at the configured precision
    pub fn dense_bytes(&self, num_qubits: u32) -> u128 {
        (self.amplitude_precision.bytes_per_amplitude() as u128) << num_qubits
    }

    /// peak bytes while a gate runs on a dense state: the state plus the
    /// permuted block and the product that the contraction holds
    pub fn dense_working_set(&self, num_qubits: u32) -> u128 {
        self.dense_bytes(num_qubits) * CONTRACTION_WORKING_SET
    }

    /// peak bytes of a density-matrix step on `num_qubits`. saturates instead
    /// of wrapping for very large ceilings.
    pub fn density_working_set(&self, num_qubits: u32) -> u128 {
        1u128
            .checked_shl(2 * num_qubits)
            .and_then(|entries| entries.checked_mul(16 * CONTRACTION_WORKING_SET))
            .unwrap_or(u128::MAX)
    }

    // checks the qubit ceiling and the memory budget before any allocation
    pub fn check_dense_allocation(&self, num_qubits: u32) -> Result<()> {
        if num_qubits < 1 || num_qubits > self.max_qubits {
            return Err(QsimError::InvalidDimension(format!(
                "qubit count {} outside 1..={}",
                num_qubits, self.max_qubits
            )));
        }
        let required = self.dense_working_set(num_qubits);
        if required > self.memory_budget_bytes as u128 {
            return Err(QsimError::InvalidDimension(format!(
                "{} qubits need {} bytes while a gate runs, memory budget is {} bytes",
                num_qubits, required, self.memory_budget_bytes
            )));
        }
        Ok(())
    }

    pub fn check_density_limit(&self, operation: &'static str, num_qubits: u32) -> Result<()> {
        if num_qubits > self.max_density_qubits {
            return Err(QsimError::scaling(
                operation,
                format!("{} qubits", num_qubits),
                format!("{} qubits", self.max_density_qubits),
            ));
        }
        Ok(())
    }
}
