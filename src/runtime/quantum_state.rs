use crate::complex_vector::ComplexVector;
use crate::config::AmplitudePrecision;
use crate::error::{QsimError, Result};
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// how `DenseStateEngine::initialize` fills a fresh register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum InitialState {
    /// |0...0⟩
    #[default]
    Zero,
    Basis { index: usize },
    // normalized on load; must hold exactly 2^n entries
    Amplitudes { amplitudes: Vec<Complex64> },
    /// haar-like random state from its own seed
    Random { seed: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantumState {
    pub num_qubits: u32,
    pub amplitudes: ComplexVector,
    pub seed: u64,
    pub precision: AmplitudePrecision,
}

impl QuantumState {
    /// wraps an existing buffer, normalizing it. the buffer must be 2^n long
    /// and non-zero.
    pub fn from_vector(amplitudes: ComplexVector, seed: u64) -> Result<Self> {
        let num_qubits = amplitudes.num_qubits().ok_or_else(|| {
            QsimError::InvalidDimension(format!(
                "amplitude buffer length {} is not a power of two",
                amplitudes.len()
            ))
        })?;
        if num_qubits == 0 {
            return Err(QsimError::InvalidDimension(
                "a state needs at least one qubit".to_string(),
            ));
        }
        if !amplitudes.is_finite() {
            return Err(QsimError::InvalidParameter(
                "amplitude buffer contains non-finite values".to_string(),
            ));
        }
        let mut amplitudes = amplitudes;
        if amplitudes.normalize() == 0.0 {
            return Err(QsimError::InvalidParameter(
                "amplitude buffer has zero norm".to_string(),
            ));
        }
        Ok(Self {
            num_qubits,
            amplitudes,
            seed,
            precision: AmplitudePrecision::Complex128,
        })
    }

    pub fn dim(&self) -> usize {
        self.amplitudes.len()
    }

    pub fn amplitude(&self, index: usize) -> Option<Complex64> {
        self.amplitudes.as_slice().get(index).copied()
    }

    pub fn norm(&self) -> f64 {
        self.amplitudes.norm()
    }

    pub fn is_normalized(&self, tolerance: f64) -> bool {
        (self.norm() - 1.0).abs() <= tolerance
    }

    // |amplitude|^2 for every basis state, without measuring
    pub fn probabilities(&self) -> Vec<f64> {
        self.amplitudes
            .as_slice()
            .par_iter()
            .map(|a| a.norm_sqr())
            .collect()
    }

    /// rescales to unit norm if the drift exceeds `tolerance`; returns true
    /// when it had to
    pub fn renormalize(&mut self, tolerance: f64) -> bool {
        let norm = self.norm();
        if (norm - 1.0).abs() > tolerance && norm > 0.0 {
            self.amplitudes.normalize();
            true
        } else {
            false
        }
    }

    /// little-endian bytes of every amplitude at the state's precision
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_amplitudes(self.amplitudes.as_slice(), self.precision)
    }
}

pub(crate) fn encode_amplitudes(amps: &[Complex64], precision: AmplitudePrecision) -> Vec<u8> {
    let mut out = Vec::with_capacity(amps.len() * precision.bytes_per_amplitude());
    for a in amps {
        match precision {
            AmplitudePrecision::Complex64 => {
                out.extend_from_slice(&(a.re as f32).to_le_bytes());
                out.extend_from_slice(&(a.im as f32).to_le_bytes());
            }
            AmplitudePrecision::Complex128 => {
                out.extend_from_slice(&a.re.to_le_bytes());
                out.extend_from_slice(&a.im.to_le_bytes());
            }
        }
    }
    out
}

pub(crate) fn decode_amplitudes(bytes: &[u8], precision: AmplitudePrecision) -> Result<Vec<Complex64>> {
    let width = precision.bytes_per_amplitude();
    if bytes.len() % width != 0 {
        return Err(QsimError::InvalidDimension(format!(
            "payload of {} bytes is not a multiple of {}",
            bytes.len(),
            width
        )));
    }
    let half = width / 2;
    let amps = bytes
        .chunks_exact(width)
        .map(|chunk| {
            let (re, im) = chunk.split_at(half);
            match precision {
                AmplitudePrecision::Complex64 => {
                    let mut r = [0u8; 4];
                    let mut i = [0u8; 4];
                    r.copy_from_slice(re);
                    i.copy_from_slice(im);
                    Complex64::new(f32::from_le_bytes(r) as f64, f32::from_le_bytes(i) as f64)
                }
                AmplitudePrecision::Complex128 => {
                    let mut r = [0u8; 8];
                    let mut i = [0u8; 8];
                    r.copy_from_slice(re);
                    i.copy_from_slice(im);
                    Complex64::new(f64::from_le_bytes(r), f64::from_le_bytes(i))
                }
            }
        })
        .collect();
    Ok(amps)
}
