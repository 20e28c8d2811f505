// gate library: closed set of named gates plus a custom-matrix escape hatch,
// mapped to dense unitaries.
//
// multi-qubit matrices are written in the basis |t0 t1 ...⟩ where the first
// target is the most significant bit, so CNOT on targets [c, t] is the usual
// textbook matrix with the control first.

use crate::config::GatePrecision;
use crate::error::{QsimError, Result};
use ndarray::{Array2, ArrayView2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, FRAC_PI_4};

const UNITARY_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "UPPERCASE")]
pub enum Gate {
    H,
    X,
    Y,
    Z,
    S,
    Sdg,
    T,
    Tdg,
    Rx { theta: f64 },
    Ry { theta: f64 },
    Rz { theta: f64 },
    Phase { theta: f64 },
    Cnot,
    Cz,
    Swap,
    CPhase { theta: f64 },
    Toffoli,
    Fredkin,
    Custom { matrix: GateMatrix },
}

impl Gate {
    /// number of qubits the gate acts on. custom matrices that are not
    /// 2^k x 2^k report `None`.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Gate::H
            | Gate::X
            | Gate::Y
            | Gate::Z
            | Gate::S
            | Gate::Sdg
            | Gate::T
            | Gate::Tdg
            | Gate::Rx { .. }
            | Gate::Ry { .. }
            | Gate::Rz { .. }
            | Gate::Phase { .. } => Some(1),
            Gate::Cnot | Gate::Cz | Gate::Swap | Gate::CPhase { .. } => Some(2),
            Gate::Toffoli | Gate::Fredkin => Some(3),
            Gate::Custom { matrix } => matrix.num_qubits(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Gate::H => "H",
            Gate::X => "X",
            Gate::Y => "Y",
            Gate::Z => "Z",
            Gate::S => "S",
            Gate::Sdg => "SDG",
            Gate::T => "T",
            Gate::Tdg => "TDG",
            Gate::Rx { .. } => "RX",
            Gate::Ry { .. } => "RY",
            Gate::Rz { .. } => "RZ",
            Gate::Phase { .. } => "PHASE",
            Gate::Cnot => "CNOT",
            Gate::Cz => "CZ",
            Gate::Swap => "SWAP",
            Gate::CPhase { .. } => "CPHASE",
            Gate::Toffoli => "TOFFOLI",
            Gate::Fredkin => "FREDKIN",
            Gate::Custom { .. } => "CUSTOM",
        }
    }

    pub fn inverse(&self) -> Gate {
        match self {
            Gate::S => Gate::Sdg,
            Gate::Sdg => Gate::S,
            Gate::T => Gate::Tdg,
            Gate::Tdg => Gate::T,
            Gate::Rx { theta } => Gate::Rx { theta: -theta },
            Gate::Ry { theta } => Gate::Ry { theta: -theta },
            Gate::Rz { theta } => Gate::Rz { theta: -theta },
            Gate::Phase { theta } => Gate::Phase { theta: -theta },
            Gate::CPhase { theta } => Gate::CPhase { theta: -theta },
            Gate::Custom { matrix } => Gate::Custom {
                matrix: matrix.adjoint(),
            },
            other => other.clone(),
        }
    }

    /// true when the matrix is diagonal in the computational basis
    pub fn is_diagonal(&self) -> bool {
        matches!(
            self,
            Gate::Z
                | Gate::S
                | Gate::Sdg
                | Gate::T
                | Gate::Tdg
                | Gate::Rz { .. }
                | Gate::Phase { .. }
                | Gate::Cz
                | Gate::CPhase { .. }
        )
    }
}

/// dense square matrix, row-major. deserialized matrices go through
/// [`GateMatrix::new`], so `data.len() == dim * dim` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGateMatrix")]
pub struct GateMatrix {
    dim: usize,
    data: Vec<Complex64>,
}

// wire shape of a gate matrix before validation
#[derive(Deserialize)]
struct RawGateMatrix {
    dim: usize,
    data: Vec<Complex64>,
}

impl TryFrom<RawGateMatrix> for GateMatrix {
    type Error = QsimError;

    fn try_from(raw: RawGateMatrix) -> Result<Self> {
        GateMatrix::new(raw.dim, raw.data)
    }
}

impl GateMatrix {
    pub fn new(dim: usize, data: Vec<Complex64>) -> Result<Self> {
        if dim == 0 || data.len() != dim * dim {
            return Err(QsimError::InvalidGate(format!(
                "matrix data of length {} does not form a {}x{} matrix",
                data.len(),
                dim,
                dim
            )));
        }
        Ok(Self { dim, data })
    }

    fn from_real(dim: usize, values: &[f64]) -> Self {
        Self {
            dim,
            data: values.iter().map(|&v| Complex64::new(v, 0.0)).collect(),
        }
    }

    fn diagonal(entries: &[Complex64]) -> Self {
        let dim = entries.len();
        let mut data = vec![Complex64::new(0.0, 0.0); dim * dim];
        for (i, &e) in entries.iter().enumerate() {
            data[i * dim + i] = e;
        }
        Self { dim, data }
    }

    pub fn identity(dim: usize) -> Self {
        Self::diagonal(&vec![Complex64::new(1.0, 0.0); dim])
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_qubits(&self) -> Option<usize> {
        if self.dim.is_power_of_two() && self.dim >= 2 {
            Some(self.dim.trailing_zeros() as usize)
        } else {
            None
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> Complex64 {
        self.data[row * self.dim + col]
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    pub fn view(&self) -> ArrayView2<'_, Complex64> {
        // shape always matches, checked in `new`
        ArrayView2::from_shape((self.dim, self.dim), &self.data)
            .unwrap_or_else(|_| unreachable!("gate matrix shape invariant"))
    }

    pub fn to_array(&self) -> Array2<Complex64> {
        self.view().to_owned()
    }

    pub fn adjoint(&self) -> Self {
        let dim = self.dim;
        let mut data = vec![Complex64::new(0.0, 0.0); dim * dim];
        for r in 0..dim {
            for c in 0..dim {
                data[c * dim + r] = self.data[r * dim + c].conj();
            }
        }
        Self { dim, data }
    }

    pub fn matmul(&self, other: &GateMatrix) -> Result<GateMatrix> {
        if self.dim != other.dim {
            return Err(QsimError::InvalidGate(format!(
                "cannot multiply {}x{} by {}x{}",
                self.dim, self.dim, other.dim, other.dim
            )));
        }
        let product = self.view().dot(&other.view());
        Ok(Self {
            dim: self.dim,
            data: product.iter().copied().collect(),
        })
    }

    /// largest entrywise deviation of U·U† from the identity
    pub fn unitarity_error(&self) -> f64 {
        let u = self.view();
        let product = u.dot(&u.t().mapv(|z| z.conj()));
        product
            .indexed_iter()
            .map(|((r, c), z)| {
                let expected = if r == c { 1.0 } else { 0.0 };
                (z - Complex64::new(expected, 0.0)).norm()
            })
            .fold(0.0, f64::max)
    }

    pub fn is_unitary(&self) -> bool {
        self.unitarity_error() < UNITARY_TOLERANCE
    }

    fn quantized(mut self, precision: GatePrecision) -> Self {
        let bits = precision.mantissa_bits();
        if bits < 52 {
            self.data.iter_mut().for_each(|z| {
                *z = Complex64::new(quantize(z.re, bits), quantize(z.im, bits));
            });
        }
        self
    }
}

/// rounds `x` to `mantissa_bits` explicit mantissa bits (round half up on the
/// bit pattern, which carries into the exponent correctly)
pub fn quantize(x: f64, mantissa_bits: u32) -> f64 {
    if mantissa_bits >= 52 || x == 0.0 || !x.is_finite() {
        return x;
    }
    let shift = 52 - mantissa_bits;
    let half = 1u64 << (shift - 1);
    let mask = !((1u64 << shift) - 1);
    f64::from_bits((x.to_bits() + half) & mask)
}

pub fn pauli_x() -> GateMatrix {
    GateMatrix::from_real(2, &[0.0, 1.0, 1.0, 0.0])
}

pub fn pauli_y() -> GateMatrix {
    let z = Complex64::new(0.0, 0.0);
    GateMatrix {
        dim: 2,
        data: vec![z, Complex64::new(0.0, -1.0), Complex64::new(0.0, 1.0), z],
    }
}

pub fn pauli_z() -> GateMatrix {
    GateMatrix::from_real(2, &[1.0, 0.0, 0.0, -1.0])
}

/// maps gates to dense unitaries at a fixed storage precision
#[derive(Debug, Clone, Copy, Default)]
pub struct GateLibrary {
    precision: GatePrecision,
}

impl GateLibrary {
    pub fn new(precision: GatePrecision) -> Self {
        Self { precision }
    }

    pub fn precision(&self) -> GatePrecision {
        self.precision
    }

    pub fn matrix(&self, gate: &Gate) -> Result<GateMatrix> {
        let one = Complex64::new(1.0, 0.0);
        let m = match gate {
            Gate::H => GateMatrix::from_real(
                2,
                &[FRAC_1_SQRT_2, FRAC_1_SQRT_2, FRAC_1_SQRT_2, -FRAC_1_SQRT_2],
            ),
            Gate::X => pauli_x(),
            Gate::Y => pauli_y(),
            Gate::Z => pauli_z(),
            Gate::S => GateMatrix::diagonal(&[one, Complex64::from_polar(1.0, FRAC_PI_2)]),
            Gate::Sdg => GateMatrix::diagonal(&[one, Complex64::from_polar(1.0, -FRAC_PI_2)]),
            Gate::T => GateMatrix::diagonal(&[one, Complex64::from_polar(1.0, FRAC_PI_4)]),
            Gate::Tdg => GateMatrix::diagonal(&[one, Complex64::from_polar(1.0, -FRAC_PI_4)]),
            Gate::Rx { theta } => {
                let c = Complex64::new((theta / 2.0).cos(), 0.0);
                let s = Complex64::new(0.0, -(theta / 2.0).sin());
                GateMatrix {
                    dim: 2,
                    data: vec![c, s, s, c],
                }
            }
            Gate::Ry { theta } => {
                let (s, c) = (theta / 2.0).sin_cos();
                GateMatrix::from_real(2, &[c, -s, s, c])
            }
            Gate::Rz { theta } => GateMatrix::diagonal(&[
                Complex64::from_polar(1.0, -theta / 2.0),
                Complex64::from_polar(1.0, theta / 2.0),
            ]),
            Gate::Phase { theta } => {
                GateMatrix::diagonal(&[one, Complex64::from_polar(1.0, *theta)])
            }
            Gate::Cnot => GateMatrix::from_real(
                4,
                &[
                    1.0, 0.0, 0.0, 0.0, //
                    0.0, 1.0, 0.0, 0.0, //
                    0.0, 0.0, 0.0, 1.0, //
                    0.0, 0.0, 1.0, 0.0,
                ],
            ),
            Gate::Cz => GateMatrix::diagonal(&[one, one, one, -one]),
            Gate::Swap => GateMatrix::from_real(
                4,
                &[
                    1.0, 0.0, 0.0, 0.0, //
                    0.0, 0.0, 1.0, 0.0, //
                    0.0, 1.0, 0.0, 0.0, //
                    0.0, 0.0, 0.0, 1.0,
                ],
            ),
            Gate::CPhase { theta } => {
                GateMatrix::diagonal(&[one, one, one, Complex64::from_polar(1.0, *theta)])
            }
            Gate::Toffoli => controlled_permutation(8, 6, 7),
            Gate::Fredkin => controlled_permutation(8, 5, 6),
            Gate::Custom { matrix } => {
                if matrix.num_qubits().is_none() {
                    return Err(QsimError::InvalidGate(format!(
                        "custom matrix dimension {} is not a power of two",
                        matrix.dim
                    )));
                }
                let err = matrix.unitarity_error();
                if err >= UNITARY_TOLERANCE {
                    return Err(QsimError::InvalidGate(format!(
                        "custom matrix is not unitary (deviation {:.3e})",
                        err
                    )));
                }
                matrix.clone()
            }
        };
        Ok(m.quantized(self.precision))
    }
}

// identity with rows `a` and `b` exchanged
fn controlled_permutation(dim: usize, a: usize, b: usize) -> GateMatrix {
    let mut m = GateMatrix::identity(dim);
    let zero = Complex64::new(0.0, 0.0);
    let one = Complex64::new(1.0, 0.0);
    m.data[a * dim + a] = zero;
    m.data[b * dim + b] = zero;
    m.data[a * dim + b] = one;
    m.data[b * dim + a] = one;
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_gates() -> Vec<Gate> {
        vec![
            Gate::H,
            Gate::X,
            Gate::Y,
            Gate::Z,
            Gate::S,
            Gate::Sdg,
            Gate::T,
            Gate::Tdg,
            Gate::Rx { theta: 0.3 },
            Gate::Ry { theta: -1.2 },
            Gate::Rz { theta: 2.5 },
            Gate::Phase { theta: 0.7 },
            Gate::Cnot,
            Gate::Cz,
            Gate::Swap,
            Gate::CPhase { theta: 1.1 },
            Gate::Toffoli,
            Gate::Fredkin,
        ]
    }

    #[test]
    fn test_library_matrices_are_unitary_with_matching_arity() {
        let lib = GateLibrary::default();
        for gate in all_gates() {
            let m = lib.matrix(&gate).unwrap();
            assert!(m.is_unitary(), "{} is not unitary", gate.name());
            assert_eq!(m.num_qubits(), gate.arity(), "{}", gate.name());
        }
    }

    #[test]
    fn test_inverse_multiplies_to_identity() {
        let lib = GateLibrary::default();
        for gate in all_gates() {
            let m = lib.matrix(&gate).unwrap();
            let inv = lib.matrix(&gate.inverse()).unwrap();
            let product = m.matmul(&inv).unwrap();
            let identity = GateMatrix::identity(m.dim());
            for (a, b) in product.as_slice().iter().zip(identity.as_slice()) {
                assert!((a - b).norm() < 1e-12, "{} inverse failed", gate.name());
            }
        }
    }

    #[test]
    fn test_toffoli_flips_only_when_both_controls_set() {
        let m = GateLibrary::default().matrix(&Gate::Toffoli).unwrap();
        assert_eq!(m.get(7, 6), Complex64::new(1.0, 0.0));
        assert_eq!(m.get(6, 7), Complex64::new(1.0, 0.0));
        assert_eq!(m.get(5, 5), Complex64::new(1.0, 0.0));
    }

    #[test]
    fn test_custom_matrix_validation() {
        let lib = GateLibrary::default();
        let not_unitary = GateMatrix::from_real(2, &[1.0, 1.0, 0.0, 1.0]);
        assert!(matches!(
            lib.matrix(&Gate::Custom { matrix: not_unitary }),
            Err(QsimError::InvalidGate(_))
        ));
        assert!(GateMatrix::new(3, vec![Complex64::new(0.0, 0.0); 8]).is_err());
        let odd = GateMatrix::identity(3);
        assert!(lib.matrix(&Gate::Custom { matrix: odd }).is_err());
    }

    #[test]
    fn test_quantize_keeps_requested_mantissa() {
        let x = 1.0 / 3.0;
        assert_eq!(quantize(x, 52), x);
        assert!((quantize(x, 23) - (x as f32 as f64)).abs() < 1e-9);
        let half = quantize(x, 10);
        assert!((half - x).abs() < 1e-3 && half != x);
        let fp16 = GateLibrary::new(GatePrecision::Fp16).matrix(&Gate::H).unwrap();
        assert!(fp16.unitarity_error() < 1e-2);
    }

    #[test]
    fn test_gate_json_shape() {
        let json = serde_json::to_string(&Gate::Rx { theta: 0.5 }).unwrap();
        assert_eq!(json, r#"{"name":"RX","theta":0.5}"#);
        let back: Gate = serde_json::from_str(r#"{"name":"CNOT"}"#).unwrap();
        assert_eq!(back, Gate::Cnot);
    }

    #[test]
    fn test_malformed_matrix_json_is_rejected() {
        let short = r#"{"dim":2,"data":[[1.0,0.0],[0.0,0.0],[0.0,0.0]]}"#;
        let err = serde_json::from_str::<GateMatrix>(short).unwrap_err();
        assert!(err.to_string().contains("does not form a 2x2 matrix"), "{}", err);

        let gate = r#"{"name":"CUSTOM","matrix":{"dim":2,"data":[[1.0,0.0],[0.0,0.0],[0.0,0.0]]}}"#;
        assert!(serde_json::from_str::<Gate>(gate).is_err());

        let ok = r#"{"dim":2,"data":[[0.0,0.0],[1.0,0.0],[1.0,0.0],[0.0,0.0]]}"#;
        let x: GateMatrix = serde_json::from_str(ok).unwrap();
        assert_eq!(x, pauli_x());
        assert_eq!(x.adjoint(), pauli_x());
    }
}
