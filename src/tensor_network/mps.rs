// matrix product states
//
// site j holds qubit j as a rank-3 tensor with axes (left bond, physical,
// right bond); the outer bonds have dimension 1. bond dimensions are capped
// by a `Truncation` policy after every svd split, and the discarded schmidt
// weight is tracked as a running fidelity estimate.
//
// gates on non-adjacent qubits are routed with swap chains: targets are
// bubbled down to a contiguous block starting at the lowest target, the block
// update runs, and the swaps are undone in reverse order.

use crate::complex_vector::ComplexVector;
use crate::config::GatePrecision;
use crate::error::{QsimError, Result};
use crate::gates::{Gate, GateLibrary, GateMatrix};
use crate::runtime::diagnostics::{hermitian_spectrum, EIGENVALUE_FLOOR};
use crate::runtime::validate_targets;
use log::{debug, warn};
use nalgebra::DMatrix;
use ndarray::{s, Array2, Array3, ArrayBase, ArrayD, ArrayViewD, Axis, Data, Dimension, IxDyn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// amplitudes are addressed by `usize` bit patterns
pub const MAX_MPS_QUBITS: u32 = 63;

fn shape_err(e: ndarray::ShapeError) -> QsimError {
    QsimError::InvalidDimension(e.to_string())
}

fn flat<S, D>(a: &ArrayBase<S, D>) -> Vec<Complex64>
where
    S: Data<Elem = Complex64>,
    D: Dimension,
{
    a.iter().copied().collect()
}

fn matrix<S, D>(a: &ArrayBase<S, D>, rows: usize, cols: usize) -> Result<Array2<Complex64>>
where
    S: Data<Elem = Complex64>,
    D: Dimension,
{
    Array2::from_shape_vec((rows, cols), flat(a)).map_err(shape_err)
}

fn tensor<S, D>(a: &ArrayBase<S, D>, shape: (usize, usize, usize)) -> Result<Array3<Complex64>>
where
    S: Data<Elem = Complex64>,
    D: Dimension,
{
    Array3::from_shape_vec(shape, flat(a)).map_err(shape_err)
}

/// how many singular values survive a split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Truncation {
    /// hard bond dimension ceiling
    pub max_bond: usize,
    /// drop values with s_i / s_0 below this
    pub cutoff: f64,
    /// largest discarded fraction of Σ s² allowed at one cut
    pub max_discarded: f64,
}

impl Truncation {
    pub fn new(max_bond: usize, cutoff: f64) -> Self {
        Self {
            max_bond: max_bond.max(1),
            cutoff,
            max_discarded: 0.0,
        }
    }

    /// number of values to keep from `s` (sorted descending) and the
    /// fraction of the total weight the rest carried
    pub fn apply(&self, s: &[f64]) -> (usize, f64) {
        let total: f64 = s.iter().map(|x| x * x).sum();
        if s.is_empty() || total == 0.0 {
            return (1, 0.0);
        }
        let floor = s[0] * self.cutoff;
        let by_cutoff = s.iter().take_while(|&&x| x > floor && x > 0.0).count();

        // smallest prefix whose tail stays within the discard budget
        let mut tail = total;
        let mut by_weight = s.len();
        for (i, x) in s.iter().enumerate() {
            tail -= x * x;
            if tail / total <= self.max_discarded {
                by_weight = i + 1;
                break;
            }
        }
        let keep = by_cutoff.min(by_weight).min(self.max_bond).max(1);
        let discarded: f64 = s[keep..].iter().map(|x| x * x).sum::<f64>() / total;
        (keep, discarded.max(0.0))
    }
}

/// singular value decomposition with values sorted descending
pub(crate) struct Svd {
    pub u: Array2<Complex64>,
    pub s: Vec<f64>,
    pub vt: Array2<Complex64>,
}

pub(crate) fn svd(m: &Array2<Complex64>) -> Result<Svd> {
    let (rows, cols) = m.dim();
    let decomposition = DMatrix::from_fn(rows, cols, |r, c| m[[r, c]]).svd(true, true);
    let u = decomposition
        .u
        .ok_or_else(|| QsimError::InvalidDimension("svd produced no left vectors".to_string()))?;
    let vt = decomposition
        .v_t
        .ok_or_else(|| QsimError::InvalidDimension("svd produced no right vectors".to_string()))?;
    let values = decomposition.singular_values;
    let k = values.len();
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    Ok(Svd {
        u: Array2::from_shape_fn((rows, k), |(r, c)| u[(r, order[c])]),
        s: order.iter().map(|&i| values[i]).collect(),
        vt: Array2::from_shape_fn((k, cols), |(r, c)| vt[(order[r], c)]),
    })
}

// keeps the first `keep` triplets and folds the values into the right factor
fn split(m: &Array2<Complex64>, policy: &Truncation) -> Result<(Array2<Complex64>, Array2<Complex64>, f64)> {
    let Svd { u, s, vt } = svd(m)?;
    let (keep, discarded) = policy.apply(&s);
    let left = u.slice(s![.., ..keep]).to_owned();
    let mut right = vt.slice(s![..keep, ..]).to_owned();
    for (mut row, &value) in right.axis_iter_mut(Axis(0)).zip(s.iter()) {
        row.mapv_inplace(|z| z * value);
    }
    Ok((left, right, discarded))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpsState {
    tensors: Vec<Array3<Complex64>>,
    policy: Truncation,
    discarded_weight: f64,
    estimated_fidelity: f64,
}

impl MpsState {
    /// |0...0⟩ with every bond of dimension 1
    pub fn zero(num_qubits: u32, policy: Truncation) -> Result<Self> {
        Self::product_basis(num_qubits, 0, policy)
    }

    pub fn product_basis(num_qubits: u32, index: usize, policy: Truncation) -> Result<Self> {
        if num_qubits < 1 || num_qubits > MAX_MPS_QUBITS {
            return Err(QsimError::InvalidDimension(format!(
                "mps qubit count {} outside 1..={}",
                num_qubits, MAX_MPS_QUBITS
            )));
        }
        if num_qubits < usize::BITS && index >> num_qubits != 0 {
            return Err(QsimError::InvalidDimension(format!(
                "basis index {} out of range for {} qubits",
                index, num_qubits
            )));
        }
        let tensors = (0..num_qubits as usize)
            .map(|j| {
                let mut t = Array3::zeros((1, 2, 1));
                t[[0, (index >> j) & 1, 0]] = Complex64::new(1.0, 0.0);
                t
            })
            .collect();
        Ok(Self {
            tensors,
            policy,
            discarded_weight: 0.0,
            estimated_fidelity: 1.0,
        })
    }

    /// left-to-right sequential SVD of a dense vector. returns the chain and
    /// the discarded weight fraction at every cut.
    pub fn from_dense(state: &ComplexVector, policy: Truncation) -> Result<(Self, Vec<f64>)> {
        let n = state.num_qubits().ok_or_else(|| {
            QsimError::InvalidDimension(format!("length {} is not a power of two", state.len()))
        })? as usize;
        if n == 0 {
            return Err(QsimError::InvalidDimension("empty register".to_string()));
        }
        // qubit 0 leading, so row-major flattening walks site 0 slowest
        let view = ArrayViewD::from_shape(IxDyn(&vec![2usize; n]), state.as_slice()).map_err(shape_err)?;
        let sites_first = flat(&view.reversed_axes());

        let mut tensors = Vec::with_capacity(n);
        let mut cuts = Vec::with_capacity(n.saturating_sub(1));
        let mut left = 1usize;
        let mut rest = Array2::from_shape_vec((2, sites_first.len() / 2), sites_first).map_err(shape_err)?;
        for j in 0..n - 1 {
            let (u, r, discarded) = split(&rest, &policy)?;
            let keep = u.ncols();
            tensors.push(tensor(&u, (left, 2, keep))?);
            cuts.push(discarded);
            let remaining = 1usize << (n - j - 1);
            rest = matrix(&r, keep * 2, remaining / 2)?;
            left = keep;
        }
        tensors.push(tensor(&rest, (left, 2, 1))?);

        let estimated_fidelity = cuts.iter().map(|d| 1.0 - d).product();
        let mps = Self {
            tensors,
            policy,
            discarded_weight: cuts.iter().sum(),
            estimated_fidelity,
        };
        Ok((mps, cuts))
    }

    /// rebuilds a chain from stored tensors, checking the bond structure
    pub fn from_tensors(tensors: Vec<Array3<Complex64>>, policy: Truncation) -> Result<Self> {
        if tensors.is_empty() || tensors.len() > MAX_MPS_QUBITS as usize {
            return Err(QsimError::InvalidDimension(format!(
                "mps with {} sites",
                tensors.len()
            )));
        }
        let mps = Self {
            tensors,
            policy,
            discarded_weight: 0.0,
            estimated_fidelity: 1.0,
        };
        mps.check_bonds()?;
        Ok(mps)
    }

    pub fn check_bonds(&self) -> Result<()> {
        let n = self.tensors.len();
        for (j, t) in self.tensors.iter().enumerate() {
            let (l, p, r) = t.dim();
            if p != 2 {
                return Err(QsimError::InvalidDimension(format!("site {} has physical dimension {}", j, p)));
            }
            if (j == 0 && l != 1) || (j == n - 1 && r != 1) {
                return Err(QsimError::InvalidDimension("outer bonds must have dimension 1".to_string()));
            }
            if j + 1 < n && self.tensors[j + 1].dim().0 != r {
                return Err(QsimError::InvalidDimension(format!(
                    "bond {} mismatch: {} vs {}",
                    j,
                    r,
                    self.tensors[j + 1].dim().0
                )));
            }
        }
        Ok(())
    }

    pub fn num_qubits(&self) -> u32 {
        self.tensors.len() as u32
    }

    pub fn tensors(&self) -> &[Array3<Complex64>] {
        &self.tensors
    }

    pub fn policy(&self) -> Truncation {
        self.policy
    }

    pub fn set_policy(&mut self, policy: Truncation) {
        self.policy = policy;
    }

    /// dimensions of the n-1 inner bonds
    pub fn bond_dims(&self) -> Vec<usize> {
        self.tensors[..self.tensors.len() - 1]
            .iter()
            .map(|t| t.dim().2)
            .collect()
    }

    pub fn max_bond_dim(&self) -> usize {
        self.bond_dims().into_iter().max().unwrap_or(1)
    }

    /// complex entries stored across all sites
    pub fn num_parameters(&self) -> usize {
        self.tensors.iter().map(|t| t.len()).sum()
    }

    pub fn estimated_fidelity(&self) -> f64 {
        self.estimated_fidelity
    }

    pub fn discarded_weight(&self) -> f64 {
        self.discarded_weight
    }

    /// ⟨ψ|ψ⟩ by transfer-matrix contraction
    pub fn norm_squared(&self) -> f64 {
        let mut env = Array2::from_elem((1, 1), Complex64::new(1.0, 0.0));
        for t in &self.tensors {
            let (_, _, r) = t.dim();
            let mut next = Array2::<Complex64>::zeros((r, r));
            for phys in 0..2 {
                let a = t.index_axis(Axis(1), phys);
                let a_dag = a.t().mapv(|z| z.conj());
                next = next + a_dag.dot(&env).dot(&a);
            }
            env = next;
        }
        env[[0, 0]].re
    }

    /// amplitude of one basis state (bit j of `index` is qubit j)
    pub fn amplitude(&self, index: usize) -> Complex64 {
        let mut row = Array2::from_elem((1, 1), Complex64::new(1.0, 0.0));
        for (j, t) in self.tensors.iter().enumerate() {
            let bit = if j < usize::BITS as usize { (index >> j) & 1 } else { 0 };
            row = row.dot(&t.index_axis(Axis(1), bit));
        }
        row[[0, 0]]
    }

    /// contracts the whole chain into a dense vector
    pub fn to_dense(&self) -> Result<ComplexVector> {
        let n = self.tensors.len();
        let mut acc = Array2::from_elem((1, 1), Complex64::new(1.0, 0.0));
        for t in &self.tensors {
            let (l, _, r) = t.dim();
            let rows = acc.nrows();
            let step = acc.dot(&matrix(t, l, 2 * r)?);
            acc = matrix(&step, rows * 2, r)?;
        }
        // acc has site 0 as the most significant bit; flip back to qubit-lsb order
        let sites_first = ArrayD::from_shape_vec(IxDyn(&vec![2usize; n]), flat(&acc)).map_err(shape_err)?;
        Ok(ComplexVector::from_vec(flat(&sites_first.reversed_axes())))
    }

    /// scales the chain to unit norm. returns the norm it had.
    pub fn normalize(&mut self) -> f64 {
        let norm = self.norm_squared().max(0.0).sqrt();
        if norm > 0.0 {
            self.tensors[0].mapv_inplace(|z| z / norm);
        }
        norm
    }

    /// applies `matrix` to `targets`, routing through SWAP chains when the
    /// targets are not already a contiguous ascending block
    pub fn apply_gate(&mut self, matrix: &GateMatrix, targets: &[usize]) -> Result<()> {
        let k = matrix.num_qubits().ok_or_else(|| {
            QsimError::InvalidGate(format!("matrix dimension {} is not a power of two", matrix.dim()))
        })?;
        let n = self.tensors.len();
        validate_targets(k, targets, n as u32)?;

        let start = targets.iter().copied().min().unwrap_or(0).min(n - k);
        let mut layout: Vec<usize> = (0..n).collect();
        let mut swaps = Vec::new();
        for (i, &q) in targets.iter().enumerate() {
            let mut site = layout.iter().position(|&x| x == q).unwrap_or(start + i);
            while site > start + i {
                self.swap_adjacent(site - 1)?;
                layout.swap(site - 1, site);
                swaps.push(site - 1);
                site -= 1;
            }
        }
        if !swaps.is_empty() {
            debug!("routed {:?} with {} swaps", targets, swaps.len());
        }
        self.apply_block(start, matrix)?;
        for &site in swaps.iter().rev() {
            self.swap_adjacent(site)?;
        }
        Ok(())
    }

    fn swap_adjacent(&mut self, site: usize) -> Result<()> {
        let swap = GateLibrary::new(GatePrecision::Fp64).matrix(&Gate::Swap)?;
        self.apply_block(site, &swap)
    }

    // contracts sites start..start+k, applies the gate on the joint physical
    // index (site `start` most significant) and re-splits left to right
    fn apply_block(&mut self, start: usize, gate: &GateMatrix) -> Result<()> {
        let k = gate.num_qubits().unwrap_or(1);
        let d = 1usize << k;
        let chi_l = self.tensors[start].dim().0;
        let chi_r = self.tensors[start + k - 1].dim().2;

        let mut theta = matrix(&self.tensors[start], chi_l * 2, self.tensors[start].dim().2)?;
        for site in start + 1..start + k {
            let (l, _, r) = self.tensors[site].dim();
            let rows = theta.nrows();
            let step = theta.dot(&matrix(&self.tensors[site], l, 2 * r)?);
            theta = matrix(&step, rows * 2, r)?;
        }
        let theta = tensor(&theta, (chi_l, d, chi_r))?;

        let g = gate.view();
        let mut updated = Array3::<Complex64>::zeros((chi_l, d, chi_r));
        for l in 0..chi_l {
            let block = g.dot(&theta.slice(s![l, .., ..]));
            updated.slice_mut(s![l, .., ..]).assign(&block);
        }

        let mut left = chi_l;
        let mut rest = matrix(&updated, chi_l * 2, (d / 2) * chi_r)?;
        let mut truncated = false;
        for i in 0..k - 1 {
            let remaining = 1usize << (k - 1 - i);
            let (u, r, discarded) = split(&rest, &self.policy)?;
            let keep = u.ncols();
            self.tensors[start + i] = tensor(&u, (left, 2, keep))?;
            if discarded > 0.0 {
                truncated = true;
                self.discarded_weight += discarded;
                self.estimated_fidelity *= 1.0 - discarded;
            }
            if keep == self.policy.max_bond && discarded > 0.0 {
                warn!(
                    "bond {} hit the cap {} (discarded {:.3e})",
                    start + i,
                    keep,
                    discarded
                );
            }
            left = keep;
            rest = matrix(&r, keep * 2, (remaining / 2) * chi_r)?;
        }
        self.tensors[start + k - 1] = tensor(&rest, (left, 2, chi_r))?;
        if truncated {
            self.normalize();
        }
        Ok(())
    }

    /// von neumann entropy (bits) between sites [0, cut) and [cut, n)
    pub fn bipartite_entropy(&self, cut: usize) -> Result<f64> {
        let n = self.tensors.len();
        if cut > n {
            return Err(QsimError::InvalidParameter(format!(
                "cut {} outside a chain of {} sites",
                cut, n
            )));
        }
        if cut == 0 || cut == n {
            return Ok(0.0);
        }
        // left-canonicalize sites before the cut; the right part then carries
        // the schmidt weights in its gram matrix
        let mut tensors = self.tensors.clone();
        for j in 0..cut {
            let (l, _, r) = tensors[j].dim();
            let m = matrix(&tensors[j], l * 2, r)?;
            let Svd { u, s, vt } = svd(&m)?;
            let keep = s.len();
            tensors[j] = tensor(&u, (l, 2, keep))?;
            let mut carry = vt;
            for (mut row, &value) in carry.axis_iter_mut(Axis(0)).zip(s.iter()) {
                row.mapv_inplace(|z| z * value);
            }
            let (nl, _, nr) = tensors[j + 1].dim();
            let next = carry.dot(&matrix(&tensors[j + 1], nl, 2 * nr)?);
            tensors[j + 1] = tensor(&next, (keep, 2, nr))?;
        }
        let mut env = Array2::from_elem((1, 1), Complex64::new(1.0, 0.0));
        for t in tensors[cut..].iter().rev() {
            let (l, _, _) = t.dim();
            let mut next = Array2::<Complex64>::zeros((l, l));
            for phys in 0..2 {
                let a = t.index_axis(Axis(1), phys);
                next = next + a.dot(&env).dot(&a.t().mapv(|z| z.conj()));
            }
            env = next;
        }
        let (values, _) = hermitian_spectrum(&env);
        let total: f64 = values.iter().filter(|&&l| l > 0.0).sum();
        if total <= 0.0 {
            return Ok(0.0);
        }
        Ok(values
            .iter()
            .map(|l| l / total)
            .filter(|&l| l > EIGENVALUE_FLOOR)
            .map(|l| -l * l.log2())
            .sum::<f64>()
            .max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{random_state, rng_from_seed};
    use crate::runtime::compute_fidelity;

    fn exact() -> Truncation {
        Truncation::new(1 << 16, 0.0)
    }

    #[test]
    fn test_truncation_policy() {
        let s = [1.0, 0.5, 0.1, 0.0];
        assert_eq!(Truncation::new(8, 0.0).apply(&s).0, 3);
        assert_eq!(Truncation::new(2, 0.0).apply(&s).0, 2);
        assert_eq!(Truncation::new(8, 0.2).apply(&s).0, 2);
        let budget = Truncation {
            max_bond: 8,
            cutoff: 0.0,
            max_discarded: 0.01,
        };
        let (keep, discarded) = budget.apply(&s);
        assert_eq!(keep, 2);
        assert!((discarded - 0.01 / 1.26).abs() < 1e-12);
    }

    #[test]
    fn test_from_dense_round_trip_exact() {
        let v = random_state(6, &mut rng_from_seed(2));
        let (mps, cuts) = MpsState::from_dense(&v, exact()).unwrap();
        assert_eq!(cuts.len(), 5);
        mps.check_bonds().unwrap();
        let back = mps.to_dense().unwrap();
        assert!(compute_fidelity(&back, &v).unwrap() > 1.0 - 1e-12);
        assert!((mps.amplitude(37) - v.as_slice()[37]).norm() < 1e-12);
        assert!((mps.norm_squared() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_product_state_has_unit_bonds() {
        let mps = MpsState::product_basis(5, 0b10110, exact()).unwrap();
        assert_eq!(mps.bond_dims(), vec![1, 1, 1, 1]);
        assert!((mps.amplitude(0b10110).re - 1.0).abs() < 1e-15);
        assert!(MpsState::product_basis(3, 8, exact()).is_err());
    }

    #[test]
    fn test_long_range_gate_matches_dense() {
        let lib = GateLibrary::default();
        let v = random_state(5, &mut rng_from_seed(9));
        let (mut mps, _) = MpsState::from_dense(&v, exact()).unwrap();
        let cnot = lib.matrix(&Gate::Cnot).unwrap();
        mps.apply_gate(&cnot, &[4, 1]).unwrap();
        let toffoli = lib.matrix(&Gate::Toffoli).unwrap();
        mps.apply_gate(&toffoli, &[3, 0, 2]).unwrap();

        let config = crate::config::SimConfig::default();
        let engine = crate::runtime::DenseStateEngine::new(config).unwrap();
        let mut dense = crate::runtime::QuantumState::from_vector(v, 0).unwrap();
        engine.apply(&mut dense, &Gate::Cnot, &[4, 1]).unwrap();
        engine.apply(&mut dense, &Gate::Toffoli, &[3, 0, 2]).unwrap();

        let out = mps.to_dense().unwrap();
        assert!(compute_fidelity(&out, &dense.amplitudes).unwrap() > 1.0 - 1e-10);
        // phase and scale match too
        assert!((out.as_slice()[5] - dense.amplitudes.as_slice()[5]).norm() < 1e-10);
    }

    #[test]
    fn test_bell_entropy_and_bond_cap() {
        let lib = GateLibrary::default();
        let mut mps = MpsState::zero(4, Truncation::new(1, 0.0)).unwrap();
        mps.apply_gate(&lib.matrix(&Gate::H).unwrap(), &[1]).unwrap();
        assert!(mps.bipartite_entropy(2).unwrap().abs() < 1e-12);
        mps.apply_gate(&lib.matrix(&Gate::Cnot).unwrap(), &[1, 2]).unwrap();
        // a bond of one cannot hold the pair
        assert_eq!(mps.max_bond_dim(), 1);
        assert!(mps.estimated_fidelity() < 0.6);

        let mut wide = MpsState::zero(4, exact()).unwrap();
        wide.apply_gate(&lib.matrix(&Gate::H).unwrap(), &[1]).unwrap();
        wide.apply_gate(&lib.matrix(&Gate::Cnot).unwrap(), &[1, 2]).unwrap();
        assert!((wide.bipartite_entropy(2).unwrap() - 1.0).abs() < 1e-10);
        assert!(wide.bipartite_entropy(1).unwrap().abs() < 1e-10);
        assert!((wide.estimated_fidelity() - 1.0).abs() < 1e-15);
    }
}
