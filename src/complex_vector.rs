use crate::error::{QsimError, Result};
use ndarray::{ArrayViewD, ArrayViewMutD, IxDyn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// contiguous buffer of complex amplitudes
///
/// index `i` holds the amplitude of the basis state whose bit `q` is the value
/// of qubit `q` (qubit 0 is the least significant bit). the tensor views
/// reshape the buffer to `[2; n]` in row-major order, so qubit `q` lives on
/// axis `n - 1 - q`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexVector {
    data: Vec<Complex64>,
}

impl ComplexVector {
    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![Complex64::new(0.0, 0.0); len],
        }
    }

    /// computational basis state |index⟩ on `num_qubits` qubits
    pub fn basis(num_qubits: u32, index: usize) -> Result<Self> {
        let len = 1usize << num_qubits;
        if index >= len {
            return Err(QsimError::InvalidDimension(format!(
                "basis index {} out of range for {} qubits",
                index, num_qubits
            )));
        }
        let mut v = Self::zeros(len);
        v.data[index] = Complex64::new(1.0, 0.0);
        Ok(v)
    }

    pub fn from_vec(data: Vec<Complex64>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// number of qubits if the length is a power of two
    pub fn num_qubits(&self) -> Option<u32> {
        if self.data.len().is_power_of_two() {
            Some(self.data.len().trailing_zeros())
        } else {
            None
        }
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<Complex64> {
        self.data
    }

    pub fn norm_sqr(&self) -> f64 {
        self.data.iter().map(|a| a.norm_sqr()).sum()
    }

    pub fn norm(&self) -> f64 {
        self.norm_sqr().sqrt()
    }

    /// ⟨self|other⟩, conjugating `self`
    pub fn dot(&self, other: &ComplexVector) -> Result<Complex64> {
        if self.len() != other.len() {
            return Err(QsimError::InvalidDimension(format!(
                "dot product of vectors with lengths {} and {}",
                self.len(),
                other.len()
            )));
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a.conj() * b)
            .sum())
    }

    /// scales to unit norm and returns the norm it had before.
    /// a zero vector is left untouched.
    pub fn normalize(&mut self) -> f64 {
        let norm = self.norm();
        if norm > 0.0 {
            self.data.iter_mut().for_each(|a| *a /= norm);
        }
        norm
    }

    pub fn scale(&mut self, factor: Complex64) {
        self.data.iter_mut().for_each(|a| *a *= factor);
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|a| a.re.is_finite() && a.im.is_finite())
    }

    // emulates complex64 storage
    pub fn round_to_single(&mut self) {
        self.data.iter_mut().for_each(|a| {
            *a = Complex64::new(a.re as f32 as f64, a.im as f32 as f64);
        });
    }

    fn tensor_shape(&self) -> Result<Vec<usize>> {
        let n = self.num_qubits().ok_or_else(|| {
            QsimError::InvalidDimension(format!("length {} is not a power of two", self.len()))
        })?;
        Ok(vec![2; n as usize])
    }

    /// row-major `[2; n]` view over the buffer
    pub fn tensor_view(&self) -> Result<ArrayViewD<'_, Complex64>> {
        let shape = self.tensor_shape()?;
        ArrayViewD::from_shape(IxDyn(&shape), &self.data)
            .map_err(|e| QsimError::InvalidDimension(e.to_string()))
    }

    pub fn tensor_view_mut(&mut self) -> Result<ArrayViewMutD<'_, Complex64>> {
        let shape = self.tensor_shape()?;
        ArrayViewMutD::from_shape(IxDyn(&shape), &mut self.data)
            .map_err(|e| QsimError::InvalidDimension(e.to_string()))
    }
}

impl From<Vec<Complex64>> for ComplexVector {
    fn from(data: Vec<Complex64>) -> Self {
        Self::from_vec(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_and_norm() {
        let v = ComplexVector::basis(3, 5).unwrap();
        assert_eq!(v.len(), 8);
        assert_eq!(v.num_qubits(), Some(3));
        assert!((v.norm() - 1.0).abs() < 1e-15);
        assert!(ComplexVector::basis(2, 4).is_err());
    }

    #[test]
    fn test_dot_conjugates_left() {
        let a = ComplexVector::from_vec(vec![Complex64::new(0.0, 1.0), Complex64::new(0.0, 0.0)]);
        let b = ComplexVector::from_vec(vec![Complex64::new(0.0, 1.0), Complex64::new(0.0, 0.0)]);
        let d = a.dot(&b).unwrap();
        assert!((d - Complex64::new(1.0, 0.0)).norm() < 1e-15);
    }

    #[test]
    fn test_tensor_view_axis_order() {
        // |q1 q0> = |10> is index 2; qubit 1 is axis 0
        let v = ComplexVector::basis(2, 2).unwrap();
        let t = v.tensor_view().unwrap();
        assert_eq!(t[[1, 0]], Complex64::new(1.0, 0.0));
    }
}
