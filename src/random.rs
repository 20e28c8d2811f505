// deterministic randomness. nothing in the crate touches a global or
// thread-local rng; every stochastic call receives an explicit handle.

use crate::complex_vector::ComplexVector;
use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// splitmix64 finalizer
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// derives an independent seed for `stream` (a rank or trajectory index).
/// depends only on the pair, so rank 0 sees the same seed at any world size.
pub fn derive_seed(global_seed: u64, stream: u64) -> u64 {
    mix(mix(global_seed) ^ stream.wrapping_mul(0xD1B5_4A32_D192_ED03))
}

pub fn rng_from_seed(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

pub fn stream_rng(global_seed: u64, stream: u64) -> ChaCha8Rng {
    rng_from_seed(derive_seed(global_seed, stream))
}

// gaussian real and imaginary parts, normalized: unitarily invariant distribution
pub fn random_state<R: Rng + ?Sized>(num_qubits: u32, rng: &mut R) -> ComplexVector {
    let len = 1usize << num_qubits;
    let amps: Vec<Complex64> = (0..len)
        .map(|_| {
            let re: f64 = StandardNormal.sample(rng);
            let im: f64 = StandardNormal.sample(rng);
            Complex64::new(re, im)
        })
        .collect();
    let mut v = ComplexVector::from_vec(amps);
    v.normalize();
    v
}
