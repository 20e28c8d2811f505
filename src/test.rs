// crate-level properties that cut across engines

use crate::circuit::Circuit;
use crate::complex_vector::ComplexVector;
use crate::compression::{decompress, StateCompressor};
use crate::config::SimConfig;
use crate::distribute::{gather, shard_all};
use crate::gates::Gate;
use crate::noise::{NoiseEngine, NoiseSpec};
use crate::runtime::{compute_fidelity, DenseStateEngine, InitialState, QuantumState};
use crate::simulate::simulate;
use crate::tensor_network::TensorNetworkEngine;
use num_complex::Complex64;
use proptest::prelude::*;
use std::f64::consts::{FRAC_1_SQRT_2, PI};

// --- common test helpers ---

fn engine() -> DenseStateEngine {
    DenseStateEngine::new(SimConfig::default()).unwrap()
}

fn zero_state(num_qubits: u32) -> QuantumState {
    engine().initialize(num_qubits, &InitialState::Zero).unwrap()
}

fn random_state(num_qubits: u32, seed: u64) -> QuantumState {
    engine().initialize(num_qubits, &InitialState::Random { seed }).unwrap()
}

// (|0...0> + |1...1>) / sqrt(2)
fn ghz_target(num_qubits: u32) -> ComplexVector {
    let mut v = ComplexVector::zeros(1 << num_qubits);
    v.as_mut_slice()[0] = Complex64::new(FRAC_1_SQRT_2, 0.0);
    v.as_mut_slice()[(1 << num_qubits) - 1] = Complex64::new(FRAC_1_SQRT_2, 0.0);
    v
}

// asserts that two vectors of complex numbers are approximately equal.
fn assert_amps_approx_eq(actual: &[Complex64], expected: &[Complex64], epsilon: f64) {
    assert_eq!(actual.len(), expected.len(), "amplitude vectors have different lengths");
    for (i, (a, b)) in actual.iter().zip(expected).enumerate() {
        assert!((a - b).norm() < epsilon, "amplitude {} differs: {} vs {}", i, a, b);
    }
}

// maps a drawn tuple onto a valid gate for a 4-qubit register
fn drawn_gate(kind: usize, a: usize, b: usize, c: usize, theta: f64) -> (Gate, Vec<usize>) {
    let b = if b == a { (a + 1) % 4 } else { b };
    let c = (0..4)
        .map(|i| (c + i) % 4)
        .find(|q| *q != a && *q != b)
        .unwrap();
    match kind {
        0 => (Gate::H, vec![a]),
        1 => (Gate::Rx { theta }, vec![a]),
        2 => (Gate::Ry { theta }, vec![a]),
        3 => (Gate::Rz { theta }, vec![a]),
        4 => (Gate::T, vec![a]),
        5 => (Gate::Cnot, vec![a, b]),
        6 => (Gate::CPhase { theta }, vec![a, b]),
        7 => (Gate::Swap, vec![a, b]),
        8 => (Gate::Toffoli, vec![a, b, c]),
        _ => (Gate::Fredkin, vec![a, b, c]),
    }
}

// --- normalization ---

proptest! {
    #[test]
    fn norm_survives_random_gate_sequences(
        seed in 0u64..1000,
        gates in prop::collection::vec((0usize..10, 0usize..4, 0usize..4, 0usize..4, -PI..PI), 1..100)
    ) {
        let e = engine();
        let mut s = random_state(4, seed);
        for (kind, a, b, c, theta) in gates {
            let (gate, targets) = drawn_gate(kind, a, b, c, theta);
            e.apply(&mut s, &gate, &targets).unwrap();
        }
        prop_assert!((s.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gate_then_inverse_is_identity(
        seed in 0u64..1000,
        kind in 0usize..10,
        a in 0usize..4,
        b in 0usize..4,
        c in 0usize..4,
        theta in -PI..PI
    ) {
        let e = engine();
        let before = random_state(4, seed);
        let mut s = before.clone();
        let (gate, targets) = drawn_gate(kind, a, b, c, theta);
        e.apply(&mut s, &gate, &targets).unwrap();
        e.apply(&mut s, &gate.inverse(), &targets).unwrap();
        for (x, y) in s.amplitudes.as_slice().iter().zip(before.amplitudes.as_slice()) {
            prop_assert!((x - y).norm() < 1e-10);
        }
    }
}

// --- unitarity round trip ---

#[test]
fn test_named_inverses() {
    let e = engine();
    let before = random_state(3, 77);
    let pairs = [
        (Gate::H, Gate::H),
        (Gate::Rz { theta: 0.7 }, Gate::Rz { theta: -0.7 }),
        (Gate::S, Gate::Sdg),
        (Gate::T, Gate::Tdg),
    ];
    for (gate, inverse) in pairs {
        let mut s = before.clone();
        e.apply(&mut s, &gate, &[1]).unwrap();
        e.apply(&mut s, &inverse, &[1]).unwrap();
        assert_amps_approx_eq(s.amplitudes.as_slice(), before.amplitudes.as_slice(), 1e-10);
    }
    let mut s = before.clone();
    let circuit = Circuit::ghz(3);
    e.apply_circuit(&mut s, &circuit).unwrap();
    e.apply_circuit(&mut s, &circuit.inverse()).unwrap();
    assert_amps_approx_eq(s.amplitudes.as_slice(), before.amplitudes.as_slice(), 1e-10);
}

// --- bell and ghz ---

#[test]
fn test_bell_state_fidelity() {
    let e = engine();
    let mut s = zero_state(2);
    e.apply_circuit(&mut s, &Circuit::bell()).unwrap();
    assert!(compute_fidelity(&s.amplitudes, &ghz_target(2)).unwrap() >= 0.9999);
}

#[test]
fn test_ghz_scaling() {
    let e = engine();
    for n in [2, 4, 6, 8] {
        let mut s = zero_state(n);
        e.apply_circuit(&mut s, &Circuit::ghz(n)).unwrap();
        let f = compute_fidelity(&s.amplitudes, &ghz_target(n)).unwrap();
        assert!(f >= 0.9999, "ghz {} fidelity {}", n, f);
    }
}

#[test]
fn test_ghz_through_mps() {
    let config = SimConfig {
        mps_threshold: 4,
        ..SimConfig::default()
    };
    for n in [6, 8] {
        let mut tn = TensorNetworkEngine::new(config.clone()).unwrap();
        tn.initialize(n, &InitialState::Zero).unwrap();
        tn.apply_circuit(&Circuit::ghz(n)).unwrap();
        assert!(tn.is_mps());
        let f = compute_fidelity(&tn.to_state_vector().unwrap(), &ghz_target(n)).unwrap();
        assert!(f >= 0.9999);
    }
}

// --- entanglement entropy ---

#[test]
fn test_entropy_of_product_and_bell() {
    let e = engine();
    let mut product = zero_state(2);
    e.apply(&mut product, &Gate::H, &[0]).unwrap();
    e.apply(&mut product, &Gate::Ry { theta: 0.3 }, &[1]).unwrap();
    assert!(e.entanglement_entropy(&product, &[0]).unwrap().abs() < 1e-10);

    let mut bell = zero_state(2);
    e.apply_circuit(&mut bell, &Circuit::bell()).unwrap();
    assert!((e.entanglement_entropy(&bell, &[0]).unwrap() - 1.0).abs() < 1e-10);
}

// --- noise monotonicity ---

#[test]
fn test_fidelity_non_increasing_in_damping() {
    let e = engine();
    let noise = NoiseEngine::new(SimConfig::default()).unwrap();

    // collapsed pure states
    let mut plus = zero_state(3);
    for q in 0..3 {
        e.apply(&mut plus, &Gate::H, &[q]).unwrap();
    }
    // density path
    let mut bell = zero_state(2);
    e.apply_circuit(&mut bell, &Circuit::bell()).unwrap();

    let mut last_collapsed = f64::INFINITY;
    let mut last_density = f64::INFINITY;
    for gamma in [0.0, 0.01, 0.05, 0.1] {
        let spec = NoiseSpec::amplitude_damping(gamma);

        let mut s = plus.clone();
        noise.apply_noise(&mut s, &spec).unwrap();
        let collapsed = compute_fidelity(&s.amplitudes, &plus.amplitudes).unwrap();
        assert!(collapsed <= last_collapsed + 1e-12, "gamma {}: {} > {}", gamma, collapsed, last_collapsed);
        last_collapsed = collapsed;

        let mut rho = noise.to_density(&bell).unwrap();
        noise.evolve_density(&mut rho, &spec).unwrap();
        let mixed = rho.fidelity_with_pure(&bell.amplitudes).unwrap();
        assert!(mixed <= last_density + 1e-12);
        last_density = mixed;
    }
    assert!(last_density < 1.0);
}

// --- compression round trip ---

#[test]
fn test_compression_meets_each_target() {
    let s = random_state(8, 2024);
    let compressor = StateCompressor::new(64);
    for f in [0.95, 0.99, 0.995] {
        let compressed = compressor.compress_state(&s, f).unwrap();
        let back = decompress(&compressed).unwrap();
        assert!(compute_fidelity(&back.amplitudes, &s.amplitudes).unwrap() >= f);
    }
}

#[test]
fn test_product_state_ratio_below_one() {
    let e = engine();
    let mut s = zero_state(8);
    for q in 0..8 {
        e.apply(&mut s, &Gate::Rx { theta: 0.2 + 0.1 * q as f64 }, &[q]).unwrap();
    }
    for f in [0.95, 0.99, 0.995] {
        let compressed = StateCompressor::new(64).compress_state(&s, f).unwrap();
        assert!(compressed.compression_ratio < 1.0);
    }
}

// --- determinism ---

#[test]
fn test_identical_runs_are_byte_identical() {
    let e = engine();
    let mut circuit = Circuit::ghz(5);
    circuit
        .push(Gate::Rx { theta: 0.123 }, &[2])
        .push(Gate::Fredkin, &[0, 3, 4])
        .push(Gate::CPhase { theta: 1.1 }, &[4, 1]);

    let run = || {
        let mut s = random_state(5, 9);
        e.apply_circuit(&mut s, &circuit).unwrap();
        s.to_bytes()
    };
    assert_eq!(run(), run());

    let a = simulate(&circuit, &InitialState::Random { seed: 9 }).unwrap();
    let b = simulate(&circuit, &InitialState::Random { seed: 9 }).unwrap();
    assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
}

// --- shard reconstruction ---

#[test]
fn test_shards_concatenate_to_the_original() {
    let s = random_state(7, 5);
    for world in [1, 2, 3, 4, 6, 8] {
        let shards = shard_all(&s, world).unwrap();
        let mut concatenated = Vec::new();
        for shard in &shards {
            concatenated.extend_from_slice(&shard.local_data);
        }
        assert_eq!(concatenated.as_slice(), s.amplitudes.as_slice());
        assert_eq!(gather(&shards).unwrap(), s.amplitudes);
    }
}
