use criterion::measurement::WallTime;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use quasim::checkpoint::{load_state, save_state};
use quasim::circuit::Circuit;
use quasim::compression::StateCompressor;
use quasim::config::SimConfig;
use quasim::gates::Gate;
use quasim::noise::{NoiseEngine, NoiseSpec};
use quasim::runtime::{DenseStateEngine, InitialState, QuantumState};
use quasim::tensor_network::TensorNetworkEngine;
use std::f64::consts::PI;

// custom criterion configuration for all benchmarks
fn custom_criterion_config() -> Criterion<WallTime> {
    Criterion::default()
        .sample_size(50) // 20-30 for dev runs, very inaccurate
        .measurement_time(std::time::Duration::from_secs(5))
        .warm_up_time(std::time::Duration::from_secs(1))
        .with_plots()
}

fn engine() -> DenseStateEngine {
    DenseStateEngine::new(SimConfig::default()).expect("default config is valid")
}

fn random_state(num_qubits: u32) -> QuantumState {
    engine()
        .initialize(num_qubits, &InitialState::Random { seed: 42 })
        .expect("state fits the default budget")
}

fn gate_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("dense_gates");

    #[cfg(debug_assertions)]
    let qubit_counts = vec![4, 8]; // for faster development runs

    #[cfg(not(debug_assertions))]
    let qubit_counts = vec![4, 8, 12, 16, 20];

    let e = engine();
    for &n in &qubit_counts {
        group.throughput(Throughput::Elements(1u64 << n));
        let top = n as usize - 1;
        let gates = [
            ("h", Gate::H, vec![0]),
            ("rz", Gate::Rz { theta: PI / 3.0 }, vec![top]),
            ("cnot", Gate::Cnot, vec![0, top]),
            ("toffoli", Gate::Toffoli, vec![0, 1, top]),
        ];
        for (name, gate, targets) in gates.iter() {
            if targets.len() > n as usize {
                continue;
            }
            let mut s = random_state(n);
            group.bench_with_input(BenchmarkId::new(*name, n), &n, |b, _| {
                b.iter(|| e.apply(black_box(&mut s), gate, targets).expect("valid gate"))
            });
        }
    }
    group.finish();
}

fn mps_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("mps");
    for n in [16u32, 32] {
        let mut circuit = Circuit::ghz(n);
        for q in 0..n as usize {
            circuit.push(Gate::Ry { theta: 0.1 }, &[q]);
        }
        group.bench_with_input(BenchmarkId::new("ghz_plus_rotations", n), &circuit, |b, circuit| {
            b.iter(|| {
                let mut tn = TensorNetworkEngine::new(SimConfig::default()).expect("default config is valid");
                tn.initialize(n, &InitialState::Zero).expect("zero state");
                tn.apply_circuit(black_box(circuit)).expect("valid circuit");
            })
        });
    }
    group.finish();
}

fn compression_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let s = random_state(10);
    let compressor = StateCompressor::new(32);
    for f in [0.9, 0.99] {
        group.bench_with_input(BenchmarkId::new("random_10q", f), &f, |b, &f| {
            b.iter(|| compressor.compress_state(black_box(&s), f))
        });
    }
    group.finish();
}

fn noise_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("noise");
    let noise = NoiseEngine::new(SimConfig::default()).expect("default config is valid");
    let spec = NoiseSpec {
        gamma1: 0.05,
        gamma_phi: 0.02,
        p_depol: 0.01,
    };
    for n in [2u32, 4, 6] {
        let s = random_state(n);
        group.bench_with_input(BenchmarkId::new("collapse", n), &s, |b, s| {
            b.iter(|| {
                let mut local = s.clone();
                noise.apply_noise(black_box(&mut local), &spec).expect("within density limit")
            })
        });
    }
    group.finish();
}

fn checkpoint_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint");
    let s = random_state(16);
    group.throughput(Throughput::Bytes(16 << 16));
    group.bench_function("save_load_16q", |b| {
        b.iter(|| {
            let dir = tempfile::tempdir().expect("failed to create temp dir");
            save_state(black_box(&s), dir.path()).expect("save");
            load_state(dir.path()).expect("load")
        })
    });
    group.finish();
}

criterion_group! {
    name = benches;
    config = custom_criterion_config();
    targets = gate_benchmarks, mps_benchmarks, compression_benchmarks, noise_benchmarks, checkpoint_benchmarks
}
criterion_main!(benches);
