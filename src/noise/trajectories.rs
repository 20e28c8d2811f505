// monte carlo averaging over quantum-jump trajectories
//
// every trajectory owns its state copy and a ChaCha8 stream seeded from
// (global_seed, index). trajectories run on the rayon pool and results are
// reduced in index order, so the statistics do not depend on scheduling.

use super::{NoiseEngine, NoiseSpec};
use crate::error::Result;
use crate::gates::GateMatrix;
use crate::random::stream_rng;
use crate::runtime::engine::contract_targets;
use crate::runtime::QuantumState;
use log::info;
use num_complex::Complex64;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStats {
    pub mean: f64,
    /// population variance of the per-trajectory values
    pub variance: f64,
    pub trajectories: usize,
}

impl TrajectoryStats {
    pub fn standard_error(&self) -> f64 {
        if self.trajectories == 0 {
            0.0
        } else {
            (self.variance / self.trajectories as f64).sqrt()
        }
    }

    fn from_values(values: &[f64]) -> Self {
        // welford, in index order
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for (i, &x) in values.iter().enumerate() {
            let delta = x - mean;
            mean += delta / (i + 1) as f64;
            m2 += delta * (x - mean);
        }
        let variance = if values.is_empty() {
            0.0
        } else {
            m2 / values.len() as f64
        };
        Self {
            mean,
            variance,
            trajectories: values.len(),
        }
    }
}

impl NoiseEngine {
    /// one stochastic unravelling of the channels in `spec` on a pure state:
    /// for each qubit and channel, picks kraus operator K_i with probability
    /// ‖K_i ψ‖² and replaces ψ by K_i ψ / ‖K_i ψ‖.
    pub fn apply_noise_trajectory<R: Rng + ?Sized>(
        &self,
        state: &mut QuantumState,
        spec: &NoiseSpec,
        rng: &mut R,
    ) -> Result<()> {
        spec.validate()?;
        let channels = spec
            .channels()
            .iter()
            .map(|c| c.operators())
            .collect::<Result<Vec<_>>>()?;
        for q in 0..state.num_qubits as usize {
            for ops in &channels {
                jump(state, ops, q, rng)?;
            }
        }
        Ok(())
    }
}

fn jump<R: Rng + ?Sized>(state: &mut QuantumState, ops: &[GateMatrix], qubit: usize, rng: &mut R) -> Result<()> {
    let norm = state.amplitudes.norm_sqr();
    let r = rng.gen::<f64>();
    let last = ops.len().saturating_sub(1);
    let mut cumulative = 0.0;
    for (i, k) in ops.iter().enumerate() {
        let mut branch = state.amplitudes.as_slice().to_vec();
        contract_targets(&mut branch, state.num_qubits, k, &[qubit])?;
        let weight: f64 = branch.iter().map(|a| a.norm_sqr()).sum::<f64>() / norm;
        cumulative += weight;
        // the last operator absorbs rounding in the cumulative sum
        if weight > 0.0 && (r < cumulative || i == last) {
            let scale = 1.0 / (weight * norm).sqrt();
            state
                .amplitudes
                .as_mut_slice()
                .iter_mut()
                .zip(branch)
                .for_each(|(a, b): (&mut Complex64, Complex64)| *a = b * scale);
            break;
        }
    }
    Ok(())
}

/// runs `count` independent trajectories of one noise round on `state` and
/// averages `observable` over the results. `on_done` is called once per
/// finished trajectory, from worker threads.
pub fn run_trajectories<F, P>(
    engine: &NoiseEngine,
    state: &QuantumState,
    spec: &NoiseSpec,
    count: usize,
    global_seed: u64,
    observable: F,
    on_done: P,
) -> Result<TrajectoryStats>
where
    F: Fn(&QuantumState) -> f64 + Sync,
    P: Fn() + Sync,
{
    spec.validate()?;
    let values = (0..count)
        .into_par_iter()
        .map(|index| {
            let mut rng = stream_rng(global_seed, index as u64);
            let mut local = state.clone();
            engine.apply_noise_trajectory(&mut local, spec, &mut rng)?;
            let value = observable(&local);
            on_done();
            Ok(value)
        })
        .collect::<Result<Vec<f64>>>()?;
    let stats = TrajectoryStats::from_values(&values);
    info!(
        "{} trajectories: mean {:.6}, stderr {:.2e}",
        stats.trajectories,
        stats.mean,
        stats.standard_error()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Circuit;
    use crate::config::SimConfig;
    use crate::runtime::{compute_fidelity, DenseStateEngine, InitialState};

    fn bell() -> (DenseStateEngine, NoiseEngine, QuantumState) {
        let e = DenseStateEngine::new(SimConfig::default()).unwrap();
        let n = NoiseEngine::new(SimConfig::default()).unwrap();
        let mut s = e.initialize(2, &InitialState::Zero).unwrap();
        e.apply_circuit(&mut s, &Circuit::bell()).unwrap();
        (e, n, s)
    }

    #[test]
    fn test_welford_matches_direct() {
        let stats = TrajectoryStats::from_values(&[1.0, 2.0, 3.0, 4.0]);
        assert!((stats.mean - 2.5).abs() < 1e-15);
        assert!((stats.variance - 1.25).abs() < 1e-15);
        assert_eq!(stats.trajectories, 4);
    }

    #[test]
    fn test_trajectories_are_deterministic() {
        let (_, n, s) = bell();
        let spec = NoiseSpec {
            gamma1: 0.1,
            p_depol: 0.05,
            ..NoiseSpec::default()
        };
        let obs = |t: &QuantumState| t.probabilities()[0];
        let a = run_trajectories(&n, &s, &spec, 64, 17, obs, || {}).unwrap();
        let b = run_trajectories(&n, &s, &spec, 64, 17, obs, || {}).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_trajectory_mean_matches_density_path() {
        let (_, n, s) = bell();
        let spec = NoiseSpec::amplitude_damping(0.1);
        let target = s.amplitudes.clone();
        let stats = run_trajectories(
            &n,
            &s,
            &spec,
            2000,
            3,
            |t| compute_fidelity(&t.amplitudes, &target).unwrap_or(0.0),
            || {},
        )
        .unwrap();

        let mut rho = n.to_density(&s).unwrap();
        n.evolve_density(&mut rho, &spec).unwrap();
        let exact = rho.fidelity_with_pure(&target).unwrap();
        assert!((stats.mean - exact).abs() < 0.03, "{} vs {}", stats.mean, exact);
    }

    #[test]
    fn test_trajectory_keeps_normalization() {
        let (_, n, mut s) = bell();
        let spec = NoiseSpec {
            gamma1: 0.3,
            gamma_phi: 0.2,
            p_depol: 0.1,
        };
        let mut rng = stream_rng(1, 0);
        for _ in 0..10 {
            n.apply_noise_trajectory(&mut s, &spec, &mut rng).unwrap();
            assert!(s.is_normalized(1e-10));
        }
    }
}
