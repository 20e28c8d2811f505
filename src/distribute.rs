// sharded execution: how a 2^n amplitude vector is split across ranks, and
// the context every rank carries through an spmd run.

pub mod comm;
pub mod exchange;

pub use comm::{ChannelCommunicator, Communicator, LocalCommunicator, Message, Payload, Phase};
pub use exchange::{dist_apply_circuit, dist_apply_gate, global_norm_sqr};

use crate::complex_vector::ComplexVector;
use crate::config::AmplitudePrecision;
use crate::error::{QsimError, Result};
use crate::random::derive_seed;
use crate::runtime::QuantumState;
use log::{debug, info};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    #[default]
    Single,
    MultiProcess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshShape {
    pub data_parallel: u32,
    pub model_parallel: u32,
}

impl MeshShape {
    pub fn new(data_parallel: u32, model_parallel: u32) -> Self {
        Self {
            data_parallel,
            model_parallel,
        }
    }

    pub fn size(&self) -> u32 {
        self.data_parallel * self.model_parallel
    }
}

impl Default for MeshShape {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// one rank's view of the run. immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistContext {
    pub backend: Backend,
    pub mesh_shape: MeshShape,
    pub global_rank: u32,
    pub world_size: u32,
    pub local_rank: u32,
    pub global_seed: u64,
    /// this rank's seed, derived from the global seed and the rank only
    pub seed: u64,
}

impl DistContext {
    pub fn new(
        backend: Backend,
        mesh_shape: MeshShape,
        global_rank: u32,
        local_rank: u32,
        global_seed: u64,
    ) -> Result<Self> {
        let world_size = mesh_shape.size();
        if world_size == 0 {
            return Err(QsimError::InvalidParameter(
                "mesh shape must have at least one rank".to_string(),
            ));
        }
        if global_rank >= world_size {
            return Err(QsimError::InvalidParameter(format!(
                "rank {} outside world of size {}",
                global_rank, world_size
            )));
        }
        if backend == Backend::Single && world_size != 1 {
            return Err(QsimError::InvalidParameter(format!(
                "single backend cannot run a world of size {}",
                world_size
            )));
        }
        Ok(Self {
            backend,
            mesh_shape,
            global_rank,
            world_size,
            local_rank,
            global_seed,
            seed: derive_seed(global_seed, global_rank as u64),
        })
    }

    pub fn single(global_seed: u64) -> Self {
        Self {
            backend: Backend::Single,
            mesh_shape: MeshShape::default(),
            global_rank: 0,
            world_size: 1,
            local_rank: 0,
            global_seed,
            seed: derive_seed(global_seed, 0),
        }
    }

    /// contexts for every rank of an in-process multi-rank run
    pub fn mesh(mesh_shape: MeshShape, global_seed: u64) -> Result<Vec<Self>> {
        (0..mesh_shape.size())
            .map(|rank| DistContext::new(Backend::MultiProcess, mesh_shape, rank, rank, global_seed))
            .collect()
    }

    pub fn is_root(&self) -> bool {
        self.global_rank == 0
    }
}

// one rank's contiguous slice of the global vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePartition {
    pub start_idx: usize,
    pub end_idx: usize,
    pub rank: u32,
}

impl StatePartition {
    pub fn len(&self) -> usize {
        self.end_idx - self.start_idx
    }

    pub fn is_empty(&self) -> bool {
        self.end_idx == self.start_idx
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start_idx..self.end_idx).contains(&index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSpec {
    pub scheme: String,
    pub num_qubits: u32,
    pub world_size: u32,
    pub partitions: Vec<StatePartition>,
}

impl ShardSpec {
    /// equal chunks of 2^n / world_size; the last rank absorbs the remainder
    pub fn contiguous(num_qubits: u32, world_size: u32) -> Result<Self> {
        if world_size == 0 {
            return Err(QsimError::InvalidParameter("world size must be positive".to_string()));
        }
        if num_qubits == 0 || num_qubits >= usize::BITS {
            return Err(QsimError::InvalidDimension(format!(
                "cannot shard {} qubits",
                num_qubits
            )));
        }
        let total_states = 1usize << num_qubits;
        let ws = world_size as usize;
        let states_per_rank = total_states / ws;
        let partitions = (0..ws)
            .map(|rank| {
                let start_idx = rank * states_per_rank;
                let end_idx = if rank == ws - 1 {
                    total_states
                } else {
                    start_idx + states_per_rank
                };
                StatePartition {
                    start_idx,
                    end_idx,
                    rank: rank as u32,
                }
            })
            .collect();
        Ok(Self {
            scheme: "contiguous".to_string(),
            num_qubits,
            world_size,
            partitions,
        })
    }

    pub fn global_len(&self) -> usize {
        1usize << self.num_qubits
    }

    pub fn partition(&self, rank: u32) -> Result<StatePartition> {
        self.partitions
            .get(rank as usize)
            .copied()
            .ok_or_else(|| QsimError::InvalidParameter(format!("no partition for rank {}", rank)))
    }

    /// rank holding `index`; empty partitions never own anything
    pub fn owner_of(&self, index: usize) -> Option<u32> {
        let pos = self.partitions.partition_point(|p| p.end_idx <= index);
        self.partitions
            .get(pos)
            .filter(|p| p.contains(index))
            .map(|p| p.rank)
    }

    /// a gate is local when every shard boundary is a multiple of
    /// 2^(max target + 1), so every amplitude group stays inside one shard
    pub fn is_local(&self, targets: &[usize]) -> bool {
        let top = targets.iter().copied().max().unwrap_or(0);
        let block = 1usize << (top + 1);
        self.partitions.iter().all(|p| p.start_idx % block == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardedState {
    pub rank: u32,
    pub local_data: Vec<Complex64>,
    pub shard_spec: ShardSpec,
    pub seed: u64,
    pub precision: AmplitudePrecision,
    /// exchange steps completed; every rank advances it in lockstep
    pub step: u64,
}

impl ShardedState {
    pub fn global_shape(&self) -> (usize,) {
        (self.shard_spec.global_len(),)
    }

    pub fn partition(&self) -> Result<StatePartition> {
        self.shard_spec.partition(self.rank)
    }

    pub fn local_norm_sqr(&self) -> f64 {
        self.local_data.iter().map(|a| a.norm_sqr()).sum()
    }
}

/// this rank's slice of `state`. pure copy, no arithmetic.
pub fn shard_state(ctx: &DistContext, state: &QuantumState) -> Result<ShardedState> {
    let spec = ShardSpec::contiguous(state.num_qubits, ctx.world_size)?;
    let part = spec.partition(ctx.global_rank)?;
    let local_data = state.amplitudes.as_slice()[part.start_idx..part.end_idx].to_vec();
    debug!(
        "rank {} holds [{}, {}) of {}",
        ctx.global_rank,
        part.start_idx,
        part.end_idx,
        spec.global_len()
    );
    Ok(ShardedState {
        rank: ctx.global_rank,
        local_data,
        shard_spec: spec,
        seed: state.seed,
        precision: state.precision,
        step: 0,
    })
}

/// every rank's shard of `state`, in rank order
pub fn shard_all(state: &QuantumState, world_size: u32) -> Result<Vec<ShardedState>> {
    let contexts = DistContext::mesh(MeshShape::new(world_size, 1), state.seed)?;
    contexts.iter().map(|ctx| shard_state(ctx, state)).collect()
}

/// concatenates shards in rank order after checking they tile the vector
pub fn gather(shards: &[ShardedState]) -> Result<ComplexVector> {
    let first = shards
        .first()
        .ok_or_else(|| QsimError::InvalidParameter("no shards to gather".to_string()))?;
    let spec = &first.shard_spec;
    if shards.len() != spec.world_size as usize {
        return Err(QsimError::InvalidParameter(format!(
            "{} shards for a world of size {}",
            shards.len(),
            spec.world_size
        )));
    }
    let mut data = Vec::with_capacity(spec.global_len());
    for (rank, shard) in shards.iter().enumerate() {
        let part = spec.partition(rank as u32)?;
        if shard.rank as usize != rank || &shard.shard_spec != spec || shard.local_data.len() != part.len() {
            return Err(QsimError::InvalidParameter(format!(
                "shard {} does not match the layout",
                rank
            )));
        }
        data.extend_from_slice(&shard.local_data);
    }
    info!("gathered {} shards into {} amplitudes", shards.len(), data.len());
    Ok(ComplexVector::from_vec(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::runtime::{DenseStateEngine, InitialState};

    #[test]
    fn test_contiguous_partitions_tile_the_vector() {
        let spec = ShardSpec::contiguous(4, 3).unwrap();
        let ranges: Vec<(usize, usize)> = spec.partitions.iter().map(|p| (p.start_idx, p.end_idx)).collect();
        assert_eq!(ranges, vec![(0, 5), (5, 10), (10, 16)]);
        assert_eq!(spec.owner_of(4), Some(0));
        assert_eq!(spec.owner_of(5), Some(1));
        assert_eq!(spec.owner_of(15), Some(2));
        assert_eq!(spec.owner_of(16), None);
    }

    #[test]
    fn test_more_ranks_than_amplitudes() {
        let spec = ShardSpec::contiguous(1, 4).unwrap();
        assert_eq!(spec.partitions[3].len(), 2);
        assert!(spec.partitions[0].is_empty());
        assert_eq!(spec.owner_of(0), Some(3));
    }

    #[test]
    fn test_locality() {
        let spec = ShardSpec::contiguous(5, 4).unwrap(); // chunks of 8
        assert!(spec.is_local(&[0, 2]));
        assert!(!spec.is_local(&[3]));
        assert!(!spec.is_local(&[0, 4]));
        let odd = ShardSpec::contiguous(4, 3).unwrap();
        assert!(!odd.is_local(&[0]));
    }

    #[test]
    fn test_context_validation_and_seeds() {
        assert!(DistContext::new(Backend::Single, MeshShape::new(2, 1), 0, 0, 1).is_err());
        assert!(DistContext::new(Backend::MultiProcess, MeshShape::new(2, 2), 4, 0, 1).is_err());
        let small = DistContext::mesh(MeshShape::new(2, 1), 99).unwrap();
        let large = DistContext::mesh(MeshShape::new(4, 2), 99).unwrap();
        assert_eq!(small[0].seed, large[0].seed);
        assert_ne!(large[0].seed, large[1].seed);
        assert_eq!(large.len(), 8);
    }

    #[test]
    fn test_shard_and_gather_is_bit_exact() {
        let e = DenseStateEngine::new(SimConfig::default()).unwrap();
        let s = e.initialize(6, &InitialState::Random { seed: 12 }).unwrap();
        for ws in [1, 2, 3, 5, 8] {
            let shards = shard_all(&s, ws).unwrap();
            let back = gather(&shards).unwrap();
            assert_eq!(back.as_slice(), s.amplitudes.as_slice());
        }
    }
}
