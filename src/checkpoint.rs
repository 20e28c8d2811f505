// on-disk checkpoints
//
// a checkpoint is a directory:
//
//   metadata.json    provenance sidecar, written by rank 0, readable alone
//   shard_<r>.bin    one per rank: header + little-endian amplitudes
//   state.mps        compressed checkpoints only: the mps chain
//
// shard header (29 bytes): magic "QSHD", format version u32, rank u32,
// precision u8 (0 = complex64, 1 = complex128), offset u64, length u64.
// mps payload: magic "QMPS", format version u32, site count u32, then per
// site left u64, right u64 and left * 2 * right complex128 entries.

use crate::compression::CompressedState;
use crate::config::AmplitudePrecision;
use crate::distribute::{gather, DistContext, MeshShape, ShardSpec, ShardedState};
use crate::error::{QsimError, Result};
use crate::runtime::quantum_state::{decode_amplitudes, encode_amplitudes};
use crate::runtime::QuantumState;
use crate::tensor_network::{MpsState, Truncation};
use log::{debug, info};
use memmap2::MmapOptions;
use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;
pub const METADATA_FILE: &str = "metadata.json";
pub const MPS_FILE: &str = "state.mps";

const SHARD_MAGIC: &[u8; 4] = b"QSHD";
const MPS_MAGIC: &[u8; 4] = b"QMPS";
const SHARD_HEADER_LEN: usize = 29;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub num_qubits: u32,
    pub compressed: bool,
    /// 1.0 for uncompressed checkpoints
    pub fidelity: f64,
    pub world_size: u32,
    pub mesh_shape: MeshShape,
    pub shard_spec: Option<ShardSpec>,
    pub seed: u64,
    pub precision: AmplitudePrecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
}

pub fn shard_path(dir: &Path, rank: u32) -> PathBuf {
    dir.join(format!("shard_{}.bin", rank))
}

pub fn write_metadata(dir: &Path, metadata: &CheckpointMetadata) -> Result<()> {
    fs::create_dir_all(dir)?;
    let text = serde_json::to_string_pretty(metadata)?;
    fs::write(dir.join(METADATA_FILE), text)?;
    Ok(())
}

/// the sidecar alone; no payload file is opened
pub fn read_metadata(dir: &Path) -> Result<CheckpointMetadata> {
    let text = fs::read_to_string(dir.join(METADATA_FILE))?;
    let metadata: CheckpointMetadata = serde_json::from_str(&text)?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(QsimError::CheckpointMismatch(format!(
            "format version {} (expected {})",
            metadata.format_version, FORMAT_VERSION
        )));
    }
    Ok(metadata)
}

fn precision_tag(precision: AmplitudePrecision) -> u8 {
    match precision {
        AmplitudePrecision::Complex64 => 0,
        AmplitudePrecision::Complex128 => 1,
    }
}

/// writes this rank's shard; rank 0 also writes the sidecar
pub fn save_checkpoint(ctx: &DistContext, shard: &ShardedState, dir: &Path) -> Result<PathBuf> {
    if shard.rank != ctx.global_rank || shard.shard_spec.world_size != ctx.world_size {
        return Err(QsimError::CheckpointMismatch(format!(
            "shard of rank {}/{} saved from context rank {}/{}",
            shard.rank, shard.shard_spec.world_size, ctx.global_rank, ctx.world_size
        )));
    }
    let part = shard.partition()?;
    fs::create_dir_all(dir)?;

    let path = shard_path(dir, ctx.global_rank);
    let mut out = BufWriter::new(File::create(&path)?);
    out.write_all(SHARD_MAGIC)?;
    out.write_all(&FORMAT_VERSION.to_le_bytes())?;
    out.write_all(&ctx.global_rank.to_le_bytes())?;
    out.write_all(&[precision_tag(shard.precision)])?;
    out.write_all(&(part.start_idx as u64).to_le_bytes())?;
    out.write_all(&(part.len() as u64).to_le_bytes())?;
    out.write_all(&encode_amplitudes(&shard.local_data, shard.precision))?;
    out.flush()?;

    if ctx.is_root() {
        write_metadata(
            dir,
            &CheckpointMetadata {
                format_version: FORMAT_VERSION,
                num_qubits: shard.shard_spec.num_qubits,
                compressed: false,
                fidelity: 1.0,
                world_size: ctx.world_size,
                mesh_shape: ctx.mesh_shape,
                shard_spec: Some(shard.shard_spec.clone()),
                seed: shard.seed,
                precision: shard.precision,
                compression_ratio: None,
                truncation: None,
            },
        )?;
    }
    info!(
        "rank {} checkpointed {} amplitudes to {}",
        ctx.global_rank,
        part.len(),
        path.display()
    );
    Ok(path)
}

/// restores this rank's shard. the stored world size and mesh shape must
/// match the context exactly.
pub fn load_checkpoint(ctx: &DistContext, dir: &Path) -> Result<ShardedState> {
    let metadata = read_metadata(dir)?;
    if metadata.compressed {
        return Err(QsimError::CheckpointMismatch(
            "checkpoint holds a compressed state, not shards".to_string(),
        ));
    }
    if metadata.world_size != ctx.world_size || metadata.mesh_shape != ctx.mesh_shape {
        return Err(QsimError::CheckpointMismatch(format!(
            "saved with world size {} and mesh {:?}, restoring with world size {} and mesh {:?}",
            metadata.world_size, metadata.mesh_shape, ctx.world_size, ctx.mesh_shape
        )));
    }
    let spec = metadata
        .shard_spec
        .ok_or_else(|| QsimError::CheckpointMismatch("sidecar has no shard spec".to_string()))?;
    if spec != ShardSpec::contiguous(metadata.num_qubits, metadata.world_size)? {
        return Err(QsimError::CheckpointMismatch("unrecognised shard layout".to_string()));
    }
    let part = spec.partition(ctx.global_rank)?;

    let path = shard_path(dir, ctx.global_rank);
    let file = File::open(&path)?;
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    let bytes: &[u8] = &mmap;
    if bytes.len() < SHARD_HEADER_LEN || &bytes[..4] != SHARD_MAGIC {
        return Err(QsimError::CheckpointMismatch(format!("{} is not a shard file", path.display())));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let long = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(b)
    };
    let (version, rank, tag, offset, len) = (word(4), word(8), bytes[12], long(13), long(21));
    if version != FORMAT_VERSION
        || rank != ctx.global_rank
        || tag != precision_tag(metadata.precision)
        || offset != part.start_idx as u64
        || len != part.len() as u64
    {
        return Err(QsimError::CheckpointMismatch(format!(
            "shard header (version {}, rank {}, offset {}, len {}) does not match partition {:?}",
            version, rank, offset, len, part
        )));
    }
    let local_data = decode_amplitudes(&bytes[SHARD_HEADER_LEN..], metadata.precision)?;
    if local_data.len() != part.len() {
        return Err(QsimError::CheckpointMismatch(format!(
            "shard holds {} amplitudes, header says {}",
            local_data.len(),
            part.len()
        )));
    }
    debug!("rank {} restored [{}, {})", ctx.global_rank, part.start_idx, part.end_idx);
    Ok(ShardedState {
        rank: ctx.global_rank,
        local_data,
        shard_spec: spec,
        seed: metadata.seed,
        precision: metadata.precision,
        step: 0,
    })
}

/// single-rank checkpoint of a whole state
pub fn save_state(state: &QuantumState, dir: &Path) -> Result<()> {
    let ctx = DistContext::single(state.seed);
    let shard = crate::distribute::shard_state(&ctx, state)?;
    save_checkpoint(&ctx, &shard, dir)?;
    Ok(())
}

/// reassembles the global state from every shard, whatever the world size
pub fn load_state(dir: &Path) -> Result<QuantumState> {
    let metadata = read_metadata(dir)?;
    if metadata.compressed {
        let compressed = load_compressed(dir)?;
        return crate::compression::decompress(&compressed);
    }
    let contexts = DistContext::mesh(metadata.mesh_shape, metadata.seed)?;
    let shards = contexts
        .iter()
        .map(|ctx| load_checkpoint(ctx, dir))
        .collect::<Result<Vec<_>>>()?;
    let amplitudes = gather(&shards)?;
    // stored bits are restored as-is, without renormalizing
    Ok(QuantumState {
        num_qubits: metadata.num_qubits,
        amplitudes,
        seed: metadata.seed,
        precision: metadata.precision,
    })
}

// sequential reader over the mps payload
struct Cursor<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.at.checked_add(n).filter(|&end| end <= self.bytes.len());
        let end = end.ok_or_else(|| QsimError::CheckpointMismatch("mps payload is truncated".to_string()))?;
        let chunk = &self.bytes[self.at..end];
        self.at = end;
        Ok(chunk)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut a = [0u8; 8];
        a.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(a))
    }
}

pub fn save_compressed(compressed: &CompressedState, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let tensors = compressed.mps.tensors();
    let mut out = BufWriter::new(File::create(dir.join(MPS_FILE))?);
    out.write_all(MPS_MAGIC)?;
    out.write_all(&FORMAT_VERSION.to_le_bytes())?;
    out.write_all(&(tensors.len() as u32).to_le_bytes())?;
    for t in tensors {
        let (l, _, r) = t.dim();
        out.write_all(&(l as u64).to_le_bytes())?;
        out.write_all(&(r as u64).to_le_bytes())?;
        let entries: Vec<Complex64> = t.iter().copied().collect();
        out.write_all(&encode_amplitudes(&entries, AmplitudePrecision::Complex128))?;
    }
    out.flush()?;

    write_metadata(
        dir,
        &CheckpointMetadata {
            format_version: FORMAT_VERSION,
            num_qubits: compressed.original_num_qubits,
            compressed: true,
            fidelity: compressed.fidelity_achieved,
            world_size: 1,
            mesh_shape: MeshShape::default(),
            shard_spec: None,
            seed: compressed.seed,
            precision: compressed.precision,
            compression_ratio: Some(compressed.compression_ratio),
            truncation: Some(compressed.mps.policy()),
        },
    )?;
    info!(
        "saved compressed checkpoint: {} sites, fidelity {:.9}",
        tensors.len(),
        compressed.fidelity_achieved
    );
    Ok(())
}

pub fn load_compressed(dir: &Path) -> Result<CompressedState> {
    let metadata = read_metadata(dir)?;
    if !metadata.compressed {
        return Err(QsimError::CheckpointMismatch(
            "checkpoint holds shards, not a compressed state".to_string(),
        ));
    }
    let bytes = fs::read(dir.join(MPS_FILE))?;
    let mut cursor = Cursor { bytes: &bytes, at: 0 };
    if cursor.take(4)? != MPS_MAGIC {
        return Err(QsimError::CheckpointMismatch("not an mps payload".to_string()));
    }
    let version = cursor.u32()?;
    if version != FORMAT_VERSION {
        return Err(QsimError::CheckpointMismatch(format!("mps payload version {}", version)));
    }
    let sites = cursor.u32()?;
    if sites != metadata.num_qubits {
        return Err(QsimError::CheckpointMismatch(format!(
            "payload has {} sites, sidecar says {} qubits",
            sites, metadata.num_qubits
        )));
    }
    let width = AmplitudePrecision::Complex128.bytes_per_amplitude();
    let mut tensors = Vec::with_capacity(sites as usize);
    for _ in 0..sites {
        let l = cursor.u64()? as usize;
        let r = cursor.u64()? as usize;
        let bytes_needed = l
            .checked_mul(2 * r)
            .and_then(|count| count.checked_mul(width))
            .ok_or_else(|| QsimError::CheckpointMismatch("bond dimensions overflow".to_string()))?;
        let entries = decode_amplitudes(cursor.take(bytes_needed)?, AmplitudePrecision::Complex128)?;
        let t = Array3::from_shape_vec((l, 2, r), entries)
            .map_err(|e| QsimError::CheckpointMismatch(e.to_string()))?;
        tensors.push(t);
    }
    let policy = metadata.truncation.unwrap_or_else(|| Truncation::new(usize::MAX, 0.0));
    let mps = MpsState::from_tensors(tensors, policy)?;
    Ok(CompressedState {
        mps,
        fidelity_achieved: metadata.fidelity,
        compression_ratio: metadata.compression_ratio.unwrap_or(1.0),
        original_num_qubits: metadata.num_qubits,
        seed: metadata.seed,
        precision: metadata.precision,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::StateCompressor;
    use crate::config::SimConfig;
    use crate::distribute::{shard_all, Backend};
    use crate::runtime::{DenseStateEngine, InitialState};

    fn state(n: u32, seed: u64) -> QuantumState {
        let e = DenseStateEngine::new(SimConfig::default()).unwrap();
        e.initialize(n, &InitialState::Random { seed }).unwrap()
    }

    fn save_all(dir: &Path, s: &QuantumState, mesh: MeshShape) {
        let contexts = DistContext::mesh(mesh, s.seed).unwrap();
        let shards = shard_all(s, mesh.size()).unwrap();
        for (ctx, shard) in contexts.iter().zip(&shards) {
            save_checkpoint(ctx, shard, dir).unwrap();
        }
    }

    #[test]
    fn test_sharded_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(6, 4);
        let mesh = MeshShape::new(3, 1);
        save_all(dir.path(), &s, mesh);

        let contexts = DistContext::mesh(mesh, s.seed).unwrap();
        let restored: Vec<ShardedState> = contexts
            .iter()
            .map(|ctx| load_checkpoint(ctx, dir.path()).unwrap())
            .collect();
        assert_eq!(gather(&restored).unwrap().as_slice(), s.amplitudes.as_slice());
        assert_eq!(load_state(dir.path()).unwrap().amplitudes, s.amplitudes);
    }

    #[test]
    fn test_mismatched_context_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(5, 8);
        save_all(dir.path(), &s, MeshShape::new(2, 1));

        let wider = DistContext::mesh(MeshShape::new(4, 1), s.seed).unwrap();
        assert!(matches!(
            load_checkpoint(&wider[0], dir.path()),
            Err(QsimError::CheckpointMismatch(_))
        ));
        // same world size, different mesh
        let reshaped = DistContext::new(Backend::MultiProcess, MeshShape::new(1, 2), 0, 0, s.seed).unwrap();
        assert!(matches!(
            load_checkpoint(&reshaped, dir.path()),
            Err(QsimError::CheckpointMismatch(_))
        ));
    }

    #[test]
    fn test_sidecar_is_readable_alone() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(4, 1);
        save_state(&s, dir.path()).unwrap();
        fs::remove_file(shard_path(dir.path(), 0)).unwrap();

        let metadata = read_metadata(dir.path()).unwrap();
        assert_eq!(metadata.num_qubits, 4);
        assert!(!metadata.compressed);
        assert_eq!(metadata.world_size, 1);
        assert_eq!(metadata.fidelity, 1.0);
        assert!(load_state(dir.path()).is_err());
    }

    #[test]
    fn test_corrupt_shard_header() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(3, 2);
        save_state(&s, dir.path()).unwrap();
        let path = shard_path(dir.path(), 0);
        let mut bytes = fs::read(&path).unwrap();
        bytes[8] = 7; // rank
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            load_checkpoint(&DistContext::single(s.seed), dir.path()),
            Err(QsimError::CheckpointMismatch(_))
        ));
    }

    #[test]
    fn test_single_precision_payload_is_half_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimConfig {
            amplitude_precision: AmplitudePrecision::Complex64,
            ..SimConfig::default()
        };
        let e = DenseStateEngine::new(config).unwrap();
        let s = e.initialize(4, &InitialState::Random { seed: 3 }).unwrap();
        save_state(&s, dir.path()).unwrap();
        let size = fs::metadata(shard_path(dir.path(), 0)).unwrap().len() as usize;
        assert_eq!(size, SHARD_HEADER_LEN + 16 * 8);
        // already rounded through f32, so the round trip is exact
        assert_eq!(load_state(dir.path()).unwrap().amplitudes, s.amplitudes);
    }

    #[test]
    fn test_compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(7, 11);
        let compressed = StateCompressor::new(16).compress_state(&s, 0.95).unwrap();
        save_compressed(&compressed, dir.path()).unwrap();

        let metadata = read_metadata(dir.path()).unwrap();
        assert!(metadata.compressed);
        assert_eq!(metadata.fidelity, compressed.fidelity_achieved);

        let back = load_compressed(dir.path()).unwrap();
        assert_eq!(back.mps.tensors(), compressed.mps.tensors());
        assert!(load_checkpoint(&DistContext::single(s.seed), dir.path()).is_err());
        let restored = load_state(dir.path()).unwrap();
        assert_eq!(restored.num_qubits, 7);
    }
}
