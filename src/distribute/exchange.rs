// gate application on sharded states
//
// amplitudes touched by a gate on targets T form groups that share
// base = index & !mask(T). a group is owned by the rank holding its base.
// when every shard boundary is a multiple of 2^(max(T) + 1) all groups are
// rank-local and no messages are exchanged. otherwise two phases run,
// identical on every rank. every call advances the shard's step counter.
//
// 1. scatter: every rank sends each other rank one message with the
//    amplitudes whose group that rank owns (possibly none), then receives one
//    message from each other rank in ascending rank order.
// 2. return: owners apply the gate to complete groups, then send every other
//    rank one message with the updated amplitudes it originally held, and
//    receive the same way.
//
// a timeout, a disconnect or a message with the wrong step, phase or index
// set is a `CommunicationFailure`. nothing is retried: a partial exchange
// leaves the shard undefined and the run restarts from a checkpoint.

use super::comm::{Communicator, Message, Payload, Phase};
use super::ShardedState;
use crate::circuit::{Circuit, GateOp};
use crate::error::{QsimError, Result};
use crate::gates::{GateLibrary, GateMatrix};
use crate::runtime::engine::contract_targets;
use crate::runtime::validate_targets;
use log::debug;
use num_complex::Complex64;
use std::collections::BTreeMap;

pub fn dist_apply_gate(
    comm: &dyn Communicator,
    shard: &mut ShardedState,
    library: &GateLibrary,
    op: &GateOp,
) -> Result<()> {
    let matrix = library.matrix(&op.gate)?;
    let k = matrix.num_qubits().ok_or_else(|| {
        QsimError::InvalidGate(format!("matrix dimension {} is not a power of two", matrix.dim()))
    })?;
    validate_targets(k, &op.targets, shard.shard_spec.num_qubits)?;
    if comm.world_size() != shard.shard_spec.world_size as usize || comm.rank() != shard.rank as usize {
        return Err(QsimError::InvalidParameter(format!(
            "communicator (rank {} of {}) does not match shard (rank {} of {})",
            comm.rank(),
            comm.world_size(),
            shard.rank,
            shard.shard_spec.world_size
        )));
    }

    shard.step += 1;
    if shard.shard_spec.is_local(&op.targets) {
        let top = op.targets.iter().copied().max().unwrap_or(0) as u32 + 1;
        for block in shard.local_data.chunks_mut(1usize << top) {
            contract_targets(block, top, &matrix, &op.targets)?;
        }
        return Ok(());
    }

    debug!(
        "rank {} step {}: cross-shard {} on {:?}",
        shard.rank,
        shard.step,
        op.gate.name(),
        op.targets
    );
    exchange_and_apply(comm, shard, &matrix, &op.targets)
}

pub fn dist_apply_circuit(
    comm: &dyn Communicator,
    shard: &mut ShardedState,
    library: &GateLibrary,
    circuit: &Circuit,
) -> Result<()> {
    for op in &circuit.ops {
        dist_apply_gate(comm, shard, library, op)?;
    }
    Ok(())
}

/// Σ |a|² over all ranks, summed in rank order so every rank gets the same bits
pub fn global_norm_sqr(comm: &dyn Communicator, shard: &mut ShardedState) -> Result<f64> {
    let me = comm.rank();
    let local = shard.local_norm_sqr();
    if comm.world_size() == 1 {
        return Ok(local);
    }
    shard.step += 1;
    for peer in (0..comm.world_size()).filter(|&p| p != me) {
        comm.send(
            peer,
            Message {
                from: me,
                step: shard.step,
                phase: Phase::Reduce,
                payload: Payload::Scalar(local),
            },
        )?;
    }
    let mut total = 0.0;
    for peer in 0..comm.world_size() {
        if peer == me {
            total += local;
            continue;
        }
        match expect(comm, peer, shard.step, Phase::Reduce)? {
            Payload::Scalar(value) => total += value,
            Payload::Amplitudes(_) => {
                return Err(QsimError::comm(me, format!("rank {} sent amplitudes during reduce", peer)))
            }
        }
    }
    Ok(total)
}

fn expect(comm: &dyn Communicator, from: usize, step: u64, phase: Phase) -> Result<Payload> {
    let message = comm.recv(from)?;
    if message.from != from || message.step != step || message.phase != phase {
        return Err(QsimError::comm(
            comm.rank(),
            format!(
                "expected step {} {:?} from rank {}, got step {} {:?} from rank {}",
                step, phase, from, message.step, message.phase, message.from
            ),
        ));
    }
    Ok(message.payload)
}

fn expect_amplitudes(comm: &dyn Communicator, from: usize, step: u64, phase: Phase) -> Result<Vec<(usize, Complex64)>> {
    match expect(comm, from, step, phase)? {
        Payload::Amplitudes(entries) => Ok(entries),
        Payload::Scalar(_) => Err(QsimError::comm(
            comm.rank(),
            format!("rank {} sent a scalar during {:?}", from, phase),
        )),
    }
}

// global index of entry `a` of the group at `base`; target 0 is the most
// significant bit of `a`
fn group_index(base: usize, targets: &[usize], a: usize) -> usize {
    let k = targets.len();
    targets
        .iter()
        .enumerate()
        .fold(base, |acc, (j, &q)| acc | (((a >> (k - 1 - j)) & 1) << q))
}

fn exchange_and_apply(
    comm: &dyn Communicator,
    shard: &mut ShardedState,
    matrix: &GateMatrix,
    targets: &[usize],
) -> Result<()> {
    let me = comm.rank();
    let world = comm.world_size();
    let step = shard.step;
    let spec = shard.shard_spec.clone();
    let part = spec.partition(shard.rank)?;
    let mask = targets.iter().fold(0usize, |m, &q| m | (1 << q));
    let owner = |index: usize| -> Result<usize> {
        spec.owner_of(index & !mask)
            .map(|r| r as usize)
            .ok_or_else(|| QsimError::comm(me, format!("no owner for index {}", index)))
    };

    // scatter
    let mut outgoing: Vec<Vec<(usize, Complex64)>> = vec![Vec::new(); world];
    for (offset, &amp) in shard.local_data.iter().enumerate() {
        let index = part.start_idx + offset;
        let dest = owner(index)?;
        if dest != me {
            outgoing[dest].push((index, amp));
        }
    }
    for (peer, entries) in outgoing.into_iter().enumerate() {
        if peer != me {
            comm.send(
                peer,
                Message {
                    from: me,
                    step,
                    phase: Phase::Scatter,
                    payload: Payload::Amplitudes(entries),
                },
            )?;
        }
    }
    let mut remote: BTreeMap<usize, (usize, Complex64)> = BTreeMap::new();
    for peer in (0..world).filter(|&p| p != me) {
        for (index, amp) in expect_amplitudes(comm, peer, step, Phase::Scatter)? {
            let held_by_peer = spec.partitions.get(peer).map(|p| p.contains(index)).unwrap_or(false);
            if !held_by_peer || owner(index)? != me {
                return Err(QsimError::comm(
                    me,
                    format!("rank {} sent index {} which it does not hold for us", peer, index),
                ));
            }
            remote.insert(index, (peer, amp));
        }
    }

    // apply to every group whose base we hold
    let dim = matrix.dim();
    let g = matrix.view();
    let mut returning: Vec<Vec<(usize, Complex64)>> = vec![Vec::new(); world];
    let mut group = vec![Complex64::new(0.0, 0.0); dim];
    for base in (part.start_idx..part.end_idx).filter(|i| i & mask == 0) {
        for (a, slot) in group.iter_mut().enumerate() {
            let index = group_index(base, targets, a);
            *slot = if part.contains(index) {
                shard.local_data[index - part.start_idx]
            } else {
                remote
                    .get(&index)
                    .map(|&(_, amp)| amp)
                    .ok_or_else(|| QsimError::comm(me, format!("amplitude {} never arrived", index)))?
            };
        }
        for r in 0..dim {
            let value: Complex64 = (0..dim).map(|c| g[[r, c]] * group[c]).sum();
            let index = group_index(base, targets, r);
            if part.contains(index) {
                shard.local_data[index - part.start_idx] = value;
            } else if let Some(&(origin, _)) = remote.get(&index) {
                returning[origin].push((index, value));
            }
        }
    }

    // return
    for (peer, mut entries) in returning.into_iter().enumerate() {
        if peer != me {
            entries.sort_by_key(|&(index, _)| index);
            comm.send(
                peer,
                Message {
                    from: me,
                    step,
                    phase: Phase::Return,
                    payload: Payload::Amplitudes(entries),
                },
            )?;
        }
    }
    let mut expected = 0usize;
    let mut received = 0usize;
    for (offset, _) in shard.local_data.iter().enumerate() {
        if owner(part.start_idx + offset)? != me {
            expected += 1;
        }
    }
    for peer in (0..world).filter(|&p| p != me) {
        for (index, amp) in expect_amplitudes(comm, peer, step, Phase::Return)? {
            if !part.contains(index) || owner(index)? != peer {
                return Err(QsimError::comm(
                    me,
                    format!("rank {} returned index {} it does not own", peer, index),
                ));
            }
            shard.local_data[index - part.start_idx] = amp;
            received += 1;
        }
    }
    if received != expected {
        return Err(QsimError::comm(
            me,
            format!("expected {} returned amplitudes, got {}", expected, received),
        ));
    }
    Ok(())
}
