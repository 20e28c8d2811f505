// point-to-point transport between ranks.
//
// `ChannelCommunicator` wires every ordered pair of ranks with its own
// crossbeam channel, so messages from one peer arrive in the order sent and
// a rank can receive from a specific peer without buffering the others.

use crate::error::{QsimError, Result};
use crossbeam_channel as cb;
use log::error;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Scatter,
    Return,
    Reduce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// (global index, amplitude), ascending by index
    Amplitudes(Vec<(usize, Complex64)>),
    Scalar(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub from: usize,
    pub step: u64,
    pub phase: Phase,
    pub payload: Payload,
}

pub trait Communicator: Send {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;
    /// non-blocking; fails only when the peer is gone
    fn send(&self, to: usize, message: Message) -> Result<()>;
    /// blocks until `from` delivers its next message or the timeout passes
    fn recv(&self, from: usize) -> Result<Message>;
}

/// the only rank of a world of size one
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCommunicator;

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn send(&self, to: usize, _message: Message) -> Result<()> {
        Err(QsimError::comm(0, format!("no peer {} in a single-rank world", to)))
    }

    fn recv(&self, from: usize) -> Result<Message> {
        Err(QsimError::comm(0, format!("no peer {} in a single-rank world", from)))
    }
}

pub struct ChannelCommunicator {
    rank: usize,
    // indexed by peer rank; `None` at our own slot
    outgoing: Vec<Option<cb::Sender<Message>>>,
    incoming: Vec<Option<cb::Receiver<Message>>>,
    timeout: Duration,
}

impl ChannelCommunicator {
    /// endpoints for every rank of a fully connected mesh, in rank order
    pub fn mesh(world_size: usize, timeout: Duration) -> Vec<ChannelCommunicator> {
        let mut outgoing: Vec<Vec<Option<cb::Sender<Message>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();
        let mut incoming: Vec<Vec<Option<cb::Receiver<Message>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();
        for from in 0..world_size {
            for to in 0..world_size {
                if from != to {
                    let (tx, rx) = cb::unbounded();
                    outgoing[from][to] = Some(tx);
                    incoming[to][from] = Some(rx);
                }
            }
        }
        outgoing
            .into_iter()
            .zip(incoming)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| ChannelCommunicator {
                rank,
                outgoing,
                incoming,
                timeout,
            })
            .collect()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.outgoing.len()
    }

    fn send(&self, to: usize, message: Message) -> Result<()> {
        let tx = self
            .outgoing
            .get(to)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| QsimError::comm(self.rank, format!("no channel to rank {}", to)))?;
        tx.send(message).map_err(|_| {
            error!("rank {}: peer {} disconnected during send", self.rank, to);
            QsimError::comm(self.rank, format!("rank {} disconnected", to))
        })
    }

    fn recv(&self, from: usize) -> Result<Message> {
        let rx = self
            .incoming
            .get(from)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| QsimError::comm(self.rank, format!("no channel from rank {}", from)))?;
        match rx.recv_timeout(self.timeout) {
            Ok(message) => Ok(message),
            Err(cb::RecvTimeoutError::Timeout) => {
                error!("rank {}: timed out waiting for rank {}", self.rank, from);
                Err(QsimError::comm(
                    self.rank,
                    format!("timed out after {:?} waiting for rank {}", self.timeout, from),
                ))
            }
            Err(cb::RecvTimeoutError::Disconnected) => {
                error!("rank {}: rank {} disconnected", self.rank, from);
                Err(QsimError::comm(self.rank, format!("rank {} disconnected", from)))
            }
        }
    }
}
