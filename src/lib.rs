pub mod checkpoint; // sidecar + shard payloads
pub mod circuit; // gate sequences and the circuit text format
pub mod complex_vector; // amplitude buffer
pub mod compression; // dense -> mps with a fidelity contract
pub mod config; // simulation configuration
pub mod distribute; // sharding, exchange, transport
pub mod error; // error taxonomy
pub mod gates; // gate enum and matrices
pub mod jobs; // job store boundary
pub mod noise; // kraus channels, density matrices, trajectories
pub mod random; // seed derivation
pub mod runtime; // dense state engine and diagnostics
pub mod simulate; // simulate() entry point
pub mod tensor_network; // mps engine

pub use error::{QsimError, Result};

#[cfg(test)] // for testing
mod test;
