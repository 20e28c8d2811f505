// error taxonomy shared by every engine in the crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QsimError {
    /// bad qubit count, or a buffer whose length is not 2^n
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    /// bad arity, out-of-range or duplicated target, non-unitary custom matrix
    #[error("invalid gate: {0}")]
    InvalidGate(String),

    /// channel strength, fidelity target or config value outside its domain
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("scaling limit exceeded: {operation} needs {required}, limit is {limit}")]
    ScalingLimitExceeded {
        operation: &'static str,
        required: String,
        limit: String,
    },

    #[error(
        "fidelity {target} not achievable with bond dimension {bond_dim_max} (best achieved {achieved})"
    )]
    FidelityNotAchievable {
        target: f64,
        achieved: f64,
        bond_dim_max: usize,
    },

    #[error("checkpoint mismatch: {0}")]
    CheckpointMismatch(String),

    /// cross-shard exchange did not complete; the run must restart from a checkpoint
    #[error("communication failure on rank {rank}: {message}")]
    CommunicationFailure { rank: usize, message: String },

    #[error("circuit parse error on line {line}: {message}")]
    CircuitParse { line: usize, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QsimError>;

impl QsimError {
    pub(crate) fn scaling(operation: &'static str, required: impl ToString, limit: impl ToString) -> Self {
        QsimError::ScalingLimitExceeded {
            operation,
            required: required.to_string(),
            limit: limit.to_string(),
        }
    }

    pub(crate) fn comm(rank: usize, message: impl Into<String>) -> Self {
        QsimError::CommunicationFailure {
            rank,
            message: message.into(),
        }
    }

    /// true for errors after which the distributed run cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, QsimError::CommunicationFailure { .. })
    }
}
