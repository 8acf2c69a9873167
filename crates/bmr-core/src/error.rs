//! Error taxonomy of the relay core: terminal packing errors, transient
//! transport conditions, and categorized verifier reverts.

use thiserror::Error;

/// Structured revert code reported by the destination verifier contract
/// for a rejected segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertCode {
    /// Destination expects an earlier event sequence than was sent.
    InvalidSequence,
    /// Destination trusts a lower source height than was sent.
    BlockUpdateLower,
    /// Destination is already past the sent event sequence.
    InvalidSequenceHigher,
    /// Destination already trusts a higher source height.
    BlockUpdateHigher,
    Unauthorized,
    /// Unmapped contract error code.
    Unknown(u32),
}

/// What the orchestrator does about a revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertAction {
    /// Truncate the backlog to the verifier's reported progress.
    Rewind,
    /// Resubmit the segment without touching the backlog.
    Retry,
    /// Abort the pipeline; continuing would relay against a diverged
    /// verifier state.
    Fatal,
}

impl RevertCode {
    pub fn action(&self) -> RevertAction {
        match self {
            RevertCode::InvalidSequence | RevertCode::BlockUpdateLower => RevertAction::Rewind,
            RevertCode::InvalidSequenceHigher
            | RevertCode::BlockUpdateHigher
            | RevertCode::Unauthorized => RevertAction::Retry,
            RevertCode::Unknown(_) => RevertAction::Fatal,
        }
    }
}

impl std::fmt::Display for RevertCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevertCode::InvalidSequence => write!(f, "invalid sequence"),
            RevertCode::BlockUpdateLower => write!(f, "invalid block-update lower"),
            RevertCode::InvalidSequenceHigher => write!(f, "invalid sequence higher"),
            RevertCode::BlockUpdateHigher => write!(f, "invalid block-update higher"),
            RevertCode::Unauthorized => write!(f, "unauthorized"),
            RevertCode::Unknown(code) => write!(f, "unknown code {code}"),
        }
    }
}

/// Transient transport conditions. Recovered with backoff inside the
/// affected component; they never abort the pipeline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("transaction pending")]
    Pending,
    #[error("transaction executing")]
    Executing,
    #[error("transaction pool overflow")]
    PoolOverflow,
    #[error("transaction expired")]
    Expired,
}

#[derive(Error, Debug)]
pub enum RelayError {
    /// A single block update's proof exceeds the transaction size limit;
    /// the update can never be relayed on this chain pairing.
    #[error("invalid BlockUpdate.Proof size: {size} > limit {limit} at height {height}")]
    BlockUpdateProofOversize {
        height: i64,
        size: usize,
        limit: usize,
    },
    #[error("invalid BlockProof size: {size} > limit {limit}")]
    BlockProofOversize { size: usize, limit: usize },
    #[error("invalid EventProof size: {size} > limit {limit}")]
    EventProofOversize { size: usize, limit: usize },
    /// Receipt proofs were segmented without block updates or a block
    /// proof to anchor them; the caller failed to attach a witness.
    #[error("receipt proofs without a block witness")]
    MissingBlockWitness,
    #[error("revert from verifier: {0}")]
    Revert(RevertCode),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("store: {0}")]
    Store(String),
    #[error(transparent)]
    Mbt(#[from] bmr_mbt::MbtError),
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Packing errors are terminal for the relay message that produced
    /// them.
    pub fn is_packing(&self) -> bool {
        matches!(
            self,
            RelayError::BlockUpdateProofOversize { .. }
                | RelayError::BlockProofOversize { .. }
                | RelayError::EventProofOversize { .. }
        )
    }
}
