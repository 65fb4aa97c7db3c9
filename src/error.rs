//! Error types.
//!
//! [`SealError`] aborts a whole assembly run. Everything else describes why a single
//! transaction was left out; its `Display` output is the exclusion reason handed back to
//! the caller.

use alloy_primitives::{B256, U256};

/// Sender recovery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    #[error("invalid sender: signature recovery failed")]
    InvalidSignature,
    #[error("invalid chain id for signer: have {have} want {want}")]
    InvalidChainId { have: u64, want: u64 },
}

/// Gas pool accounting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GasPoolError {
    #[error("gas limit reached: requested {requested}, available {available}")]
    GasLimitReached { requested: u64, available: u64 },
}

/// Failures attaching or reading a structured execution trace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    #[error("execution did not produce a call frame")]
    MissingFrame,
    #[error("could not encode trace: {0}")]
    Encode(String),
}

/// Why a candidate transaction was excluded from the block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxFailure {
    #[error(transparent)]
    SenderRecovery(#[from] RecoveryError),
    #[error("ignoring replay protected transaction with hash {hash}: eip155 not active")]
    ReplayProtectedBeforeFork { hash: B256 },
    #[error("ignoring unprotected transaction with hash {hash}: replay protection is required")]
    ReplayProtectionRequired { hash: B256 },
    #[error(transparent)]
    GasPool(#[from] GasPoolError),
    #[error("storage check failed for {address} slot {slot}: expected {expected}, found {found}")]
    StorageCheck { address: alloy_primitives::Address, slot: B256, expected: B256, found: U256 },
    #[error("{reason}")]
    Execution { reason: String },
}

impl TxFailure {
    /// Wraps a VM level error.
    pub fn execution(reason: impl std::fmt::Display) -> Self {
        TxFailure::Execution { reason: reason.to_string() }
    }
}

/// Consensus engine failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("{0}")]
    Other(String),
}

/// Errors that abort an assembly run. No partial bundle is produced.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("could not find parent block {0}")]
    ParentNotFound(B256),
    #[error("could not find block {0}")]
    BlockNotFound(B256),
    #[error("could not find root state {root} of block {block}")]
    StateNotFound { block: B256, root: B256 },
    #[error("could not prepare header: {0}")]
    Prepare(#[source] EngineError),
    #[error("could not assemble block: {0}")]
    Assemble(#[source] EngineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_reasons_are_readable() {
        let shortfall = GasPoolError::GasLimitReached { requested: 30_000, available: 21_000 };
        let failure = TxFailure::from(shortfall);
        assert_eq!(failure.to_string(), "gas limit reached: requested 30000, available 21000");

        let failure = TxFailure::execution("nonce 5 too high, expected 0");
        assert_eq!(failure.to_string(), "nonce 5 too high, expected 0");

        let failure = TxFailure::from(RecoveryError::InvalidChainId { have: 5, want: 1 });
        assert_eq!(failure.to_string(), "invalid chain id for signer: have 5 want 1");
    }
}
