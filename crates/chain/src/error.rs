//! Chain error types.
//!
//! Every remote call made by the keeper resolves to a [`ChainError`]. The
//! split that matters to callers is [`ChainError::is_retryable`]: transport
//! and timeout failures may be retried, reverts may not.

use alloy::primitives::B256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Transport or RPC failure (connection reset, rate limit, 5xx, ...).
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A wait exceeded its deadline (receipt polling, stuck pending tx).
    #[error("Timed out: {0}")]
    Timeout(String),

    /// `eth_call` simulation reverted before anything was broadcast.
    #[error("Simulation reverted: {reason}")]
    SimulationReverted { reason: String },

    /// The transaction was mined with status 0.
    #[error("Transaction reverted: {tx_hash}")]
    Reverted { tx_hash: B256 },

    /// The node answered with something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Local misconfiguration (bad URL, bad key).
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Whether a fresh attempt with the same parameters can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Timeout(_))
    }

    /// Whether the failure is an on-chain (or simulated) revert.
    pub fn is_revert(&self) -> bool {
        matches!(self, Self::SimulationReverted { .. } | Self::Reverted { .. })
    }
}

impl From<alloy::transports::TransportError> for ChainError {
    fn from(err: alloy::transports::TransportError) -> Self {
        match err.as_error_resp().and_then(|payload| payload.as_revert_data()) {
            Some(data) => Self::SimulationReverted {
                reason: crate::contracts::decode_revert(&data),
            },
            None => Self::Rpc(err.to_string()),
        }
    }
}

impl From<alloy::contract::Error> for ChainError {
    fn from(err: alloy::contract::Error) -> Self {
        if let Some(data) = err.as_revert_data() {
            return Self::SimulationReverted {
                reason: crate::contracts::decode_revert(&data),
            };
        }
        match err {
            alloy::contract::Error::TransportError(e) => Self::Rpc(e.to_string()),
            other => Self::InvalidResponse(other.to_string()),
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
