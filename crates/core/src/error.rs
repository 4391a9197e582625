//! Error types for the decision engine.

use alloy::primitives::U256;
use lbkeeper_chain::{BinId, ChainError};
use thiserror::Error;

/// Why a distribution could not be built. Nothing is submitted when this
/// is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistributionError {
    #[error("no bin would receive liquidity")]
    NoActiveBins,

    #[error("center bin {center} excluded from a non-empty distribution")]
    CenterExcluded { center: BinId },
}

/// Conditions that stop the keeper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalReason {
    #[error("native balance after reserve {available} below minimum {required}")]
    LowBalance { available: U256, required: U256 },

    #[error("{count} consecutive failed iterations")]
    TooManyFailures { count: u32 },

    #[error("all trigger sources stopped")]
    TriggersStopped,
}

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("distribution rejected: {0}")]
    Distribution(#[from] DistributionError),

    #[error("fatal: {0}")]
    Fatal(FatalReason),
}

impl RebalanceError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

pub type RebalanceResult<T> = Result<T, RebalanceError>;
