//! Shared domain types.

use alloy::primitives::Address;
use lbkeeper_chain::{BinId, TokenInfo};
use std::fmt;

/// Which pair token is the wrapped native asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSide {
    X,
    Y,
}

/// Pool metadata plus the most recently read active bin.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub pool: Address,
    pub token_x: TokenInfo,
    pub token_y: TokenInfo,
    pub bin_step: u16,
    pub active_bin: BinId,
    pub native_side: TokenSide,
}

impl PoolState {
    /// The wrapped native token.
    pub fn native_token(&self) -> &TokenInfo {
        match self.native_side {
            TokenSide::X => &self.token_x,
            TokenSide::Y => &self.token_y,
        }
    }

    /// The ERC20 deposited alongside native.
    pub fn paired_token(&self) -> &TokenInfo {
        match self.native_side {
            TokenSide::X => &self.token_y,
            TokenSide::Y => &self.token_x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebalanceReason {
    Initial,
    OutOfRange,
    Maintenance,
}

impl RebalanceReason {
    /// Standard rebalances move the entry point; maintenance keeps it.
    pub fn is_standard(&self) -> bool {
        !matches!(self, Self::Maintenance)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::OutOfRange => "out_of_range",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for RebalanceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceRequest {
    pub reason: RebalanceReason,
    pub target: BinId,
}

impl RebalanceRequest {
    pub fn new(reason: RebalanceReason, target: BinId) -> Self {
        Self { reason, target }
    }
}
