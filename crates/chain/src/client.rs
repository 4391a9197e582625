//! Capability interface the keeper core consumes.
//!
//! The core never touches providers, ABI encoding or signing directly; it
//! talks to a [`ChainClient`]. [`crate::RpcChainClient`] is the production
//! implementation; tests substitute an in-memory fake.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::ChainResult;

/// Liquidity Book bin id (`uint24` on chain).
pub type BinId = u32;

/// Static pair metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetadata {
    pub token_x: Address,
    pub token_y: Address,
    pub bin_step: u16,
}

/// ERC20 metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u8,
    pub symbol: String,
}

/// Final status of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted,
}

/// Parameters for `addLiquidityNATIVE`.
///
/// Mirrors the router's `LiquidityParameters` with keeper-native types; the
/// RPC client converts it into the ABI struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLiquidityParams {
    pub token_x: Address,
    pub token_y: Address,
    pub bin_step: u16,
    pub amount_x: U256,
    pub amount_y: U256,
    pub amount_x_min: U256,
    pub amount_y_min: U256,
    pub active_id_desired: BinId,
    pub id_slippage: u32,
    pub delta_ids: Vec<i64>,
    pub distribution_x: Vec<U256>,
    pub distribution_y: Vec<U256>,
    pub to: Address,
    pub refund_to: Address,
    pub deadline: u64,
}

/// Parameters for `removeLiquidityNATIVE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveLiquidityParams {
    /// The non-native token of the pair.
    pub token: Address,
    pub bin_step: u16,
    pub amount_token_min: U256,
    pub amount_native_min: U256,
    pub ids: Vec<BinId>,
    pub amounts: Vec<U256>,
    pub to: Address,
    pub deadline: u64,
}

/// A state-mutating call. Simulated first, then signed and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainCall {
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    SetApprovalForAll {
        pool: Address,
        operator: Address,
        approved: bool,
    },
    AddLiquidityNative {
        router: Address,
        params: AddLiquidityParams,
        /// Native amount attached as `msg.value`.
        value: U256,
    },
    RemoveLiquidityNative {
        router: Address,
        params: RemoveLiquidityParams,
    },
}

impl ChainCall {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::SetApprovalForAll { .. } => "setApprovalForAll",
            Self::AddLiquidityNative { .. } => "addLiquidityNATIVE",
            Self::RemoveLiquidityNative { .. } => "removeLiquidityNATIVE",
        }
    }
}

/// Everything the keeper needs from the chain.
///
/// Reads are side-effect free and may be awaited concurrently. Only
/// [`ChainClient::simulate_and_send`] mutates state.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    /// Address that owns the position and signs transactions.
    fn owner(&self) -> Address;

    async fn pool_metadata(&self, pool: Address) -> ChainResult<PoolMetadata>;

    async fn active_bin(&self, pool: Address) -> ChainResult<BinId>;

    async fn token_info(&self, token: Address) -> ChainResult<TokenInfo>;

    /// LB token balances of `owner` for each id, in the order given.
    async fn bin_balances(
        &self,
        pool: Address,
        owner: Address,
        ids: &[BinId],
    ) -> ChainResult<Vec<U256>>;

    async fn token_balance(&self, token: Address, owner: Address) -> ChainResult<U256>;

    async fn native_balance(&self, owner: Address) -> ChainResult<U256>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ChainResult<U256>;

    async fn is_approved_for_all(
        &self,
        pool: Address,
        owner: Address,
        operator: Address,
    ) -> ChainResult<bool>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> ChainResult<u128>;

    /// Simulate `call` and, if it would succeed, sign and broadcast it.
    async fn simulate_and_send(&self, call: ChainCall) -> ChainResult<B256>;

    /// Wait until `tx_hash` is mined.
    async fn await_confirmation(&self, tx_hash: B256) -> ChainResult<TxStatus>;
}
