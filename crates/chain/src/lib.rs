//! Chain interaction layer for the Liquidity Book keeper.
//!
//! This crate provides:
//! - The [`ChainClient`] capability trait the decision engine is written against
//! - Contract bindings for the LB pair, LB router and ERC20 tokens
//! - [`RpcChainClient`], the alloy-backed implementation (simulate, sign, confirm)
//! - Transaction signing with a local nonce cache and pluggable gas strategies
//! - A WebSocket new-head listener

mod client;
mod contracts;
mod error;
mod event_listener;
pub mod gas;
mod provider;
mod signer;

pub use client::{
    AddLiquidityParams, BinId, ChainCall, ChainClient, PoolMetadata, RemoveLiquidityParams,
    TokenInfo, TxStatus,
};
pub use contracts::decode_revert;
pub use error::{ChainError, ChainResult};
pub use event_listener::{BlockListener, BlockStream, HeadSubscriber};
pub use gas::{GasPricing, GasSettings};
pub use provider::RpcChainClient;
pub use signer::TransactionSender;
