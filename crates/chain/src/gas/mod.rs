//! Gas pricing strategies.
//!
//! Monad prices transactions EIP-1559 style, but some RPC endpoints in
//! front of it only answer `eth_gasPrice` reliably, so a legacy strategy is
//! kept as a fallback. Both cap what the keeper is willing to pay.

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;

use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::ChainResult;

const GWEI: f64 = 1e9;

/// Legacy fallback when `eth_gasPrice` fails.
const DEFAULT_LEGACY_GAS_PRICE: u128 = 50_000_000_000;

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParams {
    Legacy {
        gas_price: u128,
    },
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        base_fee: u128,
    },
}

impl GasParams {
    /// Worst-case price per gas unit.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Which pricing model to sign transactions with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GasPricing {
    Legacy,
    #[default]
    Eip1559,
}

/// Gas settings from deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSettings {
    #[serde(default)]
    pub pricing: GasPricing,

    /// Upper bound on the fee per gas, in gwei.
    #[serde(default = "default_max_fee_gwei")]
    pub max_fee_gwei: f64,

    /// Priority tip, in gwei.
    #[serde(default = "default_priority_fee_gwei")]
    pub priority_fee_gwei: f64,

    /// Gas limit attached to every keeper transaction.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_max_fee_gwei() -> f64 {
    150.0
}
fn default_priority_fee_gwei() -> f64 {
    2.0
}
fn default_gas_limit() -> u64 {
    1_500_000
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            pricing: GasPricing::default(),
            max_fee_gwei: default_max_fee_gwei(),
            priority_fee_gwei: default_priority_fee_gwei(),
            gas_limit: default_gas_limit(),
        }
    }
}

#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Query current pricing. Implementations cache the last value.
    async fn fetch_params(&self, rpc_url: &str) -> ChainResult<GasParams>;

    /// Write the pricing fields of `tx`.
    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    fn strategy_name(&self) -> &'static str;
}

/// Build the strategy described by `settings`.
pub fn create_gas_strategy(settings: &GasSettings) -> Box<dyn GasStrategy> {
    let max_fee = (settings.max_fee_gwei * GWEI) as u128;
    let priority_fee = (settings.priority_fee_gwei * GWEI) as u128;

    match settings.pricing {
        GasPricing::Eip1559 => {
            Box::new(Eip1559GasStrategy::new(priority_fee, 2.0).with_max_fee_cap(max_fee))
        }
        GasPricing::Legacy => Box::new(LegacyGasStrategy::new(
            DEFAULT_LEGACY_GAS_PRICE.min(max_fee),
            max_fee,
        )),
    }
}
