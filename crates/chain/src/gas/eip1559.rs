//! EIP-1559 pricing: `max_fee = base_fee * multiplier + tip`, capped.

use super::{GasParams, GasStrategy};
use alloy::eips::BlockNumberOrTag;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ChainError, ChainResult};

/// Used until the first block header is seen.
const FALLBACK_BASE_FEE: u128 = 50_000_000_000;

#[derive(Debug)]
pub struct Eip1559GasStrategy {
    default_priority_fee: u128,
    max_fee_multiplier: f64,
    max_fee_cap: u128,
    cached_base_fee: AtomicU64,
    cached_priority_fee: AtomicU64,
}

impl Eip1559GasStrategy {
    pub fn new(default_priority_fee: u128, max_fee_multiplier: f64) -> Self {
        Self {
            default_priority_fee,
            max_fee_multiplier,
            max_fee_cap: 150_000_000_000,
            cached_base_fee: AtomicU64::new(FALLBACK_BASE_FEE as u64),
            cached_priority_fee: AtomicU64::new(default_priority_fee as u64),
        }
    }

    pub fn with_max_fee_cap(mut self, cap: u128) -> Self {
        self.max_fee_cap = cap;
        self
    }

    pub fn cached_base_fee(&self) -> u128 {
        self.cached_base_fee.load(Ordering::Relaxed) as u128
    }

    pub fn cached_priority_fee(&self) -> u128 {
        self.cached_priority_fee.load(Ordering::Relaxed) as u128
    }

    fn update_cache(&self, base_fee: u128, priority_fee: u128) {
        self.cached_base_fee.store(base_fee as u64, Ordering::Relaxed);
        self.cached_priority_fee
            .store(priority_fee as u64, Ordering::Relaxed);
    }

    fn calculate_max_fee(&self, base_fee: u128, priority_fee: u128) -> u128 {
        let max_fee = ((base_fee as f64) * self.max_fee_multiplier) as u128 + priority_fee;
        max_fee.min(self.max_fee_cap)
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> ChainResult<GasParams> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("latest block missing".into()))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .unwrap_or_else(|| self.cached_base_fee());

        let priority_fee = provider
            .get_max_priority_fee_per_gas()
            .await
            .unwrap_or(self.default_priority_fee)
            .min(self.max_fee_cap);

        self.update_cache(base_fee, priority_fee);

        Ok(GasParams::Eip1559 {
            max_fee_per_gas: self.calculate_max_fee(base_fee, priority_fee),
            max_priority_fee_per_gas: priority_fee,
            base_fee,
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.max_fee_per_gas = Some(*max_fee_per_gas);
                tx.max_priority_fee_per_gas = Some(*max_priority_fee_per_gas);
            }
            GasParams::Legacy { gas_price } => {
                let max_fee = (*gas_price).min(self.max_fee_cap);
                tx.max_fee_per_gas = Some(max_fee);
                tx.max_priority_fee_per_gas = Some(self.default_priority_fee.min(max_fee));
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}
