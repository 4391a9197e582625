//! Legacy (`gasPrice`) pricing.

use super::{GasParams, GasStrategy};
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

use crate::error::{ChainError, ChainResult};

/// Single `gas_price` field, capped at `max_gas_price`.
#[derive(Debug)]
pub struct LegacyGasStrategy {
    default_gas_price: u128,
    max_gas_price: u128,
    cached_gas_price: AtomicU64,
}

impl LegacyGasStrategy {
    pub fn new(default_gas_price: u128, max_gas_price: u128) -> Self {
        Self {
            default_gas_price,
            max_gas_price,
            cached_gas_price: AtomicU64::new(default_gas_price as u64),
        }
    }

    pub fn cached_gas_price(&self) -> u128 {
        self.cached_gas_price.load(Ordering::Relaxed) as u128
    }

    fn update_cache(&self, gas_price: u128) -> u128 {
        let capped = gas_price.min(self.max_gas_price);
        self.cached_gas_price.store(capped as u64, Ordering::Relaxed);
        capped
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> ChainResult<GasParams> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let gas_price = match provider.get_gas_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!(error = %e, fallback = self.default_gas_price, "eth_gasPrice failed");
                self.default_gas_price
            }
        };

        Ok(GasParams::Legacy {
            gas_price: self.update_cache(gas_price),
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        tx.set_gas_price(params.effective_gas_price().min(self.max_gas_price));
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn test_cache_is_capped() {
        let strategy = LegacyGasStrategy::new(50_000_000_000, 150_000_000_000);
        assert_eq!(strategy.cached_gas_price(), 50_000_000_000);

        assert_eq!(strategy.update_cache(60_000_000_000), 60_000_000_000);
        assert_eq!(strategy.update_cache(400_000_000_000), 150_000_000_000);
        assert_eq!(strategy.cached_gas_price(), 150_000_000_000);
    }

    #[test]
    fn test_apply_gas_caps_eip1559_params() {
        let strategy = LegacyGasStrategy::new(50_000_000_000, 100_000_000_000);
        let mut tx = TransactionRequest::default().with_to(Address::ZERO);

        let params = GasParams::Eip1559 {
            max_fee_per_gas: 120_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            base_fee: 50_000_000_000,
        };
        strategy.apply_gas(&mut tx, &params);
        assert_eq!(tx.gas_price(), Some(100_000_000_000));
    }
}
