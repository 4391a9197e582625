//! Transaction signing and submission.
//!
//! The keeper sends a handful of strictly sequential transactions per
//! rebalance, so the nonce is tracked locally and resynced from the chain
//! whenever a submission fails.

use crate::error::{ChainError, ChainResult};
use crate::gas::{create_gas_strategy, GasParams, GasSettings, GasStrategy};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Locally cached account nonce.
#[derive(Debug)]
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Reserve the next nonce.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Overwrite with the chain's pending count.
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Signs and broadcasts keeper transactions.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
    nonce_manager: NonceManager,
    gas_limit: u64,
    gas_strategy: Box<dyn GasStrategy>,
    cached_gas_params: RwLock<Option<GasParams>>,
}

impl TransactionSender {
    /// Parse the key, fetch the starting nonce and initial gas pricing.
    pub async fn new(
        private_key: &str,
        rpc_url: &str,
        chain_id: u64,
        gas: &GasSettings,
    ) -> ChainResult<Self> {
        let signer: PrivateKeySigner = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid private key: {e}")))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);
        let initial_nonce = provider.get_transaction_count(address).await?;

        let gas_strategy = create_gas_strategy(gas);
        let initial_gas_params = match gas_strategy.fetch_params(rpc_url).await {
            Ok(params) => Some(params),
            Err(e) => {
                warn!(error = %e, "Initial gas price fetch failed");
                None
            }
        };

        info!(
            address = %address,
            chain_id,
            initial_nonce,
            gas_strategy = gas_strategy.strategy_name(),
            gas_limit = gas.gas_limit,
            "Transaction sender initialized"
        );

        Ok(Self {
            rpc_url: rpc_url.to_string(),
            wallet,
            address,
            chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
            gas_limit: gas.gas_limit,
            gas_strategy,
            cached_gas_params: RwLock::new(initial_gas_params),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce_manager.current()
    }

    /// Fresh gas pricing, falling back to the last good value.
    async fn gas_params(&self) -> ChainResult<GasParams> {
        match self.gas_strategy.fetch_params(&self.rpc_url).await {
            Ok(params) => {
                *self.cached_gas_params.write() = Some(params.clone());
                Ok(params)
            }
            Err(e) => match self.cached_gas_params.read().clone() {
                Some(params) => {
                    warn!(error = %e, "Gas price fetch failed, using cached params");
                    Ok(params)
                }
                None => Err(e),
            },
        }
    }

    /// Sign and broadcast. Returns as soon as the node accepts the
    /// transaction; confirmation is awaited separately.
    pub async fn send_transaction(
        &self,
        to: Address,
        calldata: Bytes,
        value: U256,
    ) -> ChainResult<B256> {
        let start = Instant::now();
        let gas_params = self.gas_params().await?;
        let nonce = self.nonce_manager.next();

        let mut tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_input(calldata)
            .with_value(value)
            .with_nonce(nonce)
            .with_gas_limit(self.gas_limit)
            .with_chain_id(self.chain_id);
        self.gas_strategy.apply_gas(&mut tx, &gas_params);

        debug!(
            to = %to,
            nonce,
            value = %value,
            gas_price_gwei = gas_params.effective_gas_price() / 1_000_000_000,
            "Sending transaction"
        );

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(url);

        match provider.send_transaction(tx).await {
            Ok(pending) => {
                let tx_hash = *pending.tx_hash();
                info!(
                    tx_hash = %tx_hash,
                    nonce,
                    submit_ms = start.elapsed().as_millis() as u64,
                    "Transaction submitted"
                );
                Ok(tx_hash)
            }
            Err(e) => {
                warn!(error = %e, nonce, "Transaction submission failed, syncing nonce");
                self.sync_nonce().await;
                Err(e.into())
            }
        }
    }

    /// Reset the local nonce from the chain.
    pub async fn sync_nonce(&self) {
        let Ok(url) = self.rpc_url.parse() else {
            return;
        };
        let provider = ProviderBuilder::new().on_http(url);
        match provider.get_transaction_count(self.address).pending().await {
            Ok(chain_nonce) => {
                self.nonce_manager.reset(chain_nonce);
                debug!(nonce = chain_nonce, "Nonce synced from chain");
            }
            Err(e) => warn!(error = %e, "Failed to sync nonce from chain"),
        }
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("gas_strategy", &self.gas_strategy.strategy_name())
            .finish_non_exhaustive()
    }
}
