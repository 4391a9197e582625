//! Production [`ChainClient`] over alloy HTTP providers.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::client::{BinId, ChainCall, ChainClient, PoolMetadata, TokenInfo, TxStatus};
use crate::contracts::{ILBPair, ILBRouter, IERC20};
use crate::error::{ChainError, ChainResult};
use crate::signer::TransactionSender;

/// Concurrent `balanceOf` reads per bin batch.
const BIN_READ_CONCURRENCY: usize = 8;

const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Reads go through a plain HTTP provider; writes are simulated with
/// `eth_call` from the owner address and then handed to the
/// [`TransactionSender`].
pub struct RpcChainClient {
    rpc_url: String,
    sender: Arc<TransactionSender>,
    confirmation_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl RpcChainClient {
    /// Connect and check that the endpoint serves `expected_chain_id`.
    pub async fn connect(
        rpc_url: &str,
        expected_chain_id: u64,
        sender: Arc<TransactionSender>,
    ) -> ChainResult<Self> {
        let client = Self {
            rpc_url: rpc_url.to_string(),
            sender,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            receipt_poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        };

        let provider = client.provider()?;
        let (chain_id, block) = tokio::try_join!(provider.get_chain_id(), provider.get_block_number())?;
        if chain_id != expected_chain_id {
            return Err(ChainError::Config(format!(
                "RPC serves chain {chain_id}, expected {expected_chain_id}"
            )));
        }

        info!(chain_id, block, owner = %client.owner(), "Chain client connected");
        Ok(client)
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    fn provider(&self) -> ChainResult<impl Provider> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid RPC URL: {e}")))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    /// Run the call through `eth_call` and return what to broadcast.
    async fn simulate(&self, call: &ChainCall) -> ChainResult<(Address, Bytes, U256)> {
        let provider = self.provider()?;
        let owner = self.owner();

        match call {
            ChainCall::Approve {
                token,
                spender,
                amount,
            } => {
                let erc20 = IERC20::new(*token, &provider);
                let builder = erc20.approve(*spender, *amount).from(owner);
                builder.call().await?;
                Ok((*token, builder.calldata().clone(), U256::ZERO))
            }
            ChainCall::SetApprovalForAll {
                pool,
                operator,
                approved,
            } => {
                let pair = ILBPair::new(*pool, &provider);
                let builder = pair.setApprovalForAll(*operator, *approved).from(owner);
                builder.call().await?;
                Ok((*pool, builder.calldata().clone(), U256::ZERO))
            }
            ChainCall::AddLiquidityNative {
                router,
                params,
                value,
            } => {
                let lb_router = ILBRouter::new(*router, &provider);
                let builder = lb_router
                    .addLiquidityNATIVE(params.to_abi()?)
                    .value(*value)
                    .from(owner);
                let added = builder.call().await?;
                debug!(
                    amount_x_added = %added.amountXAdded,
                    amount_y_added = %added.amountYAdded,
                    bins = added.depositIds.len(),
                    "addLiquidityNATIVE simulated"
                );
                Ok((*router, builder.calldata().clone(), *value))
            }
            ChainCall::RemoveLiquidityNative { router, params } => {
                let lb_router = ILBRouter::new(*router, &provider);
                let call = params.to_call();
                let builder = lb_router
                    .removeLiquidityNATIVE(
                        call.token,
                        call.binStep,
                        call.amountTokenMin,
                        call.amountNATIVEMin,
                        call.ids,
                        call.amounts,
                        call.to,
                        call.deadline,
                    )
                    .from(owner);
                let removed = builder.call().await?;
                debug!(
                    amount_token = %removed.amountToken,
                    amount_native = %removed.amountNATIVE,
                    "removeLiquidityNATIVE simulated"
                );
                Ok((*router, builder.calldata().clone(), U256::ZERO))
            }
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn owner(&self) -> Address {
        self.sender.address()
    }

    async fn pool_metadata(&self, pool: Address) -> ChainResult<PoolMetadata> {
        let provider = self.provider()?;
        let pair = ILBPair::new(pool, &provider);

        let token_x_call = pair.getTokenX();
        let token_y_call = pair.getTokenY();
        let bin_step_call = pair.getBinStep();
        let (token_x, token_y, bin_step) = tokio::try_join!(
            token_x_call.call(),
            token_y_call.call(),
            bin_step_call.call()
        )?;

        Ok(PoolMetadata {
            token_x: token_x._0,
            token_y: token_y._0,
            bin_step: bin_step._0,
        })
    }

    async fn active_bin(&self, pool: Address) -> ChainResult<BinId> {
        let provider = self.provider()?;
        let active = ILBPair::new(pool, &provider).getActiveId().call().await?;
        Ok(active._0.to::<u32>())
    }

    async fn token_info(&self, token: Address) -> ChainResult<TokenInfo> {
        let provider = self.provider()?;
        let erc20 = IERC20::new(token, &provider);

        let decimals_call = erc20.decimals();
        let symbol_call = erc20.symbol();
        let (decimals, symbol) = tokio::try_join!(decimals_call.call(), symbol_call.call())?;

        Ok(TokenInfo {
            address: token,
            decimals: decimals._0,
            symbol: symbol._0,
        })
    }

    async fn bin_balances(
        &self,
        pool: Address,
        owner: Address,
        ids: &[BinId],
    ) -> ChainResult<Vec<U256>> {
        let provider = self.provider()?;
        let pair = ILBPair::new(pool, &provider);
        let pair = &pair;

        stream::iter(ids.iter().copied())
            .map(|id| async move {
                let balance = pair.balanceOf(owner, U256::from(id)).call().await?;
                Ok::<_, ChainError>(balance._0)
            })
            .buffered(BIN_READ_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> ChainResult<U256> {
        let provider = self.provider()?;
        let balance = IERC20::new(token, &provider).balanceOf(owner).call().await?;
        Ok(balance._0)
    }

    async fn native_balance(&self, owner: Address) -> ChainResult<U256> {
        Ok(self.provider()?.get_balance(owner).await?)
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> ChainResult<U256> {
        let provider = self.provider()?;
        let allowance = IERC20::new(token, &provider)
            .allowance(owner, spender)
            .call()
            .await?;
        Ok(allowance._0)
    }

    async fn is_approved_for_all(
        &self,
        pool: Address,
        owner: Address,
        operator: Address,
    ) -> ChainResult<bool> {
        let provider = self.provider()?;
        let approved = ILBPair::new(pool, &provider)
            .isApprovedForAll(owner, operator)
            .call()
            .await?;
        Ok(approved._0)
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        Ok(self.provider()?.get_gas_price().await?)
    }

    #[instrument(skip(self, call), fields(call = call.name()))]
    async fn simulate_and_send(&self, call: ChainCall) -> ChainResult<B256> {
        let (to, calldata, value) = match self.simulate(&call).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Simulation failed, not broadcasting");
                return Err(e);
            }
        };
        self.sender.send_transaction(to, calldata, value).await
    }

    #[instrument(skip(self))]
    async fn await_confirmation(&self, tx_hash: B256) -> ChainResult<TxStatus> {
        let provider = self.provider()?;
        let start = Instant::now();

        let wait = async {
            loop {
                match provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok::<_, ChainError>(receipt),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Receipt poll failed"),
                }
                tokio::time::sleep(self.receipt_poll_interval).await;
            }
        };

        let receipt = tokio::time::timeout(self.confirmation_timeout, wait)
            .await
            .map_err(|_| {
                ChainError::Timeout(format!(
                    "no receipt for {tx_hash} after {}s",
                    self.confirmation_timeout.as_secs()
                ))
            })??;

        let status = if receipt.status() {
            TxStatus::Success
        } else {
            TxStatus::Reverted
        };

        info!(
            tx_hash = %tx_hash,
            block = receipt.block_number.unwrap_or(0),
            gas_used = receipt.gas_used,
            confirm_ms = start.elapsed().as_millis() as u64,
            ?status,
            "Transaction mined"
        );

        if status == TxStatus::Reverted {
            self.sender.sync_nonce().await;
        }
        Ok(status)
    }
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("owner", &self.owner())
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish_non_exhaustive()
    }
}
