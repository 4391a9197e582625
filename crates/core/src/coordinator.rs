//! Executes an approved rebalance: withdraw, re-read, recompute, deposit.
//!
//! Runs while the caller holds the decision lock. Every remote step goes
//! through the [`RetryPolicy`]; approvals, removal and the deposit are
//! strictly sequential and each waits for its receipt.

use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use lbkeeper_chain::{
    AddLiquidityParams, BinId, ChainCall, ChainClient, ChainError, RemoveLiquidityParams, TxStatus,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ExecutionConfig, StrategyConfig};
use crate::distribution::{DistributionCalculator, MAX_BIN_ID};
use crate::error::{RebalanceError, RebalanceResult};
use crate::il;
use crate::ledger::Ledger;
use crate::range_tracker::RangeTracker;
use crate::retry::RetryPolicy;
use crate::safety::SafetyGovernor;
use crate::types::{PoolState, RebalanceRequest, TokenSide};

const BPS: u64 = 10_000;

/// What a completed rebalance did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceOutcome {
    pub request: RebalanceRequest,
    pub center: BinId,
    pub bins: Vec<BinId>,
    pub removed_bins: usize,
    pub amount_x: U256,
    pub amount_y: U256,
    pub add_tx: B256,
}

#[derive(Debug)]
pub struct ExecutionCoordinator {
    client: Arc<dyn ChainClient>,
    pool: PoolState,
    router: Address,
    calculator: DistributionCalculator,
    governor: SafetyGovernor,
    retry: RetryPolicy,
    execution: ExecutionConfig,
    min_bin_liquidity: U256,
    range_width: u32,
}

impl ExecutionCoordinator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        pool: PoolState,
        router: Address,
        config: &StrategyConfig,
    ) -> Self {
        Self {
            client,
            pool,
            router,
            calculator: DistributionCalculator::new(
                config.range.half_width,
                config.range.orientation,
            ),
            governor: SafetyGovernor::new(&config.safety, &config.timing),
            retry: RetryPolicy::from_config(&config.execution),
            execution: config.execution.clone(),
            min_bin_liquidity: config.safety.min_bin_liquidity(),
            range_width: 2 * config.range.half_width + 1,
        }
    }

    pub fn pool(&self) -> &PoolState {
        &self.pool
    }

    #[instrument(skip(self, ledger, tracker), fields(reason = %request.reason, target = request.target))]
    pub async fn execute(
        &self,
        ledger: &mut Ledger,
        tracker: &mut RangeTracker,
        request: RebalanceRequest,
    ) -> RebalanceResult<RebalanceOutcome> {
        let start = Instant::now();
        let owner = self.client.owner();
        tracker.cancel_timers();

        let native = self
            .retry
            .run("native_balance", || self.client.native_balance(owner))
            .await?;
        self.governor
            .spendable(native)
            .map_err(RebalanceError::Fatal)?;

        let held = ledger.held_bins();
        let removed_bins = if held.is_empty() {
            0
        } else {
            let removed = self.withdraw(&held).await?;
            ledger.clear_position();
            // Nothing is deposited until the add below confirms.
            tracker.reset();
            removed
        };

        let center = self
            .retry
            .run("active_bin", || self.client.active_bin(self.pool.pool))
            .await?;
        if center != request.target {
            debug!(target = request.target, center, "Active bin moved since the request");
        }

        let (amount_x, amount_y) = self.usable_amounts().await?;
        let distribution = self.calculator.compute(center, amount_x, amount_y)?;
        let bins = distribution.bins();

        let (native_amount, token_amount) = match self.pool.native_side {
            TokenSide::X => (amount_x, amount_y),
            TokenSide::Y => (amount_y, amount_x),
        };
        if !token_amount.is_zero() {
            self.ensure_allowance(token_amount).await?;
        }

        let params = AddLiquidityParams {
            token_x: self.pool.token_x.address,
            token_y: self.pool.token_y.address,
            bin_step: self.pool.bin_step,
            amount_x,
            amount_y,
            amount_x_min: self.with_slippage(amount_x),
            amount_y_min: self.with_slippage(amount_y),
            active_id_desired: center,
            id_slippage: self.execution.id_slippage,
            delta_ids: distribution.delta_ids(),
            distribution_x: distribution.distribution_x(),
            distribution_y: distribution.distribution_y(),
            to: owner,
            refund_to: owner,
            deadline: self.deadline(),
        };
        let add_tx = self
            .submit(ChainCall::AddLiquidityNative {
                router: self.router,
                params,
                value: native_amount,
            })
            .await?;

        if let Some(entry) = ledger.entry().filter(|_| request.reason.is_standard()) {
            if entry.bin != center {
                let estimate = il::estimate(entry.bin, center, self.pool.bin_step, self.range_width);
                info!(
                    entry_bin = entry.bin,
                    center,
                    held_mins = (Utc::now() - entry.at).num_minutes(),
                    price_ratio = estimate.price_ratio,
                    il_pct = estimate.loss_pct,
                    "Range moved, estimated impermanent loss"
                );
            }
        }

        ledger.record_rebalance(center, &bins, request.reason, Utc::now(), Instant::now());
        tracker.recenter(center);

        info!(
            center,
            bins = ?bins,
            removed_bins,
            amount_x = %amount_x,
            amount_y = %amount_y,
            tx_hash = %add_tx,
            daily_count = ledger.counters().daily_rebalance_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rebalance complete"
        );

        Ok(RebalanceOutcome {
            request,
            center,
            bins,
            removed_bins,
            amount_x,
            amount_y,
            add_tx,
        })
    }

    /// Best-effort withdrawal of everything held. Never fails.
    pub async fn safe_shutdown(&self, ledger: &mut Ledger, tracker: &mut RangeTracker) {
        tracker.cancel_timers();
        let held = ledger.held_bins();
        if held.is_empty() {
            info!("Safe shutdown: no position to withdraw");
            return;
        }

        warn!(bins = ?held, "Safe shutdown: withdrawing liquidity");
        match self.withdraw(&held).await {
            Ok(removed) => {
                ledger.clear_position();
                tracker.reset();
                info!(removed, "Safe shutdown: liquidity withdrawn");
            }
            Err(e) => error!(error = %e, bins = ?held, "Safe shutdown: withdrawal failed"),
        }
    }

    /// Non-dust bins within `radius` of `around`.
    pub async fn scan_holdings(&self, around: BinId, radius: u32) -> RebalanceResult<Vec<BinId>> {
        let low = around.saturating_sub(radius);
        let high = around.saturating_add(radius).min(MAX_BIN_ID);
        let ids: Vec<BinId> = (low..=high).collect();
        let owner = self.client.owner();

        let balances = self
            .retry
            .run("bin_balances", || {
                self.client.bin_balances(self.pool.pool, owner, &ids)
            })
            .await?;

        Ok(ids
            .iter()
            .zip(balances)
            .filter(|(_, balance)| !self.is_dust(*balance))
            .map(|(id, _)| *id)
            .collect())
    }

    /// Remove all non-dust liquidity from `bins`. Returns how many bins
    /// were withdrawn.
    async fn withdraw(&self, bins: &[BinId]) -> RebalanceResult<usize> {
        let owner = self.client.owner();
        let balances = self
            .retry
            .run("bin_balances", || {
                self.client.bin_balances(self.pool.pool, owner, bins)
            })
            .await?;

        let (ids, amounts): (Vec<BinId>, Vec<U256>) = bins
            .iter()
            .copied()
            .zip(balances)
            .filter(|(_, balance)| !self.is_dust(*balance))
            .unzip();

        let dust = bins.len() - ids.len();
        if ids.is_empty() {
            info!(bins = ?bins, "No liquidity above dust in held bins");
            return Ok(0);
        }
        if dust > 0 {
            debug!(dust, "Skipping dust bins");
        }

        self.ensure_operator_approval().await?;

        let removed = ids.len();
        let params = RemoveLiquidityParams {
            token: self.pool.paired_token().address,
            bin_step: self.pool.bin_step,
            amount_token_min: U256::ZERO,
            amount_native_min: U256::ZERO,
            ids,
            amounts,
            to: owner,
            deadline: self.deadline(),
        };
        self.submit(ChainCall::RemoveLiquidityNative {
            router: self.router,
            params,
        })
        .await?;

        info!(removed, "Liquidity removed");
        Ok(removed)
    }

    /// Wallet balances available for deposit, as `(x, y)`.
    async fn usable_amounts(&self) -> RebalanceResult<(U256, U256)> {
        let owner = self.client.owner();
        let paired = self.pool.paired_token().address;

        let (native, token) = tokio::try_join!(
            self.retry
                .run("native_balance", || self.client.native_balance(owner)),
            self.retry
                .run("token_balance", || self.client.token_balance(paired, owner)),
        )?;

        let spendable = self
            .governor
            .spendable(native)
            .map_err(RebalanceError::Fatal)?;
        let usage = U256::from(self.execution.usage_bps().min(BPS));
        let native_usable = spendable * usage / U256::from(BPS);
        let token_usable = token * usage / U256::from(BPS);

        debug!(
            native = %native,
            native_usable = %native_usable,
            token = %token,
            token_usable = %token_usable,
            "Usable balances"
        );

        Ok(match self.pool.native_side {
            TokenSide::X => (native_usable, token_usable),
            TokenSide::Y => (token_usable, native_usable),
        })
    }

    async fn ensure_operator_approval(&self) -> RebalanceResult<()> {
        let owner = self.client.owner();
        let approved = self
            .retry
            .run("is_approved_for_all", || {
                self.client
                    .is_approved_for_all(self.pool.pool, owner, self.router)
            })
            .await?;
        if approved {
            return Ok(());
        }

        info!(operator = %self.router, "Approving router for LB tokens");
        self.submit(ChainCall::SetApprovalForAll {
            pool: self.pool.pool,
            operator: self.router,
            approved: true,
        })
        .await?;
        Ok(())
    }

    async fn ensure_allowance(&self, amount: U256) -> RebalanceResult<()> {
        let owner = self.client.owner();
        let token = self.pool.paired_token().address;
        let allowance = self
            .retry
            .run("allowance", || self.client.allowance(token, owner, self.router))
            .await?;
        if allowance >= amount {
            return Ok(());
        }

        info!(token = %token, allowance = %allowance, needed = %amount, "Approving router for token");
        self.submit(ChainCall::Approve {
            token,
            spender: self.router,
            amount: U256::MAX,
        })
        .await?;
        Ok(())
    }

    /// Simulate, send and wait for the receipt. A mined revert is an error.
    async fn submit(&self, call: ChainCall) -> RebalanceResult<B256> {
        let name = call.name();
        let tx_hash = self
            .retry
            .run(name, || self.client.simulate_and_send(call.clone()))
            .await?;

        let status = self
            .retry
            .run("await_confirmation", || self.client.await_confirmation(tx_hash))
            .await?;

        match status {
            TxStatus::Success => {
                debug!(call = name, tx_hash = %tx_hash, "Transaction confirmed");
                Ok(tx_hash)
            }
            TxStatus::Reverted => {
                error!(call = name, tx_hash = %tx_hash, "Transaction reverted");
                Err(ChainError::Reverted { tx_hash }.into())
            }
        }
    }

    /// Empty, or below the configured minimum.
    fn is_dust(&self, balance: U256) -> bool {
        balance.is_zero() || balance < self.min_bin_liquidity
    }

    fn with_slippage(&self, amount: U256) -> U256 {
        let keep = BPS.saturating_sub(self.execution.slippage_bps());
        amount * U256::from(keep) / U256::from(BPS)
    }

    fn deadline(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64 + self.execution.deadline_secs
    }
}
