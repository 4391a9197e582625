//! In-memory [`ChainClient`] for unit tests.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use lbkeeper_chain::{
    BinId, ChainCall, ChainClient, ChainError, ChainResult, PoolMetadata, TokenInfo, TxStatus,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::native_to_wei;
use crate::distribution::UNIT;

pub fn token(byte: u8, symbol: &str, decimals: u8) -> TokenInfo {
    TokenInfo {
        address: Address::repeat_byte(byte),
        decimals,
        symbol: symbol.to_string(),
    }
}

#[derive(Debug)]
struct FakeState {
    /// Successive `active_bin` answers; the last one repeats.
    active_bins: VecDeque<BinId>,
    bin_balances: HashMap<BinId, U256>,
    token_balance: U256,
    native_balance: U256,
    allowance: U256,
    approved_for_all: bool,
    gas_price: u128,
    failing_reads: u32,
    rejected_adds: u32,
    revert_next_add: bool,
    latency: Duration,
    calls: Vec<ChainCall>,
    reverted: HashSet<B256>,
    tx_count: u64,
}

/// Pool of WMON (X) and USDC (Y) with bin step 25.
#[derive(Debug)]
pub struct FakeChain {
    state: Mutex<FakeState>,
    pool: Address,
    router: Address,
    owner: Address,
    token_x: TokenInfo,
    token_y: TokenInfo,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeChain {
    pub fn new(active: BinId) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                active_bins: VecDeque::from([active]),
                bin_balances: HashMap::new(),
                token_balance: U256::from(2_000_000_000u64),
                native_balance: native_to_wei(1000.0),
                allowance: U256::ZERO,
                approved_for_all: false,
                gas_price: 50_000_000_000,
                failing_reads: 0,
                rejected_adds: 0,
                revert_next_add: false,
                latency: Duration::ZERO,
                calls: Vec::new(),
                reverted: HashSet::new(),
                tx_count: 0,
            }),
            pool: Address::repeat_byte(0xAA),
            router: Address::repeat_byte(0xBB),
            owner: Address::repeat_byte(0xCC),
            token_x: token(0x01, "WMON", 18),
            token_y: token(0x02, "USDC", 6),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn pool(&self) -> Address {
        self.pool
    }

    pub fn router(&self) -> Address {
        self.router
    }

    pub fn set_active_bins(&self, bins: &[BinId]) {
        self.state.lock().active_bins = bins.iter().copied().collect();
    }

    pub fn set_bin_balance(&self, id: BinId, amount: U256) {
        self.state.lock().bin_balances.insert(id, amount);
    }

    pub fn set_native_balance(&self, amount: U256) {
        self.state.lock().native_balance = amount;
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.state.lock().gas_price = wei;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// The next `n` active-bin reads fail with a transport error.
    pub fn fail_reads(&self, n: u32) {
        self.state.lock().failing_reads = n;
    }

    /// The next `n` deposit simulations revert.
    pub fn reject_adds(&self, n: u32) {
        self.state.lock().rejected_adds = n;
    }

    /// The next deposit is mined with status 0.
    pub fn revert_next_add(&self) {
        self.state.lock().revert_next_add = true;
    }

    pub fn token_balance_of_owner(&self) -> U256 {
        self.state.lock().token_balance
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        self.state.lock().calls.iter().map(ChainCall::name).collect()
    }

    /// Ids passed to each `removeLiquidityNATIVE`, in order.
    pub fn removed_ids(&self) -> Vec<Vec<BinId>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ChainCall::RemoveLiquidityNative { params, .. } => Some(params.ids.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn apply(state: &mut FakeState, call: &ChainCall) {
        match call {
            ChainCall::Approve { amount, .. } => state.allowance = *amount,
            ChainCall::SetApprovalForAll { approved, .. } => state.approved_for_all = *approved,
            ChainCall::AddLiquidityNative { params, .. } => {
                let shares = params
                    .distribution_x
                    .iter()
                    .zip(&params.distribution_y)
                    .zip(&params.delta_ids);
                for ((x, y), delta) in shares {
                    if !x.is_zero() || !y.is_zero() {
                        let id = (params.active_id_desired as i64 + delta) as BinId;
                        state.bin_balances.insert(id, UNIT);
                    }
                }
            }
            ChainCall::RemoveLiquidityNative { params, .. } => {
                for id in &params.ids {
                    state.bin_balances.remove(id);
                }
            }
        }
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn owner(&self) -> Address {
        self.owner
    }

    async fn pool_metadata(&self, _pool: Address) -> ChainResult<PoolMetadata> {
        Ok(PoolMetadata {
            token_x: self.token_x.address,
            token_y: self.token_y.address,
            bin_step: 25,
        })
    }

    async fn active_bin(&self, _pool: Address) -> ChainResult<BinId> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ChainError::Rpc("connection reset".to_string()));
        }
        if state.active_bins.len() > 1 {
            return state
                .active_bins
                .pop_front()
                .ok_or_else(|| ChainError::InvalidResponse("no active bin".to_string()));
        }
        state
            .active_bins
            .front()
            .copied()
            .ok_or_else(|| ChainError::InvalidResponse("no active bin".to_string()))
    }

    async fn token_info(&self, token: Address) -> ChainResult<TokenInfo> {
        [&self.token_x, &self.token_y]
            .into_iter()
            .find(|info| info.address == token)
            .cloned()
            .ok_or_else(|| ChainError::InvalidResponse(format!("unknown token {token}")))
    }

    async fn bin_balances(
        &self,
        _pool: Address,
        _owner: Address,
        ids: &[BinId],
    ) -> ChainResult<Vec<U256>> {
        let state = self.state.lock();
        Ok(ids
            .iter()
            .map(|id| state.bin_balances.get(id).copied().unwrap_or_default())
            .collect())
    }

    async fn token_balance(&self, _token: Address, _owner: Address) -> ChainResult<U256> {
        Ok(self.state.lock().token_balance)
    }

    async fn native_balance(&self, _owner: Address) -> ChainResult<U256> {
        Ok(self.state.lock().native_balance)
    }

    async fn allowance(
        &self,
        _token: Address,
        _owner: Address,
        _spender: Address,
    ) -> ChainResult<U256> {
        Ok(self.state.lock().allowance)
    }

    async fn is_approved_for_all(
        &self,
        _pool: Address,
        _owner: Address,
        _operator: Address,
    ) -> ChainResult<bool> {
        Ok(self.state.lock().approved_for_all)
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        Ok(self.state.lock().gas_price)
    }

    async fn simulate_and_send(&self, call: ChainCall) -> ChainResult<B256> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.delay().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock();
        let is_add = matches!(call, ChainCall::AddLiquidityNative { .. });
        if is_add && state.rejected_adds > 0 {
            state.rejected_adds -= 1;
            return Err(ChainError::SimulationReverted {
                reason: "LBRouter__IdSlippageCaught(uint256,uint256,uint256)".to_string(),
            });
        }

        state.tx_count += 1;
        let tx_hash = B256::left_padding_from(&state.tx_count.to_be_bytes());
        if is_add && std::mem::take(&mut state.revert_next_add) {
            state.reverted.insert(tx_hash);
        } else {
            Self::apply(&mut state, &call);
        }
        state.calls.push(call);
        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: B256) -> ChainResult<TxStatus> {
        if self.state.lock().reverted.contains(&tx_hash) {
            Ok(TxStatus::Reverted)
        } else {
            Ok(TxStatus::Success)
        }
    }
}
