//! The keeper loop.
//!
//! Two trigger sources (new block heads and a fallback interval) feed one
//! guarded entry point, [`Agent::tick`]. Decision state lives behind a
//! single async mutex; a trigger that finds it held is dropped.

use alloy::primitives::Address;
use chrono::Local;
use futures::StreamExt;
use lbkeeper_chain::{ChainClient, HeadSubscriber};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{EntryMode, StrategyConfig};
use crate::coordinator::{ExecutionCoordinator, RebalanceOutcome};
use crate::error::{FatalReason, RebalanceError, RebalanceResult};
use crate::ledger::Ledger;
use crate::observer::PoolObserver;
use crate::range_tracker::{Observation, RangeTracker, Suppression};
use crate::retry::{exponential_delay, RetryPolicy};
use crate::safety::{DenyReason, GateContext, SafetyGovernor, Verdict};
use crate::types::RebalanceReason;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Everything a decision reads or writes.
#[derive(Debug)]
struct DecisionState {
    ledger: Ledger,
    tracker: RangeTracker,
    backoff_until: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    NewHead(u64),
    Interval,
}

/// Result of one [`Agent::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another decision held the lock.
    Dropped,
    BackingOff,
    Idle,
    Suppressed(Suppression),
    Denied(DenyReason),
    Rebalanced(RebalanceOutcome),
    Failed { consecutive: u32 },
    Fatal(FatalReason),
}

#[derive(Debug)]
pub struct Agent {
    client: Arc<dyn ChainClient>,
    observer: PoolObserver,
    coordinator: ExecutionCoordinator,
    governor: SafetyGovernor,
    retry: RetryPolicy,
    config: StrategyConfig,
    state: Mutex<DecisionState>,
}

impl Agent {
    /// Load the pool and build the decision state.
    pub async fn init(
        client: Arc<dyn ChainClient>,
        config: StrategyConfig,
        pool: Address,
        router: Address,
    ) -> RebalanceResult<Self> {
        let observer = PoolObserver::new(client.clone(), pool, config.range.native_symbols.clone());
        let retry = RetryPolicy::from_config(&config.execution);
        let pool_state = retry.run("load_pool", || observer.load()).await?;

        let coordinator = ExecutionCoordinator::new(client.clone(), pool_state, router, &config);
        let governor = SafetyGovernor::new(&config.safety, &config.timing);
        let state = DecisionState {
            ledger: Ledger::new(Local::now().date_naive()),
            tracker: RangeTracker::new(
                config.range.half_width,
                config.range.overlap_threshold,
                config.timing.maintenance_interval(),
            ),
            backoff_until: None,
        };

        Ok(Self {
            client,
            observer,
            coordinator,
            governor,
            retry,
            config,
            state: Mutex::new(state),
        })
    }

    /// Cold start. In scan mode, existing holdings around the active bin
    /// are adopted so the first rebalance withdraws them.
    pub async fn bootstrap(&self) -> RebalanceResult<()> {
        match self.config.range.entry_mode {
            EntryMode::Fresh => {
                info!("Fresh entry, first sample deposits wallet funds");
                Ok(())
            }
            EntryMode::Scan => {
                let radius = self.config.range.scan_radius;
                let active = self
                    .retry
                    .run("active_bin", || self.observer.active_bin())
                    .await?;
                let found = self.coordinator.scan_holdings(active, radius).await?;

                if found.is_empty() {
                    info!(active, radius, "Scan found no existing holdings");
                } else {
                    info!(active, radius, bins = ?found, "Adopting existing holdings");
                }
                self.state.lock().await.ledger.set_orphan_bins(found);
                Ok(())
            }
        }
    }

    /// One decision. Never blocks on the lock.
    pub async fn tick(&self, trigger: Trigger) -> TickOutcome {
        let Ok(mut state) = self.state.try_lock() else {
            debug!(?trigger, "Decision in progress, dropping trigger");
            return TickOutcome::Dropped;
        };

        let now = Instant::now();
        if let Some(until) = state.backoff_until {
            if now < until {
                debug!(
                    remaining_secs = until.duration_since(now).as_secs(),
                    "Backing off after failure"
                );
                return TickOutcome::BackingOff;
            }
            state.backoff_until = None;
        }

        match self.decide(&mut state, now).await {
            Ok(outcome) => outcome,
            Err(e) => self.on_failure(&mut state, e, now),
        }
    }

    #[instrument(skip(self, state, now))]
    async fn decide(&self, state: &mut DecisionState, now: Instant) -> RebalanceResult<TickOutcome> {
        let active = self
            .retry
            .run("active_bin", || self.observer.active_bin())
            .await?;

        let request = match state.tracker.observe(active, now) {
            Observation::Request(request) => request,
            Observation::Suppressed(suppression) => {
                return Ok(TickOutcome::Suppressed(suppression))
            }
            Observation::Idle => match state.tracker.poll_maintenance(now) {
                Some(request) => request,
                None => return Ok(TickOutcome::Idle),
            },
        };

        let owner = self.client.owner();
        let (gas_price, native_balance) = tokio::try_join!(
            self.retry.run("gas_price", || self.client.gas_price()),
            self.retry
                .run("native_balance", || self.client.native_balance(owner)),
        )?;

        let ctx = GateContext {
            request,
            now,
            daily_rebalance_count: 0,
            last_rebalance: None,
            out_of_range_since: state.tracker.out_of_range_since(),
            last_jump: state.tracker.last_jump(),
            gas_price,
            native_balance,
        };

        let today = Local::now().date_naive();
        if let Verdict::Deny(reason) =
            self.governor
                .evaluate(state.ledger.counters_mut(), today, ctx)
        {
            if let Some(fatal) = reason.clone().into_fatal() {
                return Err(RebalanceError::Fatal(fatal));
            }
            if request.reason == RebalanceReason::Maintenance {
                state.tracker.defer_maintenance(now);
            }
            info!(
                reason = %request.reason,
                target = request.target,
                deny = %reason,
                "Rebalance denied"
            );
            return Ok(TickOutcome::Denied(reason));
        }

        let DecisionState {
            ledger, tracker, ..
        } = state;
        let outcome = self.coordinator.execute(ledger, tracker, request).await?;
        Ok(TickOutcome::Rebalanced(outcome))
    }

    fn on_failure(&self, state: &mut DecisionState, err: RebalanceError, now: Instant) -> TickOutcome {
        if let RebalanceError::Fatal(reason) = err {
            error!(reason = %reason, "Fatal condition");
            return TickOutcome::Fatal(reason);
        }

        let count = state.ledger.counters_mut().record_failure();
        state.tracker.defer_maintenance(now);

        let max = self.config.safety.max_consecutive_failures;
        if count >= max {
            error!(error = %err, count, max, "Consecutive failure limit reached");
            return TickOutcome::Fatal(FatalReason::TooManyFailures { count });
        }

        let delay = exponential_delay(
            self.config.timing.failure_backoff_base(),
            self.config.timing.failure_backoff_max(),
            count,
        );
        state.backoff_until = Some(now + delay);
        warn!(
            error = %err,
            consecutive = count,
            backoff_secs = delay.as_secs(),
            "Iteration failed"
        );
        TickOutcome::Failed { consecutive: count }
    }

    /// Run until a fatal condition, then withdraw and return it.
    pub async fn run(self: Arc<Self>, heads: Arc<dyn HeadSubscriber>) -> RebalanceResult<()> {
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<FatalReason>(4);

        let blocks = tokio::spawn(self.clone().block_loop(heads, fatal_tx.clone()));
        let fallback = tokio::spawn(self.clone().interval_loop(fatal_tx));

        info!(
            poll_secs = self.config.timing.poll_interval_secs,
            "Keeper running"
        );

        let reason = fatal_rx.recv().await.unwrap_or(FatalReason::TriggersStopped);
        blocks.abort();
        fallback.abort();

        error!(reason = %reason, "Stopping keeper");
        self.shutdown().await;
        Err(RebalanceError::Fatal(reason))
    }

    /// Wait for any running decision, then withdraw everything held.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let DecisionState {
            ledger, tracker, ..
        } = &mut *state;
        self.coordinator.safe_shutdown(ledger, tracker).await;
    }

    pub async fn ledger_snapshot(&self) -> Ledger {
        self.state.lock().await.ledger.clone()
    }

    async fn block_loop(self: Arc<Self>, heads: Arc<dyn HeadSubscriber>, fatal_tx: mpsc::Sender<FatalReason>) {
        let mut failures = 0;
        loop {
            match heads.subscribe_new_heads().await {
                Ok(mut stream) => {
                    failures = 0;
                    while let Some(block) = stream.next().await {
                        self.dispatch(Trigger::NewHead(block), &fatal_tx);
                    }
                    warn!("Block stream ended");
                }
                Err(e) => error!(error = %e, "Block subscription failed"),
            }

            failures += 1;
            let delay = exponential_delay(RECONNECT_BASE, RECONNECT_MAX, failures);
            warn!(delay_secs = delay.as_secs(), "Reconnecting block stream");
            tokio::time::sleep(delay).await;
        }
    }

    async fn interval_loop(self: Arc<Self>, fatal_tx: mpsc::Sender<FatalReason>) {
        let mut ticker = interval(self.config.timing.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.dispatch(Trigger::Interval, &fatal_tx);
        }
    }

    /// Run a tick on its own task so the trigger source keeps draining.
    fn dispatch(self: &Arc<Self>, trigger: Trigger, fatal_tx: &mpsc::Sender<FatalReason>) {
        let agent = self.clone();
        let fatal_tx = fatal_tx.clone();
        tokio::spawn(async move {
            if let TickOutcome::Fatal(reason) = agent.tick(trigger).await {
                let _ = fatal_tx.try_send(reason);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::native_to_wei;
    use crate::testing::FakeChain;
    use alloy::primitives::U256;
    use async_trait::async_trait;
    use lbkeeper_chain::{BlockStream, ChainCall, ChainResult};

    fn config() -> StrategyConfig {
        let mut config = StrategyConfig::default();
        config.execution.retry_base_delay_ms = 1;
        config.execution.retry_max_delay_ms = 2;
        config.timing.grace_period_secs = 0;
        config.timing.min_rebalance_interval_secs = 0;
        config.timing.failure_backoff_base_secs = 0;
        config
    }

    async fn agent(fake: &Arc<FakeChain>, config: StrategyConfig) -> Arc<Agent> {
        Arc::new(
            Agent::init(fake.clone(), config, fake.pool(), fake.router())
                .await
                .unwrap(),
        )
    }

    fn adds(fake: &FakeChain) -> usize {
        fake.calls()
            .iter()
            .filter(|call| matches!(call, ChainCall::AddLiquidityNative { .. }))
            .count()
    }

    #[derive(Debug)]
    struct SilentHeads;

    #[async_trait]
    impl HeadSubscriber for SilentHeads {
        async fn subscribe_new_heads(&self) -> ChainResult<BlockStream> {
            Ok(Box::pin(futures::stream::pending::<u64>()))
        }
    }

    #[tokio::test]
    async fn test_first_tick_deposits_then_idles() {
        let fake = FakeChain::new(1_000);
        let agent = agent(&fake, config()).await;

        let TickOutcome::Rebalanced(outcome) = agent.tick(Trigger::Interval).await else {
            panic!("expected initial rebalance");
        };
        assert_eq!(outcome.request.reason, RebalanceReason::Initial);
        assert_eq!(outcome.center, 1_000);

        assert_eq!(agent.tick(Trigger::NewHead(2)).await, TickOutcome::Idle);
        assert_eq!(agent.ledger_snapshot().await.total_rebalances(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_one_execution() {
        let fake = FakeChain::new(1_000);
        let agent = agent(&fake, config()).await;
        fake.set_latency(Duration::from_millis(5));

        let (a, b) = tokio::join!(agent.tick(Trigger::NewHead(1)), agent.tick(Trigger::Interval));

        assert!(matches!(a, TickOutcome::Rebalanced(_)));
        assert_eq!(b, TickOutcome::Dropped);
        assert_eq!(adds(&fake), 1);
        assert_eq!(fake.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_rebalance() {
        let fake = FakeChain::new(1_000);
        let agent = agent(&fake, config()).await;
        agent.tick(Trigger::Interval).await;

        fake.set_active_bins(&[1_005]);
        let TickOutcome::Rebalanced(outcome) = agent.tick(Trigger::NewHead(3)).await else {
            panic!("expected out-of-range rebalance");
        };
        assert_eq!(outcome.request.reason, RebalanceReason::OutOfRange);
        assert_eq!(outcome.center, 1_005);
        assert_eq!(outcome.removed_bins, 3);
        assert_eq!(fake.removed_ids(), vec![vec![999, 1_000, 1_001]]);

        let ledger = agent.ledger_snapshot().await;
        assert_eq!(ledger.entry().map(|e| e.bin), Some(1_005));
        assert_eq!(ledger.counters().daily_rebalance_count(), 2);
    }

    #[tokio::test]
    async fn test_grace_period_denies_out_of_range() {
        let fake = FakeChain::new(1_000);
        let mut config = config();
        config.timing.grace_period_secs = 60;
        let agent = agent(&fake, config).await;
        agent.tick(Trigger::Interval).await;

        fake.set_active_bins(&[1_005]);
        assert!(matches!(
            agent.tick(Trigger::NewHead(3)).await,
            TickOutcome::Denied(DenyReason::GracePeriod { .. })
        ));
        assert_eq!(adds(&fake), 1);
    }

    #[tokio::test]
    async fn test_churn_is_suppressed() {
        let fake = FakeChain::new(1_000);
        let mut config = config();
        config.timing.grace_period_secs = 60;
        let agent = agent(&fake, config).await;
        agent.tick(Trigger::Interval).await;

        fake.set_active_bins(&[1_003, 1_000, 1_003]);
        assert!(matches!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Denied(DenyReason::GracePeriod { .. })
        ));
        assert_eq!(agent.tick(Trigger::Interval).await, TickOutcome::Idle);
        assert_eq!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Suppressed(Suppression::Churn)
        );
        assert_eq!(adds(&fake), 1);
    }

    #[tokio::test]
    async fn test_maintenance_request() {
        let fake = FakeChain::new(1_000);
        let mut config = config();
        config.timing.maintenance_interval_secs = 0;
        let agent = agent(&fake, config).await;
        agent.tick(Trigger::Interval).await;

        let TickOutcome::Rebalanced(outcome) = agent.tick(Trigger::Interval).await else {
            panic!("expected maintenance rebalance");
        };
        assert_eq!(outcome.request.reason, RebalanceReason::Maintenance);
        assert_eq!(outcome.center, 1_000);
    }

    #[tokio::test]
    async fn test_denied_maintenance_is_deferred() {
        let fake = FakeChain::new(1_000);
        let mut config = config();
        config.timing.maintenance_interval_secs = 0;
        config.timing.min_rebalance_interval_secs = 300;
        let agent = agent(&fake, config).await;
        agent.tick(Trigger::Interval).await;

        assert!(matches!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Denied(DenyReason::Cooldown { .. })
        ));
        let state = agent.state.lock().await;
        assert!(state.tracker.maintenance_deadline().is_some());
    }

    #[tokio::test]
    async fn test_failures_back_off() {
        let fake = FakeChain::new(1_000);
        let mut config = config();
        config.timing.failure_backoff_base_secs = 30;
        let agent = agent(&fake, config).await;
        fake.reject_adds(1);

        assert_eq!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Failed { consecutive: 1 }
        );
        assert_eq!(agent.tick(Trigger::Interval).await, TickOutcome::BackingOff);
    }

    #[tokio::test]
    async fn test_failure_streak_is_fatal() {
        let fake = FakeChain::new(1_000);
        let mut config = config();
        config.safety.max_consecutive_failures = 2;
        let agent = agent(&fake, config).await;
        fake.reject_adds(10);

        assert_eq!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Failed { consecutive: 1 }
        );
        assert_eq!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Fatal(FatalReason::TooManyFailures { count: 2 })
        );
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let fake = FakeChain::new(1_000);
        let agent = agent(&fake, config()).await;
        fake.fail_reads(3);

        assert_eq!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Failed { consecutive: 1 }
        );
        assert!(matches!(agent.tick(Trigger::Interval).await, TickOutcome::Rebalanced(_)));
        assert_eq!(agent.ledger_snapshot().await.counters().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_gas_spike_denies_then_clears() {
        let fake = FakeChain::new(1_000);
        let agent = agent(&fake, config()).await;

        // 2000 gwei over a 500k gas budget is 1 native, above the 0.5 ceiling
        fake.set_gas_price(2_000_000_000_000);
        assert!(matches!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Denied(DenyReason::GasCeiling { .. })
        ));
        assert!(fake.calls().is_empty());

        fake.set_gas_price(50_000_000_000);
        assert!(matches!(agent.tick(Trigger::Interval).await, TickOutcome::Rebalanced(_)));
    }

    #[tokio::test]
    async fn test_low_balance_is_fatal() {
        let fake = FakeChain::new(1_000);
        fake.set_native_balance(native_to_wei(50.5));
        let agent = agent(&fake, config()).await;

        assert!(matches!(
            agent.tick(Trigger::Interval).await,
            TickOutcome::Fatal(FatalReason::LowBalance { .. })
        ));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scan_bootstrap_withdraws_existing_holdings() {
        let fake = FakeChain::new(1_000);
        fake.set_bin_balance(996, U256::from(1_000u64));
        let mut config = config();
        config.range.entry_mode = EntryMode::Scan;
        let agent = agent(&fake, config).await;

        agent.bootstrap().await.unwrap();
        assert_eq!(agent.ledger_snapshot().await.orphan_bins(), &[996]);

        let TickOutcome::Rebalanced(outcome) = agent.tick(Trigger::Interval).await else {
            panic!("expected initial rebalance");
        };
        assert_eq!(outcome.removed_bins, 1);
        assert_eq!(fake.removed_ids(), vec![vec![996]]);
    }

    #[tokio::test]
    async fn test_run_withdraws_on_fatal() {
        let fake = FakeChain::new(1_000);
        let agent = agent(&fake, config()).await;
        agent.tick(Trigger::Interval).await;

        fake.set_active_bins(&[1_005]);
        fake.set_native_balance(native_to_wei(50.5));

        let result = tokio::time::timeout(Duration::from_secs(5), agent.run(Arc::new(SilentHeads)))
            .await
            .expect("run returns on fatal");

        assert!(matches!(
            result,
            Err(RebalanceError::Fatal(FatalReason::LowBalance { .. }))
        ));
        assert_eq!(fake.removed_ids(), vec![vec![999, 1_000, 1_001]]);
    }
}
