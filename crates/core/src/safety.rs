//! Gating: decides whether a rebalance request may run now.
//!
//! Checks run in a fixed order and the first failure wins. Each check is a
//! pure function of a [`GateContext`] snapshot; only the day rollover
//! mutates the counters.

use alloy::primitives::U256;
use chrono::NaiveDate;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::{SafetyConfig, TimingConfig};
use crate::error::FatalReason;
use crate::types::{RebalanceReason, RebalanceRequest};

/// Rebalance counters. Both counts only grow outside of
/// [`SafetyCounters::rollover`] and [`SafetyCounters::record_success`].
#[derive(Debug, Clone)]
pub struct SafetyCounters {
    daily_rebalance_count: u32,
    consecutive_failures: u32,
    last_rebalance: Option<Instant>,
    day: NaiveDate,
}

impl SafetyCounters {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            daily_rebalance_count: 0,
            consecutive_failures: 0,
            last_rebalance: None,
            day: today,
        }
    }

    pub fn daily_rebalance_count(&self) -> u32 {
        self.daily_rebalance_count
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_rebalance(&self) -> Option<Instant> {
        self.last_rebalance
    }

    /// Reset the daily count on a new local day. Returns whether it reset.
    pub fn rollover(&mut self, today: NaiveDate) -> bool {
        if today == self.day {
            return false;
        }
        info!(
            previous_day = %self.day,
            rebalances = self.daily_rebalance_count,
            "Day rollover, resetting daily rebalance count"
        );
        self.day = today;
        self.daily_rebalance_count = 0;
        true
    }

    pub fn record_success(&mut self, now: Instant) {
        self.daily_rebalance_count += 1;
        self.consecutive_failures = 0;
        self.last_rebalance = Some(now);
    }

    /// Count a failed iteration. Returns the new streak length.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }
}

/// Everything the governor looks at for one decision.
///
/// [`SafetyGovernor::evaluate`] refreshes the counter fields from
/// [`SafetyCounters`] after the rollover, so callers may leave them zeroed.
#[derive(Debug, Clone, Copy)]
pub struct GateContext {
    pub request: RebalanceRequest,
    pub now: Instant,
    pub daily_rebalance_count: u32,
    pub last_rebalance: Option<Instant>,
    pub out_of_range_since: Option<Instant>,
    /// Last active-bin jump, in bins.
    pub last_jump: u32,
    /// Wei per gas unit.
    pub gas_price: u128,
    pub native_balance: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    DailyCap { count: u32, max: u32 },
    Cooldown { remaining: Duration, volatile: bool },
    GracePeriod { remaining: Duration },
    GasCeiling { cost: U256, ceiling: U256 },
    LowBalance { available: U256, required: U256 },
}

impl DenyReason {
    /// Low balance stops the keeper; everything else is a skip.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LowBalance { .. })
    }

    pub fn into_fatal(self) -> Option<FatalReason> {
        match self {
            Self::LowBalance {
                available,
                required,
            } => Some(FatalReason::LowBalance {
                available,
                required,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyCap { count, max } => write!(f, "daily cap reached ({count}/{max})"),
            Self::Cooldown {
                remaining,
                volatile,
            } => write!(
                f,
                "cooldown {}s remaining{}",
                remaining.as_secs(),
                if *volatile { " (volatile)" } else { "" }
            ),
            Self::GracePeriod { remaining } => {
                write!(f, "grace period {}s remaining", remaining.as_secs())
            }
            Self::GasCeiling { cost, ceiling } => {
                write!(f, "gas cost {cost} wei above ceiling {ceiling} wei")
            }
            Self::LowBalance {
                available,
                required,
            } => write!(f, "balance {available} wei below minimum {required} wei"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone)]
pub struct SafetyGovernor {
    max_per_day: u32,
    cooldown: Duration,
    volatility_multiplier: u32,
    volatility_threshold: u32,
    grace: Duration,
    gas_budget: u64,
    gas_ceiling: U256,
    gas_reserve: U256,
    min_safe_balance: U256,
}

impl SafetyGovernor {
    pub fn new(safety: &SafetyConfig, timing: &TimingConfig) -> Self {
        Self {
            max_per_day: safety.max_rebalances_per_day,
            cooldown: timing.min_rebalance_interval(),
            volatility_multiplier: timing.volatility_multiplier,
            volatility_threshold: timing.volatility_threshold_bins,
            grace: timing.grace_period(),
            gas_budget: safety.gas_budget_units,
            gas_ceiling: safety.gas_ceiling_wei(),
            gas_reserve: safety.gas_reserve_wei(),
            min_safe_balance: safety.min_safe_balance_wei(),
        }
    }

    /// Apply the day rollover, then run every check in order.
    pub fn evaluate(
        &self,
        counters: &mut SafetyCounters,
        today: NaiveDate,
        ctx: GateContext,
    ) -> Verdict {
        counters.rollover(today);
        let ctx = GateContext {
            daily_rebalance_count: counters.daily_rebalance_count(),
            last_rebalance: counters.last_rebalance(),
            ..ctx
        };

        let result = self
            .check_daily_cap(&ctx)
            .and_then(|_| self.check_cooldown(&ctx))
            .and_then(|_| self.check_grace(&ctx))
            .and_then(|_| self.check_gas(&ctx))
            .and_then(|_| self.check_balance(&ctx));

        match result {
            Ok(()) => Verdict::Allow,
            Err(reason) => Verdict::Deny(reason),
        }
    }

    pub fn check_daily_cap(&self, ctx: &GateContext) -> Result<(), DenyReason> {
        if ctx.daily_rebalance_count >= self.max_per_day {
            return Err(DenyReason::DailyCap {
                count: ctx.daily_rebalance_count,
                max: self.max_per_day,
            });
        }
        Ok(())
    }

    pub fn check_cooldown(&self, ctx: &GateContext) -> Result<(), DenyReason> {
        let Some(last) = ctx.last_rebalance else {
            return Ok(());
        };

        let volatile = ctx.last_jump >= self.volatility_threshold;
        let cooldown = if volatile {
            self.cooldown * self.volatility_multiplier
        } else {
            self.cooldown
        };

        let elapsed = ctx.now.saturating_duration_since(last);
        if elapsed < cooldown {
            return Err(DenyReason::Cooldown {
                remaining: cooldown - elapsed,
                volatile,
            });
        }
        Ok(())
    }

    pub fn check_grace(&self, ctx: &GateContext) -> Result<(), DenyReason> {
        if ctx.request.reason != RebalanceReason::OutOfRange {
            return Ok(());
        }
        let since = ctx.out_of_range_since.unwrap_or(ctx.now);
        let elapsed = ctx.now.saturating_duration_since(since);
        if elapsed < self.grace {
            return Err(DenyReason::GracePeriod {
                remaining: self.grace - elapsed,
            });
        }
        Ok(())
    }

    pub fn check_gas(&self, ctx: &GateContext) -> Result<(), DenyReason> {
        let cost = U256::from(ctx.gas_price) * U256::from(self.gas_budget);
        if cost > self.gas_ceiling {
            return Err(DenyReason::GasCeiling {
                cost,
                ceiling: self.gas_ceiling,
            });
        }
        Ok(())
    }

    pub fn check_balance(&self, ctx: &GateContext) -> Result<(), DenyReason> {
        let available = ctx.native_balance.saturating_sub(self.gas_reserve);
        if available < self.min_safe_balance {
            return Err(DenyReason::LowBalance {
                available,
                required: self.min_safe_balance,
            });
        }
        Ok(())
    }

    /// Native left for deposits after the reserve.
    pub fn spendable(&self, native_balance: U256) -> Result<U256, FatalReason> {
        let available = native_balance.saturating_sub(self.gas_reserve);
        if available < self.min_safe_balance {
            return Err(FatalReason::LowBalance {
                available,
                required: self.min_safe_balance,
            });
        }
        Ok(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{native_to_wei, StrategyConfig};

    fn governor() -> SafetyGovernor {
        let config = StrategyConfig::default();
        SafetyGovernor::new(&config.safety, &config.timing)
    }

    /// A base instant far enough from boot to subtract from.
    fn base() -> Instant {
        Instant::now() + Duration::from_secs(3_600)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn ctx(reason: RebalanceReason, now: Instant) -> GateContext {
        GateContext {
            request: RebalanceRequest::new(reason, 100),
            now,
            daily_rebalance_count: 0,
            last_rebalance: None,
            out_of_range_since: Some(now - Duration::from_secs(120)),
            last_jump: 1,
            gas_price: 50_000_000_000,
            native_balance: native_to_wei(100.0),
        }
    }

    #[test]
    fn test_initial_request_passes() {
        let gov = governor();
        let mut counters = SafetyCounters::new(day(1));
        let now = base();
        assert_eq!(
            gov.evaluate(&mut counters, day(1), ctx(RebalanceReason::Initial, now)),
            Verdict::Allow
        );
    }

    #[test]
    fn test_daily_cap_and_rollover() {
        let gov = governor();
        let mut counters = SafetyCounters::new(day(1));
        let start = base();
        for _ in 0..48 {
            counters.record_success(start);
        }
        let later = start + Duration::from_secs(3_600);

        let verdict = gov.evaluate(&mut counters, day(1), ctx(RebalanceReason::Initial, later));
        assert_eq!(
            verdict,
            Verdict::Deny(DenyReason::DailyCap { count: 48, max: 48 })
        );

        // First check of the next day resets the count
        let verdict = gov.evaluate(&mut counters, day(2), ctx(RebalanceReason::Initial, later));
        assert_eq!(verdict, Verdict::Allow);
        assert_eq!(counters.daily_rebalance_count(), 0);
    }

    #[test]
    fn test_cooldown_with_volatility() {
        let gov = governor();
        let mut counters = SafetyCounters::new(day(1));
        let start = base();
        counters.record_success(start);

        let calm = ctx(RebalanceReason::OutOfRange, start + Duration::from_secs(400));
        assert_eq!(gov.evaluate(&mut counters, day(1), calm), Verdict::Allow);

        // A 3-bin jump doubles the 300s cooldown
        let volatile = GateContext {
            last_jump: 3,
            ..ctx(RebalanceReason::OutOfRange, start + Duration::from_secs(400))
        };
        assert_eq!(
            gov.evaluate(&mut counters, day(1), volatile),
            Verdict::Deny(DenyReason::Cooldown {
                remaining: Duration::from_secs(200),
                volatile: true
            })
        );
    }

    #[test]
    fn test_grace_only_for_out_of_range() {
        let gov = governor();
        let now = base();
        let fresh_exit = GateContext {
            out_of_range_since: Some(now - Duration::from_secs(10)),
            ..ctx(RebalanceReason::OutOfRange, now)
        };
        assert_eq!(
            gov.check_grace(&fresh_exit),
            Err(DenyReason::GracePeriod {
                remaining: Duration::from_secs(50)
            })
        );

        let maintenance = GateContext {
            request: RebalanceRequest::new(RebalanceReason::Maintenance, 100),
            ..fresh_exit
        };
        assert_eq!(gov.check_grace(&maintenance), Ok(()));
    }

    #[test]
    fn test_gas_ceiling() {
        let gov = governor();
        let now = base();
        // 500k gas * 1000 gwei = 0.5 native: at the ceiling, allowed
        let at_ceiling = GateContext {
            gas_price: 1_000_000_000_000,
            ..ctx(RebalanceReason::Initial, now)
        };
        assert_eq!(gov.check_gas(&at_ceiling), Ok(()));

        let spike = GateContext {
            gas_price: 1_000_000_000_001,
            ..at_ceiling
        };
        assert!(matches!(gov.check_gas(&spike), Err(DenyReason::GasCeiling { .. })));
    }

    #[test]
    fn test_low_balance_is_fatal() {
        let gov = governor();
        let mut counters = SafetyCounters::new(day(1));
        let now = base();
        let poor = GateContext {
            native_balance: native_to_wei(50.5),
            ..ctx(RebalanceReason::Initial, now)
        };

        match gov.evaluate(&mut counters, day(1), poor) {
            Verdict::Deny(reason) => {
                assert!(reason.is_fatal());
                assert!(matches!(reason.into_fatal(), Some(FatalReason::LowBalance { .. })));
            }
            Verdict::Allow => panic!("expected low balance deny"),
        }
        assert_eq!(gov.spendable(native_to_wei(60.0)), Ok(native_to_wei(10.0)));
    }

    #[test]
    fn test_failure_streak_resets_on_success() {
        let mut counters = SafetyCounters::new(day(1));
        assert_eq!(counters.record_failure(), 1);
        assert_eq!(counters.record_failure(), 2);
        counters.record_success(Instant::now());
        assert_eq!(counters.consecutive_failures(), 0);
        assert_eq!(counters.daily_rebalance_count(), 1);
    }
}
