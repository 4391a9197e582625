//! Strategy configuration with profile support.
//!
//! Every constant the decision engine consults lives here, grouped by
//! concern. Values are fixed at startup.

use alloy::primitives::U256;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    #[serde(default)]
    pub range: RangeConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Which token bins above the active bin hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Liquidity Book convention: price is Y per X, so bins above hold X.
    #[default]
    XAbove,
    YAbove,
}

/// How the first rebalance after a cold start is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Deposit wallet funds around the first observed bin.
    #[default]
    Fresh,
    /// Look for holdings left by an earlier run and withdraw them first.
    Scan,
}

/// Range shape and position bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeConfig {
    /// Bins on each side of the center (1 gives a 3-bin range)
    #[serde(default = "default_half_width")]
    pub half_width: u32,

    /// Out-of-range moves overlapping the current range by at least this
    /// many bins are suppressed
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: u32,

    #[serde(default)]
    pub orientation: Orientation,

    /// Symbols treated as the wrapped native token (case-insensitive)
    #[serde(default = "default_native_symbols")]
    pub native_symbols: Vec<String>,

    #[serde(default)]
    pub entry_mode: EntryMode,

    /// Bins on each side of the active bin checked in `scan` mode
    #[serde(default = "default_scan_radius")]
    pub scan_radius: u32,
}

fn default_half_width() -> u32 {
    1
}
fn default_overlap_threshold() -> u32 {
    2
}
fn default_native_symbols() -> Vec<String> {
    vec!["WMON".to_string(), "WNATIVE".to_string()]
}
fn default_scan_radius() -> u32 {
    10
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            half_width: default_half_width(),
            overlap_threshold: default_overlap_threshold(),
            orientation: Orientation::default(),
            native_symbols: default_native_symbols(),
            entry_mode: EntryMode::default(),
            scan_radius: default_scan_radius(),
        }
    }
}

/// Loop cadence, cooldowns and timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Fallback poll interval when no new heads arrive (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Minimum time out of range before acting (seconds)
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Minimum time between rebalances (seconds)
    #[serde(default = "default_min_rebalance_interval")]
    pub min_rebalance_interval_secs: u64,

    /// Cooldown multiplier after a large active-bin jump
    #[serde(default = "default_volatility_multiplier")]
    pub volatility_multiplier: u32,

    /// Jump size (bins) that counts as volatile
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold_bins: u32,

    /// Recenter an in-range position after this long (seconds)
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// First backoff after a failed iteration (seconds)
    #[serde(default = "default_failure_backoff_base")]
    pub failure_backoff_base_secs: u64,

    /// Backoff ceiling (seconds)
    #[serde(default = "default_failure_backoff_max")]
    pub failure_backoff_max_secs: u64,
}

fn default_poll_interval() -> u64 {
    12
}
fn default_grace_period() -> u64 {
    60
}
fn default_min_rebalance_interval() -> u64 {
    300
}
fn default_volatility_multiplier() -> u32 {
    2
}
fn default_volatility_threshold() -> u32 {
    2
}
fn default_maintenance_interval() -> u64 {
    30 * 60
}
fn default_failure_backoff_base() -> u64 {
    30
}
fn default_failure_backoff_max() -> u64 {
    600
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            grace_period_secs: default_grace_period(),
            min_rebalance_interval_secs: default_min_rebalance_interval(),
            volatility_multiplier: default_volatility_multiplier(),
            volatility_threshold_bins: default_volatility_threshold(),
            maintenance_interval_secs: default_maintenance_interval(),
            failure_backoff_base_secs: default_failure_backoff_base(),
            failure_backoff_max_secs: default_failure_backoff_max(),
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
    pub fn min_rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.min_rebalance_interval_secs)
    }
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
    pub fn failure_backoff_base(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_base_secs)
    }
    pub fn failure_backoff_max(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_max_secs)
    }
}

/// Limits enforced by the safety governor. Native amounts are in whole
/// tokens (18 decimals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_rebalances_per_day")]
    pub max_rebalances_per_day: u32,

    /// Maximum native spend for one rebalance at the current gas price
    #[serde(default = "default_gas_ceiling")]
    pub gas_ceiling_native: f64,

    /// Gas units budgeted for one rebalance (remove + add)
    #[serde(default = "default_gas_budget")]
    pub gas_budget_units: u64,

    /// Native balance never deposited
    #[serde(default = "default_gas_reserve")]
    pub gas_reserve_native: f64,

    /// Shut down when native minus reserve falls below this
    #[serde(default = "default_min_safe_balance")]
    pub min_safe_balance_native: f64,

    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Bins holding fewer LB shares than this count as empty
    #[serde(default)]
    pub min_bin_liquidity: u64,
}

fn default_max_rebalances_per_day() -> u32 {
    48
}
fn default_gas_ceiling() -> f64 {
    0.5
}
fn default_gas_budget() -> u64 {
    500_000
}
fn default_gas_reserve() -> f64 {
    50.0
}
fn default_min_safe_balance() -> f64 {
    1.0
}
fn default_max_consecutive_failures() -> u32 {
    5
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_rebalances_per_day: default_max_rebalances_per_day(),
            gas_ceiling_native: default_gas_ceiling(),
            gas_budget_units: default_gas_budget(),
            gas_reserve_native: default_gas_reserve(),
            min_safe_balance_native: default_min_safe_balance(),
            max_consecutive_failures: default_max_consecutive_failures(),
            min_bin_liquidity: 0,
        }
    }
}

impl SafetyConfig {
    pub fn gas_ceiling_wei(&self) -> U256 {
        native_to_wei(self.gas_ceiling_native)
    }
    pub fn gas_reserve_wei(&self) -> U256 {
        native_to_wei(self.gas_reserve_native)
    }
    pub fn min_safe_balance_wei(&self) -> U256 {
        native_to_wei(self.min_safe_balance_native)
    }
    pub fn min_bin_liquidity(&self) -> U256 {
        U256::from(self.min_bin_liquidity)
    }
}

/// Transaction parameters and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Amount slippage applied to deposit minimums (percentage)
    #[serde(default = "default_slippage_pct")]
    pub slippage_pct: f64,

    /// Active-bin drift the router tolerates
    #[serde(default = "default_id_slippage")]
    pub id_slippage: u32,

    /// Transaction deadline (seconds from submission)
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,

    /// Share of usable balances deposited (percentage)
    #[serde(default = "default_liquidity_usage_pct")]
    pub liquidity_usage_pct: f64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Receipt wait before a confirmation counts as timed out (seconds)
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

fn default_slippage_pct() -> f64 {
    0.5
}
fn default_id_slippage() -> u32 {
    10
}
fn default_deadline() -> u64 {
    300
}
fn default_liquidity_usage_pct() -> f64 {
    100.0
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    2_000
}
fn default_retry_max_delay() -> u64 {
    30_000
}
fn default_confirmation_timeout() -> u64 {
    90
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_pct: default_slippage_pct(),
            id_slippage: default_id_slippage(),
            deadline_secs: default_deadline(),
            liquidity_usage_pct: default_liquidity_usage_pct(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            confirmation_timeout_secs: default_confirmation_timeout(),
        }
    }
}

impl ExecutionConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    /// Slippage in basis points.
    pub fn slippage_bps(&self) -> u64 {
        (self.slippage_pct * 100.0).round() as u64
    }

    /// Usage in basis points.
    pub fn usage_bps(&self) -> u64 {
        (self.liquidity_usage_pct * 100.0).round() as u64
    }
}

/// Whole native tokens to wei.
pub fn native_to_wei(amount: f64) -> U256 {
    U256::from((amount.max(0.0) * 1e18) as u128)
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            range: RangeConfig::default(),
            timing: TimingConfig::default(),
            safety: SafetyConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Fast cadence and small balances for a test deployment.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            timing: TimingConfig {
                poll_interval_secs: 2,
                grace_period_secs: 5,
                min_rebalance_interval_secs: 30,
                maintenance_interval_secs: 300,
                failure_backoff_base_secs: 5,
                failure_backoff_max_secs: 60,
                ..Default::default()
            },
            safety: SafetyConfig {
                max_rebalances_per_day: 500,
                gas_ceiling_native: 0.05,
                gas_reserve_native: 0.5,
                min_safe_balance_native: 0.1,
                max_consecutive_failures: 3,
                ..Default::default()
            },
            execution: ExecutionConfig {
                retry_base_delay_ms: 500,
                retry_max_delay_ms: 5_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Conservative limits for unattended mainnet operation.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            range: RangeConfig {
                entry_mode: EntryMode::Scan,
                ..Default::default()
            },
            timing: TimingConfig {
                grace_period_secs: 120,
                min_rebalance_interval_secs: 600,
                volatility_multiplier: 3,
                maintenance_interval_secs: 60 * 60,
                ..Default::default()
            },
            safety: SafetyConfig {
                max_rebalances_per_day: 24,
                gas_ceiling_native: 0.25,
                min_bin_liquidity: 1_000,
                ..Default::default()
            },
            execution: ExecutionConfig {
                slippage_pct: 0.3,
                id_slippage: 5,
                ..Default::default()
            },
        }
    }

    /// Tight tracking: rebalance as soon as limits allow.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            timing: TimingConfig {
                poll_interval_secs: 4,
                grace_period_secs: 15,
                min_rebalance_interval_secs: 60,
                maintenance_interval_secs: 15 * 60,
                ..Default::default()
            },
            safety: SafetyConfig {
                max_rebalances_per_day: 144,
                gas_ceiling_native: 1.0,
                ..Default::default()
            },
            execution: ExecutionConfig {
                slippage_pct: 1.0,
                id_slippage: 20,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Profile from `BOT_PROFILE`, or default.
    /// Supported values: testing, production, aggressive
    pub fn from_env() -> Self {
        let profile = std::env::var("BOT_PROFILE").unwrap_or_else(|_| "default".to_string());
        Self::from_profile(&profile)
    }

    pub fn from_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading strategy file {}", path.display()))?;
        let config: StrategyConfig = toml::from_str(&content)
            .with_context(|| format!("parsing strategy file {}", path.display()))?;
        Ok(config)
    }

    /// `STRATEGY_FILE` if set, otherwise the `BOT_PROFILE` profile.
    pub fn load() -> Result<Self> {
        let config = match std::env::var("STRATEGY_FILE") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.range.half_width >= 1, "range.half_width must be at least 1");
        ensure!(
            self.range.overlap_threshold >= 1,
            "range.overlap_threshold must be at least 1"
        );
        ensure!(self.timing.poll_interval_secs > 0, "timing.poll_interval_secs must be positive");
        ensure!(
            self.timing.volatility_multiplier >= 1,
            "timing.volatility_multiplier must be at least 1"
        );
        ensure!(
            self.execution.retry_attempts >= 1,
            "execution.retry_attempts must be at least 1"
        );
        ensure!(
            (0.0..100.0).contains(&self.execution.slippage_pct),
            "execution.slippage_pct must be in [0, 100)"
        );
        ensure!(
            self.execution.liquidity_usage_pct > 0.0 && self.execution.liquidity_usage_pct <= 100.0,
            "execution.liquidity_usage_pct must be in (0, 100]"
        );
        ensure!(
            self.safety.max_consecutive_failures >= 1,
            "safety.max_consecutive_failures must be at least 1"
        );
        Ok(())
    }

    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Strategy configuration loaded");
        tracing::info!(
            half_width = self.range.half_width,
            overlap_threshold = self.range.overlap_threshold,
            orientation = ?self.range.orientation,
            entry_mode = ?self.range.entry_mode,
            "Range"
        );
        tracing::info!(
            poll_secs = self.timing.poll_interval_secs,
            grace_secs = self.timing.grace_period_secs,
            min_interval_secs = self.timing.min_rebalance_interval_secs,
            volatility_multiplier = self.timing.volatility_multiplier,
            maintenance_secs = self.timing.maintenance_interval_secs,
            "Timing"
        );
        tracing::info!(
            max_per_day = self.safety.max_rebalances_per_day,
            gas_ceiling = self.safety.gas_ceiling_native,
            gas_reserve = self.safety.gas_reserve_native,
            min_safe_balance = self.safety.min_safe_balance_native,
            max_failures = self.safety.max_consecutive_failures,
            "Safety limits"
        );
        tracing::info!(
            slippage_pct = self.execution.slippage_pct,
            id_slippage = self.execution.id_slippage,
            usage_pct = self.execution.liquidity_usage_pct,
            retry_attempts = self.execution.retry_attempts,
            "Execution"
        );
    }
}
